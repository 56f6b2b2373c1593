//! Audio playback via cpal backend.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! The callback only calls [`Consumer::process_interleaved`], which reads the
//! shared ring and signals the producer with non-blocking sends.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on macOS).
//! `AudioOutput` therefore must be created and dropped on the same thread.

pub mod device;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, SampleFormat, SampleRate, Stream, StreamConfig, SupportedBufferSize,
};

use crate::{
    error::{Result, WavefeedError},
    session::Consumer,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Frames of conversion scratch reserved up front for non-f32 devices.
#[cfg(feature = "audio-cpal")]
const CONVERT_SCRATCH_FRAMES: usize = 8192;

/// An output device resolved ahead of session start, so the session can be
/// configured with the device's native rate.
#[cfg(feature = "audio-cpal")]
pub struct OutputDevice {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    sample_format: SampleFormat,
    buffer_size: SupportedBufferSize,
    device: cpal::Device,
}

#[cfg(feature = "audio-cpal")]
impl OutputDevice {
    /// Resolve an output device by preferred name, otherwise fall back to
    /// the default output device and then the first available device.
    pub fn select(preferred_device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.output_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred output device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list output devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_output_device() {
            default
        } else {
            let mut devices = host
                .output_devices()
                .map_err(|e| WavefeedError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(WavefeedError::NoDefaultOutputDevice)?;
            warn!("no default output device, falling back to first available output");
            fallback
        };

        let supported = device
            .default_output_config()
            .map_err(|e| WavefeedError::AudioDevice(e.to_string()))?;

        let resolved = Self {
            name: device.name().unwrap_or_default(),
            sample_rate: supported.sample_rate().0,
            channels: supported.channels(),
            sample_format: supported.sample_format(),
            buffer_size: supported.buffer_size().clone(),
            device,
        };
        info!(
            device = resolved.name.as_str(),
            sample_rate = resolved.sample_rate,
            channels = resolved.channels,
            "output device selected"
        );
        Ok(resolved)
    }

    /// Fixed callback size of `quantum` frames when the device accepts it,
    /// otherwise the host default.
    fn buffer_size_for(&self, quantum: usize) -> BufferSize {
        fixed_buffer_size(&self.buffer_size, quantum)
    }
}

#[cfg(feature = "audio-cpal")]
fn fixed_buffer_size(supported: &SupportedBufferSize, quantum: usize) -> BufferSize {
    match (supported, u32::try_from(quantum)) {
        (SupportedBufferSize::Range { min, max }, Ok(frames)) if (*min..=*max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        _ => BufferSize::Default,
    }
}

/// Handle to an active playback stream.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread on Windows/macOS.
/// Create and drop this type on the same OS thread.
pub struct AudioOutput {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag; set to `false` to make the callback emit silence.
    running: Arc<AtomicBool>,
    /// Device sample rate (Hz).
    pub sample_rate: u32,
    /// Interleaved channels the device expects.
    pub channels: u16,
}

#[cfg(feature = "audio-cpal")]
impl AudioOutput {
    /// Start playback on an already-selected device. The consumer is moved
    /// into the device callback.
    ///
    /// # Errors
    /// Returns `WavefeedError::AudioStream` if cpal fails to build or start
    /// the stream, or the device uses a sample format we do not convert to.
    pub fn open(
        output: OutputDevice,
        mut consumer: Consumer,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let buffer_size = output.buffer_size_for(consumer.quantum());
        let OutputDevice {
            name,
            sample_rate,
            channels,
            sample_format,
            device,
            ..
        } = output;

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size,
        };
        let ch = channels as usize;
        let running_cb = Arc::clone(&running);

        let stream = match sample_format {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    consumer.process_interleaved(data, ch);
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),

            SampleFormat::I16 => {
                let mut scratch = vec![0.0f32; CONVERT_SCRATCH_FRAMES * ch];
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _info| {
                        if !running_cb.load(Ordering::Relaxed) {
                            data.fill(0);
                            return;
                        }
                        convert_in_chunks(&mut consumer, &mut scratch, data, ch, |s| {
                            (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                        });
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::U16 => {
                let mut scratch = vec![0.0f32; CONVERT_SCRATCH_FRAMES * ch];
                device.build_output_stream(
                    &config,
                    move |data: &mut [u16], _info| {
                        if !running_cb.load(Ordering::Relaxed) {
                            data.fill(u16::MAX / 2 + 1);
                            return;
                        }
                        convert_in_chunks(&mut consumer, &mut scratch, data, ch, |s| {
                            ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16
                        });
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(WavefeedError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| WavefeedError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| WavefeedError::AudioStream(e.to_string()))?;

        info!(
            device = name.as_str(),
            sample_rate,
            channels,
            buffer_size = ?config.buffer_size,
            "playback started"
        );

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
            channels,
        })
    }

    /// Stop: the callback emits silence from its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Fill an integer-format device buffer through the preallocated f32
/// `scratch`, at most `scratch.len()` samples per pass. `channels` must divide
/// `scratch.len()` so every pass holds whole frames.
fn convert_in_chunks<T, F>(
    consumer: &mut Consumer,
    scratch: &mut [f32],
    data: &mut [T],
    channels: usize,
    convert: F,
) where
    F: Fn(f32) -> T,
{
    let chunk_len = (scratch.len() / channels.max(1)) * channels;
    if chunk_len == 0 {
        return;
    }
    for out in data.chunks_mut(chunk_len) {
        let staged = &mut scratch[..out.len()];
        consumer.process_interleaved(staged, channels);
        for (dst, src) in out.iter_mut().zip(staged.iter()) {
            *dst = convert(*src);
        }
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
pub struct OutputDevice {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[cfg(not(feature = "audio-cpal"))]
impl OutputDevice {
    pub fn select(_preferred_device_name: Option<&str>) -> Result<Self> {
        Err(WavefeedError::AudioDevice(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl AudioOutput {
    pub fn open(
        _output: OutputDevice,
        _consumer: Consumer,
        _running: Arc<AtomicBool>,
    ) -> Result<Self> {
        Err(WavefeedError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::create_shared_ring;
    use crate::flow::{FlowController, FlowPolicy};
    use crate::ipc::messages::ConsumerMessage;
    use crate::session::StreamDiagnostics;
    use crossbeam_channel::bounded;

    #[test]
    fn integer_output_is_converted_through_fixed_scratch() {
        let ring = create_shared_ring(64).expect("ring");
        let flow = FlowController::new(FlowPolicy::fill_to_target_for(64), 4, 64).expect("flow");
        let (to_producer, _requests) = bounded(4);
        let (replies, from_producer) = bounded(4);
        let mut consumer = Consumer::new(
            Arc::clone(&ring),
            flow,
            4,
            to_producer,
            from_producer,
            Arc::new(StreamDiagnostics::default()),
        );
        replies.send(ConsumerMessage::Ready).expect("ready");

        let samples: Vec<f32> = (0..20).flat_map(|n| [n as f32 / 20.0, -1.0]).collect();
        let next = ring.write(0, &samples).expect("write");
        ring.publish_write_index(next);

        // Three-frame scratch against a ten-frame device buffer.
        let mut scratch = vec![0.0f32; 3 * 2];
        let scratch_ptr = scratch.as_ptr();
        let mut data = vec![0i16; 10 * 2];
        convert_in_chunks(&mut consumer, &mut scratch, &mut data, 2, |s| {
            (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
        });

        assert_eq!(scratch.as_ptr(), scratch_ptr);
        assert_eq!(scratch.len(), 6);
        for (n, frame) in data.chunks_exact(2).enumerate() {
            assert_eq!(frame[0], (n as f32 / 20.0 * i16::MAX as f32) as i16);
            assert_eq!(frame[1], -i16::MAX);
        }
        assert_eq!(ring.load_indices().read, 10);
    }

    #[cfg(feature = "audio-cpal")]
    #[test]
    fn quantum_is_pinned_only_inside_the_device_range() {
        let range = SupportedBufferSize::Range { min: 64, max: 2048 };
        assert_eq!(fixed_buffer_size(&range, 128), BufferSize::Fixed(128));
        assert_eq!(fixed_buffer_size(&range, 32), BufferSize::Default);
        assert_eq!(
            fixed_buffer_size(&SupportedBufferSize::Unknown, 128),
            BufferSize::Default
        );
    }
}
