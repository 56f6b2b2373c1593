//! Real-time side: drains the ring into the output device every quantum.
//!
//! # Design constraints
//!
//! `Consumer::process*` runs on the audio thread. It **must not**:
//! - Allocate heap memory
//! - Block on a mutex, condvar or channel
//! - Wait for the producer
//!
//! The scratch buffer is allocated once in `Consumer::new`, channels are only
//! touched with `try_send` / `try_recv`, and everything reported goes through
//! atomic counters. Underrun is answered with silence and the stream carries
//! on at the next quantum.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::diagnostics::StreamDiagnostics;
use crate::{
    buffering::{SharedRing, CHANNELS},
    flow::{FlowController, RequestGate},
    ipc::messages::{ConsumerMessage, ProducerMessage},
};

/// Consumer context. Owned by whatever drives the output callback.
pub struct Consumer {
    ring: Arc<SharedRing>,
    flow: FlowController,
    gate: RequestGate,
    /// Set once the producer reports its engine is configured.
    ready: bool,
    to_producer: Sender<ProducerMessage>,
    from_producer: Receiver<ConsumerMessage>,
    /// Interleaved staging area, `max_quantum * CHANNELS` samples.
    scratch: Vec<f32>,
    diagnostics: Arc<StreamDiagnostics>,
}

impl Consumer {
    pub fn new(
        ring: Arc<SharedRing>,
        flow: FlowController,
        max_quantum: usize,
        to_producer: Sender<ProducerMessage>,
        from_producer: Receiver<ConsumerMessage>,
        diagnostics: Arc<StreamDiagnostics>,
    ) -> Self {
        Self {
            ring,
            flow,
            gate: RequestGate::new(),
            ready: false,
            to_producer,
            from_producer,
            scratch: vec![0.0; max_quantum.max(1) * CHANNELS],
            diagnostics,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn request_pending(&self) -> bool {
        self.gate.is_pending()
    }

    pub fn ring(&self) -> &Arc<SharedRing> {
        &self.ring
    }

    /// Frames per callback the stream was negotiated with.
    pub fn quantum(&self) -> usize {
        self.flow.quantum()
    }

    /// Planar callback: `outputs[c]` is channel `c`, all of equal length.
    ///
    /// Output channel `c` takes ring channel `c % 2`. Always returns `true`;
    /// the stream keeps running through underruns.
    pub fn process(&mut self, outputs: &mut [&mut [f32]]) -> bool {
        let frames = outputs.first().map_or(0, |ch| ch.len());
        let delivered = self.render(frames, |offset, chunk| {
            for (c, channel) in outputs.iter_mut().enumerate() {
                let src = c % CHANNELS;
                for (i, frame) in chunk.chunks_exact(CHANNELS).enumerate() {
                    channel[offset + i] = frame[src];
                }
            }
        });
        if !delivered {
            for channel in outputs.iter_mut() {
                channel.fill(0.0);
            }
        }
        true
    }

    /// Interleaved callback with `channels` samples per frame (cpal layout).
    pub fn process_interleaved(&mut self, out: &mut [f32], channels: usize) -> bool {
        if channels == 0 {
            return true;
        }
        let frames = out.len() / channels;
        let delivered = self.render(frames, |offset, chunk| {
            for (i, frame) in chunk.chunks_exact(CHANNELS).enumerate() {
                let dst = &mut out[(offset + i) * channels..(offset + i + 1) * channels];
                for (c, sample) in dst.iter_mut().enumerate() {
                    *sample = frame[c % CHANNELS];
                }
            }
        });
        if !delivered {
            out.fill(0.0);
        }
        true
    }

    /// One quantum: absorb signals, copy `frames` frames out through `sink`
    /// (in scratch-sized chunks, `sink(frame_offset, interleaved_chunk)`),
    /// then apply the request policy to the post-read fill level.
    ///
    /// Returns `false` when nothing was delivered and the caller must write
    /// silence.
    fn render<F>(&mut self, frames: usize, mut sink: F) -> bool
    where
        F: FnMut(usize, &[f32]),
    {
        self.drain_signals();
        StreamDiagnostics::bump(&self.diagnostics.quanta_processed, 1);

        if !self.ready {
            StreamDiagnostics::bump(&self.diagnostics.silent_before_ready, 1);
            return false;
        }

        let indices = self.ring.load_indices();
        let available = indices.available_to_read();

        let delivered = frames > 0 && available >= frames && {
            let chunk_frames = self.scratch.len() / CHANNELS;
            let mut at = indices.read;
            let mut done = 0;
            let mut ok = true;
            while done < frames {
                let n = (frames - done).min(chunk_frames);
                let chunk = &mut self.scratch[..n * CHANNELS];
                match self.ring.read(at, chunk) {
                    Some(next) => at = next,
                    None => {
                        ok = false;
                        break;
                    }
                }
                sink(done, chunk);
                done += n;
            }
            if ok {
                self.ring.publish_read_index(at);
            }
            ok
        };

        let remaining = if delivered {
            StreamDiagnostics::bump(&self.diagnostics.frames_played, frames);
            available - frames
        } else {
            if frames > 0 {
                StreamDiagnostics::bump(&self.diagnostics.underruns, 1);
            }
            available
        };

        self.maybe_request(remaining, frames);
        delivered
    }

    fn drain_signals(&mut self) {
        while let Ok(msg) = self.from_producer.try_recv() {
            match msg {
                ConsumerMessage::Ready => self.ready = true,
                ConsumerMessage::DataProduced => {
                    self.gate.clear();
                    StreamDiagnostics::bump(&self.diagnostics.acks_received, 1);
                }
            }
        }
    }

    /// Demand is judged against the callback being served, which may be
    /// larger than the configured quantum.
    fn maybe_request(&mut self, available_to_read: usize, callback_frames: usize) {
        if !self.flow.should_request_for(available_to_read, callback_frames) {
            return;
        }
        if !self.gate.try_arm() {
            StreamDiagnostics::bump(&self.diagnostics.requests_coalesced, 1);
            return;
        }
        match self.to_producer.try_send(ProducerMessage::RequestData) {
            Ok(()) => StreamDiagnostics::bump(&self.diagnostics.requests_sent, 1),
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                // Nothing in flight, so the next quantum may try again.
                self.gate.disarm();
                StreamDiagnostics::bump(&self.diagnostics.requests_dropped, 1);
            }
        }
    }
}
