//! Offline render: drive the consumer on a simulated device clock and write
//! what it delivers to a WAV file.
//!
//! The clock ticks once per quantum. At `speed = 1.0` ticks are spaced like a
//! real device at the session rate; larger values compress time, and `0.0`
//! runs unpaced. Underruns show up as silent quanta in the file and in the
//! report, exactly as they would on hardware.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};
use wavefeed_core::{AudioSession, DiagnosticsSnapshot, SineEngine};

use crate::settings::AppSettings;

const READY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderReport {
    pub sample_rate: u32,
    pub frames_written: usize,
    pub diagnostics: DiagnosticsSnapshot,
}

pub fn render_to_wav(
    settings: &AppSettings,
    sample_rate: u32,
    seconds: f64,
    speed: f64,
    out: &Path,
) -> anyhow::Result<RenderReport> {
    let config = settings.session_config(sample_rate);
    let quantum = config.quantum;
    let engine = SineEngine::new(settings.frequency, settings.amplitude);
    let session = AudioSession::new(config, engine);

    let mut consumer = session.start()?;
    session.wait_ready(READY_TIMEOUT)?;

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(out, spec)
        .with_context(|| format!("failed to create {}", out.display()))?;

    let total_frames = (seconds.max(0.0) * sample_rate as f64).round() as usize;
    let tick = if speed > 0.0 {
        Some(Duration::from_secs_f64(
            quantum as f64 / sample_rate as f64 / speed,
        ))
    } else {
        None
    };

    info!(
        frames = total_frames,
        quantum,
        speed,
        out = %out.display(),
        "offline render started"
    );

    let mut buffer = vec![0.0f32; quantum * 2];
    let mut written = 0usize;
    let started = Instant::now();
    let mut ticks = 0u32;

    while written < total_frames {
        consumer.process_interleaved(&mut buffer, 2);

        let frames = quantum.min(total_frames - written);
        for sample in &buffer[..frames * 2] {
            writer.write_sample(*sample)?;
        }
        written += frames;
        ticks += 1;

        if let Some(tick) = tick {
            let deadline = started + tick * ticks;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
        }
    }

    writer.finalize()?;
    session.stop()?;

    let diagnostics = session.diagnostics_snapshot();
    if diagnostics.underruns > 0 {
        warn!(underruns = diagnostics.underruns, "render contains underruns");
    }
    info!(frames = written, "offline render finished");

    Ok(RenderReport {
        sample_rate,
        frames_written: written,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_writes_exact_length_stereo_float_wav() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tone.wav");
        let settings = AppSettings::default();

        let report = render_to_wav(&settings, 44_100, 0.5, 4.0, &path).expect("render");
        assert_eq!(report.frames_written, 22_050);

        let reader = hound::WavReader::open(&path).expect("open wav");
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.sample_format, hound::SampleFormat::Float);

        let samples: Vec<f32> = reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .expect("samples");
        assert_eq!(samples.len(), 22_050 * 2);
        assert!(samples.iter().all(|s| s.abs() <= 0.5 + 1e-6));
        assert!(samples.iter().any(|s| s.abs() > 0.1), "render is all silence");

        // One callback per quantum; the final partial quantum still counts.
        let quanta = 22_050usize.div_ceil(settings.quantum);
        assert_eq!(report.diagnostics.quanta_processed, quanta);
    }

    #[test]
    fn zero_seconds_yields_an_empty_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.wav");
        let report =
            render_to_wav(&AppSettings::default(), 48_000, 0.0, 0.0, &path).expect("render");
        assert_eq!(report.frames_written, 0);
        let reader = hound::WavReader::open(&path).expect("open wav");
        assert_eq!(reader.len(), 0);
    }
}
