//! `SineEngine`: reference tone generator.

use std::f64::consts::TAU;

use tracing::info;

use super::SynthEngine;
use crate::buffering::CHANNELS;
use crate::error::{Result, WavefeedError};

/// Continuous sine tone written identically to both channels.
///
/// Phase carries over between calls so consecutive batches join without a
/// discontinuity.
#[derive(Debug, Clone)]
pub struct SineEngine {
    frequency: f64,
    amplitude: f64,
    sample_rate: f64,
    phase: f64,
}

impl SineEngine {
    /// A4 at half scale.
    pub const DEFAULT_FREQUENCY: f64 = 440.0;
    pub const DEFAULT_AMPLITUDE: f64 = 0.5;

    pub fn new(frequency: f64, amplitude: f64) -> Self {
        Self {
            frequency,
            amplitude,
            sample_rate: 44_100.0,
            phase: 0.0,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }
}

impl Default for SineEngine {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FREQUENCY, Self::DEFAULT_AMPLITUDE)
    }
}

impl SynthEngine for SineEngine {
    fn configure(&mut self, sample_rate: u32) -> Result<()> {
        if sample_rate == 0 {
            return Err(WavefeedError::EngineInit(
                "sine engine needs a non-zero sample rate".into(),
            ));
        }
        if !(self.frequency > 0.0 && self.frequency < f64::from(sample_rate) / 2.0) {
            return Err(WavefeedError::EngineInit(format!(
                "frequency {} Hz is not below Nyquist for {} Hz",
                self.frequency, sample_rate
            )));
        }
        self.sample_rate = f64::from(sample_rate);
        info!(sample_rate, frequency = self.frequency, "sine engine configured");
        Ok(())
    }

    fn generate(&mut self, buffer: &mut [f32], frame_count: usize) {
        let increment = TAU * self.frequency / self.sample_rate;
        for frame in buffer.chunks_exact_mut(CHANNELS).take(frame_count) {
            let value = (self.amplitude * self.phase.sin()) as f32;
            frame.fill(value);
            self.phase += increment;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn both_channels_carry_the_same_sample() {
        let mut engine = SineEngine::default();
        engine.configure(48_000).expect("configure");
        let mut buf = vec![0.0f32; 64 * CHANNELS];
        engine.generate(&mut buf, 64);
        for frame in buf.chunks_exact(CHANNELS) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn peak_matches_amplitude() {
        let mut engine = SineEngine::new(1_000.0, 0.5);
        engine.configure(48_000).expect("configure");
        let mut buf = vec![0.0f32; 480 * CHANNELS];
        engine.generate(&mut buf, 480);
        let peak = buf.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert_abs_diff_eq!(peak, 0.5, epsilon = 1e-3);
    }

    #[test]
    fn phase_is_continuous_across_batches() {
        let mut split = SineEngine::new(440.0, 0.5);
        let mut whole = SineEngine::new(440.0, 0.5);
        split.configure(44_100).expect("configure");
        whole.configure(44_100).expect("configure");

        let mut a = vec![0.0f32; 100 * CHANNELS];
        let mut b = vec![0.0f32; 156 * CHANNELS];
        split.generate(&mut a, 100);
        split.generate(&mut b, 156);

        let mut full = vec![0.0f32; 256 * CHANNELS];
        whole.generate(&mut full, 256);

        a.extend_from_slice(&b);
        for (x, y) in a.iter().zip(&full) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-6);
        }
    }

    #[test]
    fn rejects_unusable_sample_rates() {
        assert!(matches!(
            SineEngine::default().configure(0),
            Err(WavefeedError::EngineInit(_))
        ));
        assert!(SineEngine::new(30_000.0, 0.5).configure(44_100).is_err());
    }
}
