//! Sample-synthesis engine abstraction.
//!
//! The producer is the only caller. An engine is configured once with the
//! session sample rate and then asked repeatedly for batches of frames; how it
//! was loaded (native, plugin, scripted) is the host's business.

pub mod sine;

pub use sine::SineEngine;

use crate::error::Result;

/// Contract for audio generators driven by the producer.
pub trait SynthEngine: Send + 'static {
    /// Called once after the handshake, before any `generate`.
    ///
    /// # Errors
    /// An error leaves the session uninitialised: the producer never reports
    /// ready and the output stays silent.
    fn configure(&mut self, sample_rate: u32) -> Result<()>;

    /// Fill `buffer` with `frame_count` interleaved stereo frames
    /// (`buffer.len() == frame_count * 2`). The buffer must not be retained.
    fn generate(&mut self, buffer: &mut [f32], frame_count: usize);
}

impl<E: SynthEngine + ?Sized> SynthEngine for Box<E> {
    fn configure(&mut self, sample_rate: u32) -> Result<()> {
        (**self).configure(sample_rate)
    }

    fn generate(&mut self, buffer: &mut [f32], frame_count: usize) {
        (**self).generate(buffer, frame_count)
    }
}

/// Writes zeros. Useful as a placeholder engine and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilenceEngine;

impl SynthEngine for SilenceEngine {
    fn configure(&mut self, _sample_rate: u32) -> Result<()> {
        Ok(())
    }

    fn generate(&mut self, buffer: &mut [f32], _frame_count: usize) {
        buffer.fill(0.0);
    }
}
