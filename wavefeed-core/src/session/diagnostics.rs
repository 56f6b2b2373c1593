//! Lock-free stream counters.
//!
//! Each counter has exactly one writing side (noted per field); both sides and
//! the host may read. Updates are `Relaxed` `fetch_add`s, which are safe on the
//! real-time path.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct StreamDiagnostics {
    /// Consumer: callbacks handled.
    pub quanta_processed: AtomicUsize,
    /// Consumer: frames delivered from the ring.
    pub frames_played: AtomicUsize,
    /// Consumer: callbacks that found fewer frames than requested.
    pub underruns: AtomicUsize,
    /// Consumer: callbacks answered with silence before the producer was ready.
    pub silent_before_ready: AtomicUsize,
    /// Consumer: demand signals delivered.
    pub requests_sent: AtomicUsize,
    /// Consumer: demand suppressed because one was already pending.
    pub requests_coalesced: AtomicUsize,
    /// Consumer: demand that could not be queued (inbox full or producer gone).
    pub requests_dropped: AtomicUsize,
    /// Consumer: completion signals received.
    pub acks_received: AtomicUsize,
    /// Producer: batches written into the ring.
    pub batches_generated: AtomicUsize,
    /// Producer: frames written into the ring.
    pub frames_generated: AtomicUsize,
    /// Producer: requests that needed no generation.
    pub empty_batches: AtomicUsize,
    /// Producer: completion signals sent.
    pub acks_sent: AtomicUsize,
    /// Producer: out-of-protocol messages ignored.
    pub malformed_signals: AtomicUsize,
}

impl StreamDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            quanta_processed: self.quanta_processed.load(Ordering::Relaxed),
            frames_played: self.frames_played.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            silent_before_ready: self.silent_before_ready.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_coalesced: self.requests_coalesced.load(Ordering::Relaxed),
            requests_dropped: self.requests_dropped.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            batches_generated: self.batches_generated.load(Ordering::Relaxed),
            frames_generated: self.frames_generated.load(Ordering::Relaxed),
            empty_batches: self.empty_batches.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            malformed_signals: self.malformed_signals.load(Ordering::Relaxed),
        }
    }

    fn counters(&self) -> [&AtomicUsize; 13] {
        [
            &self.quanta_processed,
            &self.frames_played,
            &self.underruns,
            &self.silent_before_ready,
            &self.requests_sent,
            &self.requests_coalesced,
            &self.requests_dropped,
            &self.acks_received,
            &self.batches_generated,
            &self.frames_generated,
            &self.empty_batches,
            &self.acks_sent,
            &self.malformed_signals,
        ]
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicUsize, by: usize) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub quanta_processed: usize,
    pub frames_played: usize,
    pub underruns: usize,
    pub silent_before_ready: usize,
    pub requests_sent: usize,
    pub requests_coalesced: usize,
    pub requests_dropped: usize,
    pub acks_received: usize,
    pub batches_generated: usize,
    pub frames_generated: usize,
    pub empty_batches: usize,
    pub acks_sent: usize,
    pub malformed_signals: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_every_counter() {
        let diag = StreamDiagnostics::default();
        for counter in diag.counters() {
            StreamDiagnostics::bump(counter, 3);
        }
        assert_eq!(diag.snapshot().malformed_signals, 3);
        assert_eq!(diag.snapshot().quanta_processed, 3);

        diag.reset();
        assert_eq!(diag.snapshot(), DiagnosticsSnapshot::default());
    }
}
