//! Watermark policy deciding *when* the consumer asks for audio and *how much*
//! the producer generates per request.
//!
//! Exactly one [`FlowPolicy`] is active per session; both sides derive their
//! half of the decision from the same [`FlowController`] built at handshake.
//!
//! | Policy | Consumer requests when | Producer generates |
//! |--------|------------------------|--------------------|
//! | `LowWater` | `available_to_read < max(quantum, callback) * quanta` | `min(available_to_write, batch_max)` |
//! | `FillToTarget` | `available_to_read < high_water_mark` | `min(high_water_mark - available_to_read, available_to_write)` |
//!
//! Hosts do not always honour the configured quantum, so the consumer passes
//! the size of the callback it is serving. A callback that cannot be satisfied
//! always raises demand.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WavefeedError};

/// Low-water-mark multiplier: request when fewer than this many quanta remain.
pub const DEFAULT_LOW_WATER_QUANTA: usize = 4;

/// Largest batch the on-demand producer generates per request.
pub const DEFAULT_BATCH_MAX: usize = 2048;

/// Fill-to-target level as a fraction of ring capacity.
pub const DEFAULT_HIGH_WATER_FRACTION: f64 = 0.75;

/// Flow-control policy, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowPolicy {
    /// On-demand: refill in batches of up to `batch_max` frames whenever fewer
    /// than `quanta` quanta are buffered.
    LowWater { quanta: usize, batch_max: usize },
    /// Top the buffer back up to `high_water_mark` frames on every request.
    FillToTarget { high_water_mark: usize },
}

impl Default for FlowPolicy {
    fn default() -> Self {
        FlowPolicy::LowWater {
            quanta: DEFAULT_LOW_WATER_QUANTA,
            batch_max: DEFAULT_BATCH_MAX,
        }
    }
}

impl FlowPolicy {
    /// Fill-to-target policy at [`DEFAULT_HIGH_WATER_FRACTION`] of `capacity`.
    pub fn fill_to_target_for(capacity: usize) -> Self {
        let high_water_mark = ((capacity as f64) * DEFAULT_HIGH_WATER_FRACTION) as usize;
        FlowPolicy::FillToTarget {
            high_water_mark: high_water_mark.clamp(1, capacity.saturating_sub(1).max(1)),
        }
    }
}

/// Policy resolved against the session's quantum and ring capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowController {
    policy: FlowPolicy,
    quantum: usize,
    /// Frame level below which the consumer asks for more, at the configured
    /// quantum.
    request_threshold: usize,
}

impl FlowController {
    /// Resolve `policy` for a ring of `capacity` frames drained `quantum`
    /// frames at a time.
    ///
    /// # Errors
    /// `WavefeedError::InvalidConfig` when the policy cannot be satisfied by the
    /// ring (zero batch ceiling, zero multiplier, or a high-water-mark outside
    /// `1..capacity`).
    pub fn new(policy: FlowPolicy, quantum: usize, capacity: usize) -> Result<Self> {
        let request_threshold = match policy {
            FlowPolicy::LowWater { quanta, batch_max } => {
                if quanta == 0 {
                    return Err(WavefeedError::InvalidConfig(
                        "low-water multiplier must be at least 1".into(),
                    ));
                }
                if batch_max == 0 {
                    return Err(WavefeedError::InvalidConfig(
                        "batch ceiling must be at least 1 frame".into(),
                    ));
                }
                quantum.saturating_mul(quanta)
            }
            FlowPolicy::FillToTarget { high_water_mark } => {
                if high_water_mark == 0 || high_water_mark >= capacity {
                    return Err(WavefeedError::InvalidConfig(format!(
                        "high-water-mark {high_water_mark} must be within 1..{capacity}"
                    )));
                }
                high_water_mark
            }
        };

        Ok(Self {
            policy,
            quantum,
            request_threshold,
        })
    }

    pub fn policy(&self) -> FlowPolicy {
        self.policy
    }

    pub fn quantum(&self) -> usize {
        self.quantum
    }

    pub fn request_threshold(&self) -> usize {
        self.request_threshold
    }

    /// Threshold for a callback of `callback_frames`. The low-water mark
    /// scales with the larger of the configured quantum and the callback.
    pub fn request_threshold_for(&self, callback_frames: usize) -> usize {
        match self.policy {
            FlowPolicy::LowWater { quanta, .. } => {
                self.quantum.max(callback_frames).saturating_mul(quanta)
            }
            FlowPolicy::FillToTarget { .. } => self.request_threshold,
        }
    }

    /// Consumer predicate at the configured quantum, evaluated on the
    /// post-read fill level.
    #[inline]
    pub fn should_request(&self, available_to_read: usize) -> bool {
        self.should_request_for(available_to_read, self.quantum)
    }

    /// Consumer predicate for the callback actually being served.
    #[inline]
    pub fn should_request_for(&self, available_to_read: usize, callback_frames: usize) -> bool {
        available_to_read < callback_frames
            || available_to_read < self.request_threshold_for(callback_frames)
    }

    /// Producer sizing. Never exceeds `available_to_write`, so a write sized by
    /// this value can not overrun unread data.
    pub fn frames_to_generate(&self, available_to_read: usize, available_to_write: usize) -> usize {
        let wanted = match self.policy {
            FlowPolicy::LowWater { batch_max, .. } => batch_max,
            FlowPolicy::FillToTarget { high_water_mark } => {
                high_water_mark.saturating_sub(available_to_read)
            }
        };
        wanted.min(available_to_write)
    }
}

/// Consumer-local debounce: at most one demand signal outstanding.
#[derive(Debug, Default)]
pub struct RequestGate {
    pending: bool,
}

impl RequestGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a request may be sent now, marking it pending.
    #[inline]
    pub fn try_arm(&mut self) -> bool {
        if self.pending {
            return false;
        }
        self.pending = true;
        true
    }

    /// Undo a `try_arm` whose signal could not be delivered.
    #[inline]
    pub fn disarm(&mut self) {
        self.pending = false;
    }

    /// Producer acknowledged the outstanding request.
    #[inline]
    pub fn clear(&mut self) {
        self.pending = false;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}
