//! Session status events broadcast to observers (host UI, logs, tests).

use serde::{Deserialize, Serialize};

/// Emitted whenever the session changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Lifecycle state of an audio session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, `start()` not yet called.
    Idle,
    /// Handshake sent; waiting for the producer's engine to report ready.
    Starting,
    /// Producer ready; audio is flowing.
    Running,
    /// Stopped by request; may be started again.
    Stopped,
    /// Engine failed to initialise; output stays silent.
    Error,
}
