//! # wavefeed-core
//!
//! Lock-free streaming of generated audio into a real-time output callback.
//!
//! ## Architecture
//!
//! ```text
//! SynthEngine::generate ─► Producer(spawn_blocking) ─► SharedRing ─► Consumer ─► device callback
//!                              ▲                                        │
//!                              └──────── request_data / data_produced ──┘
//!                                           (crossbeam, try_send)
//! ```
//!
//! The consumer callback is zero-alloc and never blocks. All generation and
//! heap work happens on the producer thread; the flow policy decides when to
//! ask for more and how much to generate.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod error;
pub mod flow;
pub mod ipc;
pub mod session;
pub mod synth;

// Convenience re-exports for downstream crates
pub use buffering::{RingIndices, SharedRing};
pub use error::{Result, WavefeedError};
pub use flow::{FlowController, FlowPolicy, RequestGate};
pub use ipc::events::{SessionStatus, SessionStatusEvent};
pub use ipc::messages::{ConsumerMessage, ProducerMessage, Signal, StreamParams};
pub use session::{AudioSession, Consumer, DiagnosticsSnapshot, SessionConfig};
pub use synth::{SilenceEngine, SineEngine, SynthEngine};

pub use audio::{AudioOutput, OutputDevice};
