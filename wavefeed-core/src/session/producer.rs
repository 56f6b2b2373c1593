//! Background generation loop.
//!
//! ## Per-message handling
//!
//! ```text
//! Init(handshake)  → validate params → engine.configure(rate) → [prime] → Ready
//! RequestData      → frames = policy(available_to_read, available_to_write)
//!                    frames > 0: scratch = vec![0; frames * 2]
//!                                engine.generate(scratch) → ring.write → publish write_index
//!                    always:     DataProduced (exactly one per request)
//! ```
//!
//! The loop runs in `spawn_blocking` (or a plain thread when no Tokio runtime
//! is present) and never touches the real-time thread. A batch in progress
//! always runs to completion.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::diagnostics::StreamDiagnostics;
use crate::{
    buffering::{SharedRing, CHANNELS},
    error::{Result, WavefeedError},
    flow::FlowController,
    ipc::{
        events::{SessionStatus, SessionStatusEvent},
        messages::{ConsumerMessage, Handshake, ProducerMessage},
    },
    synth::SynthEngine,
};

/// How often the loop re-checks `running` while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Engine slot shared with the session so the engine survives a restart.
pub type EngineSlot = Arc<Mutex<Option<Box<dyn SynthEngine>>>>;

/// Everything the producer loop needs, passed as one struct.
pub struct ProducerContext {
    pub engine: Box<dyn SynthEngine>,
    /// The engine is parked here when the loop exits.
    pub engine_slot: EngineSlot,
    pub inbox: Receiver<ProducerMessage>,
    pub outbox: Sender<ConsumerMessage>,
    pub running: Arc<AtomicBool>,
    pub status: Arc<Mutex<SessionStatus>>,
    pub status_tx: broadcast::Sender<SessionStatusEvent>,
    pub diagnostics: Arc<StreamDiagnostics>,
    /// Fill the ring once right after the engine is configured.
    pub prime: bool,
}

/// Stream state established by the handshake.
struct ActiveStream {
    ring: Arc<SharedRing>,
    flow: FlowController,
}

/// Producer state machine, independent of how messages are delivered.
pub struct Producer {
    engine: Box<dyn SynthEngine>,
    stream: Option<ActiveStream>,
    /// Set when the engine refused its configuration.
    init_failed: bool,
    prime: bool,
    diagnostics: Arc<StreamDiagnostics>,
}

impl Producer {
    pub fn new(
        engine: Box<dyn SynthEngine>,
        diagnostics: Arc<StreamDiagnostics>,
        prime: bool,
    ) -> Self {
        Self {
            engine,
            stream: None,
            init_failed: false,
            prime,
            diagnostics,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.stream.is_some()
    }

    pub fn into_engine(self) -> Box<dyn SynthEngine> {
        self.engine
    }

    /// Handle one message and return the reply for the consumer, if any.
    ///
    /// `RequestData` is always answered with `DataProduced`, even before init
    /// or after a failed init, so the consumer's pending flag is never stuck.
    ///
    /// # Errors
    /// Returns the initialisation failure for `Init`; the producer then stays
    /// uninitialised and never replies `Ready`.
    pub fn handle(&mut self, msg: ProducerMessage) -> Result<Option<ConsumerMessage>> {
        match msg {
            ProducerMessage::Init(handshake) => self.init(handshake).map(|fresh| {
                // A repeated handshake neither primes again nor re-announces.
                if !fresh {
                    return None;
                }
                if self.prime {
                    self.generate_batch();
                }
                Some(ConsumerMessage::Ready)
            }),
            ProducerMessage::RequestData => {
                if self.stream.is_some() {
                    self.generate_batch();
                } else {
                    StreamDiagnostics::bump(&self.diagnostics.malformed_signals, 1);
                    debug!(
                        init_failed = self.init_failed,
                        "request_data before a successful init, acknowledging without audio"
                    );
                }
                StreamDiagnostics::bump(&self.diagnostics.acks_sent, 1);
                Ok(Some(ConsumerMessage::DataProduced))
            }
        }
    }

    /// Returns `false` when a stream is already configured and the handshake
    /// was ignored.
    fn init(&mut self, handshake: Handshake) -> Result<bool> {
        if self.stream.is_some() {
            StreamDiagnostics::bump(&self.diagnostics.malformed_signals, 1);
            warn!("duplicate init ignored");
            return Ok(false);
        }

        let Handshake { params, ring } = handshake;
        let result = params.validate().and_then(|flow| {
            if ring.capacity() != params.capacity {
                return Err(WavefeedError::InvalidConfig(format!(
                    "handshake capacity {} does not match shared ring capacity {}",
                    params.capacity,
                    ring.capacity()
                )));
            }
            self.engine.configure(params.sample_rate)?;
            Ok(flow)
        });

        match result {
            Ok(flow) => {
                info!(
                    sample_rate = params.sample_rate,
                    capacity = params.capacity,
                    quantum = params.quantum,
                    policy = ?params.policy,
                    "producer initialised"
                );
                self.stream = Some(ActiveStream { ring, flow });
                Ok(true)
            }
            Err(e) => {
                self.init_failed = true;
                error!(error = %e, "producer initialisation failed, output stays silent");
                Err(e)
            }
        }
    }

    /// Generate per the flow policy and publish. Returns frames written.
    pub fn generate_batch(&mut self) -> usize {
        let Some(stream) = self.stream.as_ref() else {
            return 0;
        };

        let indices = stream.ring.load_indices();
        let frames = stream
            .flow
            .frames_to_generate(indices.available_to_read(), indices.available_to_write());
        if frames == 0 {
            StreamDiagnostics::bump(&self.diagnostics.empty_batches, 1);
            return 0;
        }

        // Batch-scoped scratch; released before the next message is handled.
        let mut scratch = vec![0.0f32; frames * CHANNELS];
        self.engine.generate(&mut scratch, frames);

        let Some(next) = stream.ring.write(indices.write, &scratch) else {
            error!(
                frames,
                write_index = indices.write,
                "ring rejected a clamped batch"
            );
            return 0;
        };
        stream.ring.publish_write_index(next);

        StreamDiagnostics::bump(&self.diagnostics.batches_generated, 1);
        StreamDiagnostics::bump(&self.diagnostics.frames_generated, frames);
        debug!(frames, write_index = next, "batch published");
        frames
    }
}

/// Run the producer until `ctx.running` clears or every sender is dropped.
pub fn run(ctx: ProducerContext) {
    info!("producer started");

    let ProducerContext {
        engine,
        engine_slot,
        inbox,
        outbox,
        running,
        status,
        status_tx,
        diagnostics,
        prime,
    } = ctx;
    let mut producer = Producer::new(engine, Arc::clone(&diagnostics), prime);

    while running.load(Ordering::Relaxed) {
        let msg = match inbox.recv_timeout(POLL_INTERVAL) {
            Ok(msg) => msg,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("consumer hung up");
                break;
            }
        };

        let tag = msg.tag();
        let reply = match producer.handle(msg) {
            Ok(reply) => reply,
            Err(e) => {
                set_status(&status, &status_tx, SessionStatus::Error, Some(e.to_string()));
                None
            }
        };

        let Some(reply) = reply else { continue };
        if reply == ConsumerMessage::Ready {
            set_status(&status, &status_tx, SessionStatus::Running, None);
        }
        match outbox.try_send(reply) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(tag, "consumer inbox full, reply dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("consumer gone, stopping producer");
                break;
            }
        }
    }

    let snap = diagnostics.snapshot();
    info!(
        batches_generated = snap.batches_generated,
        frames_generated = snap.frames_generated,
        empty_batches = snap.empty_batches,
        acks_sent = snap.acks_sent,
        malformed_signals = snap.malformed_signals,
        underruns = snap.underruns,
        frames_played = snap.frames_played,
        "producer stopped"
    );

    *engine_slot.lock() = Some(producer.into_engine());
}

fn set_status(
    status: &Mutex<SessionStatus>,
    status_tx: &broadcast::Sender<SessionStatusEvent>,
    new_status: SessionStatus,
    detail: Option<String>,
) {
    *status.lock() = new_status;
    let _ = status_tx.send(SessionStatusEvent {
        status: new_status,
        detail,
    });
}
