//! `AudioSession`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! AudioSession::new(config, engine)
//!     └─► start()        → ring allocated, Init queued, producer spawned,
//!         │                 status = Starting, returns the Consumer
//!         ├─► producer configures engine → Ready, status = Running
//!         │   (or engine refuses → status = Error, output stays silent)
//!         └─► stop()     → running=false, producer exits, status = Stopped
//! ```
//!
//! The returned [`Consumer`] is handed to whatever drives the real-time
//! callback (a cpal stream, an offline renderer, a test). The session never
//! touches it again.
//!
//! ## Threading
//!
//! The producer runs on `tokio::task::spawn_blocking` when a runtime is
//! available, otherwise on a dedicated named thread. Signals between the two
//! contexts travel over bounded crossbeam channels; the consumer side only
//! ever uses the non-blocking `try_*` calls.

pub mod consumer;
pub mod diagnostics;
pub mod producer;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

pub use consumer::Consumer;
pub use diagnostics::{DiagnosticsSnapshot, StreamDiagnostics};
pub use producer::{EngineSlot, Producer, ProducerContext};

use crate::{
    buffering::{create_shared_ring, RingIndices, SharedRing, DEFAULT_CAPACITY},
    error::{Result, WavefeedError},
    flow::FlowPolicy,
    ipc::{
        events::{SessionStatus, SessionStatusEvent},
        messages::{
            Handshake, ProducerMessage, StreamParams, DEFAULT_QUANTUM, DEFAULT_SAMPLE_RATE,
        },
    },
    synth::SynthEngine,
};

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 64;

/// Producer inbox: the handshake plus at most one outstanding request.
const PRODUCER_INBOX_CAP: usize = 4;

/// Consumer inbox: `Ready` plus at most one outstanding acknowledgement.
const CONSUMER_INBOX_CAP: usize = 4;

/// Configuration for `AudioSession`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Output sample rate (Hz). Default: 44100.
    pub sample_rate: u32,
    /// Ring capacity in frames, one slot reserved. Default: 8192.
    pub capacity: usize,
    /// Frames the host drains per callback. Default: 128.
    pub quantum: usize,
    /// Largest callback the consumer copies in one pass; larger callbacks are
    /// copied in several passes. Default: 4096.
    pub max_quantum: usize,
    pub policy: FlowPolicy,
    /// Fill the ring once as soon as the engine is configured. Default: true.
    pub prime: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            capacity: DEFAULT_CAPACITY,
            quantum: DEFAULT_QUANTUM,
            max_quantum: 4096,
            policy: FlowPolicy::default(),
            prime: true,
        }
    }
}

impl SessionConfig {
    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            sample_rate: self.sample_rate,
            capacity: self.capacity,
            quantum: self.quantum,
            policy: self.policy,
        }
    }
}

/// The top-level session handle.
///
/// `AudioSession` is `Send + Sync`; all fields use interior mutability.
pub struct AudioSession {
    config: SessionConfig,
    engine: EngineSlot,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<SessionStatus>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    diagnostics: Arc<StreamDiagnostics>,
    /// Ring of the current (or most recent) run, for fill-level queries.
    ring: Mutex<Option<Arc<SharedRing>>>,
}

impl AudioSession {
    pub fn new<E: SynthEngine>(config: SessionConfig, engine: E) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let engine: Box<dyn SynthEngine> = Box::new(engine);
        Self {
            config,
            engine: Arc::new(Mutex::new(Some(engine))),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            status_tx,
            diagnostics: Arc::new(StreamDiagnostics::default()),
            ring: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Allocate the ring, queue the handshake and spawn the producer.
    ///
    /// Returns immediately; the consumer plays silence until the producer
    /// reports ready. Use [`AudioSession::wait_ready`] to block on that.
    ///
    /// # Errors
    /// - `WavefeedError::AlreadyRunning` if started, or if the previous
    ///   producer has not yet handed the engine back.
    /// - `WavefeedError::InvalidConfig` for unusable stream parameters.
    pub fn start(&self) -> Result<Consumer> {
        if self.running.load(Ordering::SeqCst) {
            return Err(WavefeedError::AlreadyRunning);
        }

        let params = self.config.stream_params();
        let flow = params.validate()?;
        if self.config.max_quantum == 0 || self.config.max_quantum >= self.config.capacity {
            return Err(WavefeedError::InvalidConfig(format!(
                "max_quantum {} must be within 1..{}",
                self.config.max_quantum, self.config.capacity
            )));
        }

        let engine = self
            .engine
            .lock()
            .take()
            .ok_or(WavefeedError::AlreadyRunning)?;
        let ring = create_shared_ring(params.capacity)?;

        let (to_producer, producer_inbox) = bounded(PRODUCER_INBOX_CAP);
        let (producer_outbox, from_producer) = bounded(CONSUMER_INBOX_CAP);

        // The handshake is the first thing the producer sees.
        to_producer
            .try_send(ProducerMessage::Init(Handshake {
                params,
                ring: Arc::clone(&ring),
            }))
            .map_err(|e| WavefeedError::Other(anyhow::anyhow!("handshake not queued: {e}")))?;

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);
        self.set_status(SessionStatus::Starting, None);
        *self.ring.lock() = Some(Arc::clone(&ring));

        let ctx = ProducerContext {
            engine,
            engine_slot: Arc::clone(&self.engine),
            inbox: producer_inbox,
            outbox: producer_outbox,
            running: Arc::clone(&self.running),
            status: Arc::clone(&self.status),
            status_tx: self.status_tx.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
            prime: self.config.prime,
        };
        let job = move || producer::run(ctx);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => {
                if let Err(e) = std::thread::Builder::new()
                    .name("wavefeed-producer".into())
                    .spawn(job)
                {
                    self.running.store(false, Ordering::SeqCst);
                    self.set_status(SessionStatus::Error, Some(e.to_string()));
                    return Err(WavefeedError::Io(e));
                }
            }
        }

        info!(
            sample_rate = params.sample_rate,
            capacity = params.capacity,
            quantum = params.quantum,
            request_threshold = flow.request_threshold(),
            "session started"
        );

        Ok(Consumer::new(
            ring,
            flow,
            self.config.max_quantum,
            to_producer,
            from_producer,
            Arc::clone(&self.diagnostics),
        ))
    }

    /// Block until the producer reports ready, fails, or `timeout` elapses.
    ///
    /// From async code use [`AudioSession::ready`] instead.
    ///
    /// # Errors
    /// - `WavefeedError::EngineInit` if the engine refused its configuration.
    /// - `WavefeedError::ReadyTimeout` if neither happened in time.
    /// - `WavefeedError::NotRunning` if the session was never started.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if let Some(outcome) = readiness(self.status()) {
                return outcome;
            }
            if start.elapsed() >= timeout {
                return Err(ready_timeout(timeout));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Async form of [`AudioSession::wait_ready`]: waits on status events
    /// without parking a runtime worker.
    ///
    /// # Errors
    /// Same as [`AudioSession::wait_ready`].
    pub async fn ready(&self, timeout: Duration) -> Result<()> {
        // Subscribe before sampling so a transition in between is not missed.
        let mut rx = self.subscribe_status();
        let wait = async {
            let mut status = self.status();
            loop {
                if let Some(outcome) = readiness(status) {
                    return outcome;
                }
                status = match rx.recv().await {
                    Ok(event) => event.status,
                    Err(broadcast::error::RecvError::Lagged(_)) => self.status(),
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(WavefeedError::NotRunning)
                    }
                };
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ready_timeout(timeout))?
    }

    /// Ask the producer to exit. The consumer keeps playing silence until
    /// the host drops it.
    ///
    /// # Errors
    /// - `WavefeedError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(WavefeedError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        self.set_status(SessionStatus::Stopped, None);
        info!("session stop requested");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current session status (snapshot).
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of stream counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Index snapshot of the current ring, if the session has been started.
    pub fn buffer_level(&self) -> Option<RingIndices> {
        self.ring.lock().as_ref().map(|ring| ring.load_indices())
    }

    fn set_status(&self, new_status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(SessionStatusEvent {
            status: new_status,
            detail,
        });
    }
}

/// Terminal outcome of a readiness wait, or `None` while still starting.
fn readiness(status: SessionStatus) -> Option<Result<()>> {
    match status {
        SessionStatus::Running => Some(Ok(())),
        SessionStatus::Error => Some(Err(WavefeedError::EngineInit(
            "producer reported an initialisation failure".into(),
        ))),
        SessionStatus::Idle | SessionStatus::Stopped => Some(Err(WavefeedError::NotRunning)),
        SessionStatus::Starting => None,
    }
}

fn ready_timeout(timeout: Duration) -> WavefeedError {
    WavefeedError::ReadyTimeout {
        timeout_ms: timeout.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::SilenceEngine;

    #[test]
    fn default_config_matches_stream_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.stream_params(), StreamParams::default());
        assert!(config.prime);
    }

    #[test]
    fn config_fills_missing_fields_from_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"sample_rate":48000,"policy":{"kind":"fill_to_target","high_water_mark":6000}}"#)
                .expect("parse config");
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(
            config.policy,
            FlowPolicy::FillToTarget {
                high_water_mark: 6000
            }
        );
    }

    #[test]
    fn start_rejects_invalid_config_and_keeps_engine() {
        let session = AudioSession::new(
            SessionConfig {
                quantum: 0,
                ..SessionConfig::default()
            },
            SilenceEngine,
        );
        assert!(matches!(
            session.start(),
            Err(WavefeedError::InvalidConfig(_))
        ));
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.engine.lock().is_some());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ready_resolves_on_a_single_threaded_runtime() {
        // The producer shares this runtime's blocking pool; the wait must yield.
        let session = AudioSession::new(SessionConfig::default(), SilenceEngine);
        let _consumer = session.start().expect("start");
        session
            .ready(Duration::from_secs(2))
            .await
            .expect("producer ready");
        assert_eq!(session.status(), SessionStatus::Running);
        session.stop().expect("stop");
    }

    #[tokio::test]
    async fn ready_before_start_is_not_running() {
        let session = AudioSession::new(SessionConfig::default(), SilenceEngine);
        assert!(matches!(
            session.ready(Duration::from_millis(50)).await,
            Err(WavefeedError::NotRunning)
        ));
    }

    #[test]
    fn stop_without_start_is_an_error() {
        let session = AudioSession::new(SessionConfig::default(), SilenceEngine);
        assert!(matches!(session.stop(), Err(WavefeedError::NotRunning)));
        assert!(session.buffer_level().is_none());
    }
}
