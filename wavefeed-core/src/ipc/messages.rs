//! Handshake, demand and completion signals.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    buffering::{SharedRing, DEFAULT_CAPACITY},
    error::{Result, WavefeedError},
    flow::{FlowController, FlowPolicy},
};

/// Render quantum used by Web Audio style hosts (frames per callback).
pub const DEFAULT_QUANTUM: usize = 128;

/// Default stream rate when the host does not dictate one.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Stream parameters agreed once at handshake time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamParams {
    /// Output sample rate (Hz), forwarded to the synth engine.
    pub sample_rate: u32,
    /// Ring capacity in frames, including the reserved slot.
    pub capacity: usize,
    /// Frames drained per consumer callback.
    pub quantum: usize,
    pub policy: FlowPolicy,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            capacity: DEFAULT_CAPACITY,
            quantum: DEFAULT_QUANTUM,
            policy: FlowPolicy::default(),
        }
    }
}

impl StreamParams {
    /// Check the parameters and resolve the flow controller both sides share.
    pub fn validate(&self) -> Result<FlowController> {
        if self.sample_rate == 0 {
            return Err(WavefeedError::InvalidConfig(
                "sample rate must be non-zero".into(),
            ));
        }
        if self.capacity < 2 {
            return Err(WavefeedError::InvalidConfig(format!(
                "ring capacity must be at least 2 frames, got {}",
                self.capacity
            )));
        }
        if self.quantum == 0 || self.quantum >= self.capacity {
            return Err(WavefeedError::InvalidConfig(format!(
                "quantum {} must be within 1..{}",
                self.quantum, self.capacity
            )));
        }
        FlowController::new(self.policy, self.quantum, self.capacity)
    }
}

/// One-time setup delivered to the producer before any audio flows.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub params: StreamParams,
    /// The ring both sides share for the rest of the session.
    pub ring: Arc<SharedRing>,
}

/// Messages the producer receives.
#[derive(Debug, Clone)]
pub enum ProducerMessage {
    Init(Handshake),
    /// Demand signal: evaluate the flow policy now.
    RequestData,
}

impl ProducerMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            ProducerMessage::Init(_) => "init",
            ProducerMessage::RequestData => "request_data",
        }
    }
}

/// Messages the consumer receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsumerMessage {
    /// Engine configured; audio may be requested.
    Ready,
    /// The outstanding request has been handled.
    DataProduced,
}

/// Serialized form of every signal, for hosts that bridge the two contexts
/// through a text channel.
///
/// The ring never crosses the bridge; each side attaches its own handle.
///
/// ```
/// use wavefeed_core::buffering::create_shared_ring;
/// use wavefeed_core::ipc::messages::{
///     decode_consumer_message, decode_producer_message, ConsumerMessage, ProducerMessage,
///     Signal, StreamParams,
/// };
///
/// let params = StreamParams::default();
/// let line = Signal::Init(params).encode();
///
/// let ring = create_shared_ring(params.capacity)?;
/// match decode_producer_message(&line, &ring) {
///     Some(ProducerMessage::Init(handshake)) => assert_eq!(handshake.params, params),
///     other => panic!("expected init, got {other:?}"),
/// }
///
/// let reply = Signal::from(ConsumerMessage::Ready).encode();
/// assert_eq!(reply, r#"{"type":"ready"}"#);
/// assert_eq!(decode_consumer_message(&reply), Some(ConsumerMessage::Ready));
/// assert_eq!(decode_consumer_message(r#"{"type":"request_data"}"#), None);
/// # Ok::<(), wavefeed_core::WavefeedError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    Init(StreamParams),
    RequestData,
    Ready,
    DataProduced,
}

impl Signal {
    /// Parse a signal; unknown tags and malformed payloads yield `None`.
    pub fn decode(raw: &str) -> Option<Signal> {
        match serde_json::from_str::<Signal>(raw) {
            Ok(signal) => Some(signal),
            Err(e) => {
                debug!(error = %e, "ignoring unrecognised signal");
                None
            }
        }
    }

    pub fn encode(&self) -> String {
        // Every variant is plain data, so serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Producer-bound form. `Init` needs the shared ring, which never travels
    /// over the wire; the receiving side attaches its own handle.
    pub fn into_producer_message(self, ring: &Arc<SharedRing>) -> Option<ProducerMessage> {
        match self {
            Signal::Init(params) => Some(ProducerMessage::Init(Handshake {
                params,
                ring: Arc::clone(ring),
            })),
            Signal::RequestData => Some(ProducerMessage::RequestData),
            Signal::Ready | Signal::DataProduced => None,
        }
    }

    pub fn into_consumer_message(self) -> Option<ConsumerMessage> {
        match self {
            Signal::Ready => Some(ConsumerMessage::Ready),
            Signal::DataProduced => Some(ConsumerMessage::DataProduced),
            Signal::Init(_) | Signal::RequestData => None,
        }
    }
}

/// Decode a producer-bound signal, attaching `ring` to an `init`.
/// Unknown tags and signals meant for the consumer yield `None`.
pub fn decode_producer_message(raw: &str, ring: &Arc<SharedRing>) -> Option<ProducerMessage> {
    Signal::decode(raw)?.into_producer_message(ring)
}

/// Decode a consumer-bound signal.
pub fn decode_consumer_message(raw: &str) -> Option<ConsumerMessage> {
    Signal::decode(raw)?.into_consumer_message()
}

impl From<ConsumerMessage> for Signal {
    fn from(msg: ConsumerMessage) -> Self {
        match msg {
            ConsumerMessage::Ready => Signal::Ready,
            ConsumerMessage::DataProduced => Signal::DataProduced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::create_shared_ring;

    #[test]
    fn default_params_are_valid() {
        let flow = StreamParams::default().validate().expect("valid defaults");
        assert_eq!(flow.request_threshold(), 4 * DEFAULT_QUANTUM);
    }

    #[test]
    fn rejects_quantum_that_cannot_fit() {
        let params = StreamParams {
            capacity: 128,
            quantum: 128,
            ..StreamParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(WavefeedError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_zero_sample_rate() {
        let params = StreamParams {
            sample_rate: 0,
            ..StreamParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn signals_use_wire_tags() {
        assert_eq!(Signal::RequestData.encode(), r#"{"type":"request_data"}"#);
        assert_eq!(Signal::DataProduced.encode(), r#"{"type":"data_produced"}"#);
        assert_eq!(
            Signal::from(ConsumerMessage::Ready).encode(),
            r#"{"type":"ready"}"#
        );
    }

    #[test]
    fn init_carries_stream_params_inline() {
        let raw = r#"{"type":"init","sample_rate":48000,"capacity":4096,"quantum":128,
                      "policy":{"kind":"fill_to_target","high_water_mark":3072}}"#;
        let signal = Signal::decode(raw).expect("decode init");
        let ring = create_shared_ring(4096).expect("ring");
        match signal.into_producer_message(&ring) {
            Some(ProducerMessage::Init(handshake)) => {
                assert_eq!(handshake.params.sample_rate, 48_000);
                assert_eq!(handshake.params.quantum, 128);
                assert_eq!(
                    handshake.params.policy,
                    FlowPolicy::FillToTarget {
                        high_water_mark: 3072
                    }
                );
                assert!(Arc::ptr_eq(&handshake.ring, &ring));
            }
            other => panic!("expected init, got {other:?}"),
        }
    }

    #[test]
    fn unknown_and_malformed_signals_are_ignored() {
        assert_eq!(Signal::decode(r#"{"type":"reboot"}"#), None);
        assert_eq!(Signal::decode(r#"{"kind":"ready"}"#), None);
        assert_eq!(Signal::decode("not json"), None);
    }

    #[test]
    fn decode_helpers_filter_by_direction() {
        let ring = create_shared_ring(8).expect("ring");
        assert!(matches!(
            decode_producer_message(r#"{"type":"request_data"}"#, &ring),
            Some(ProducerMessage::RequestData)
        ));
        assert!(decode_producer_message(r#"{"type":"ready"}"#, &ring).is_none());
        assert_eq!(
            decode_consumer_message(r#"{"type":"data_produced"}"#),
            Some(ConsumerMessage::DataProduced)
        );
        assert_eq!(decode_consumer_message(r#"{"type":"shutdown"}"#), None);
    }

    #[test]
    fn signals_route_only_to_their_receiver() {
        let ring = create_shared_ring(8).expect("ring");
        assert!(Signal::Ready.into_producer_message(&ring).is_none());
        assert!(Signal::RequestData.into_consumer_message().is_none());
        assert_eq!(
            Signal::DataProduced.into_consumer_message(),
            Some(ConsumerMessage::DataProduced)
        );
        assert!(matches!(
            Signal::RequestData.into_producer_message(&ring),
            Some(ProducerMessage::RequestData)
        ));
    }
}
