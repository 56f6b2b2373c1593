//! Messages exchanged between the consumer and producer contexts, and the
//! session status events broadcast to observers.
//!
//! In-process the two sides talk through [`messages::ProducerMessage`] and
//! [`messages::ConsumerMessage`] over bounded crossbeam channels. When a host
//! has to carry signals across a serialized boundary it uses
//! [`messages::Signal`], whose `type` tags match the wire names
//! (`init`, `request_data`, `ready`, `data_produced`).

pub mod events;
pub mod messages;
