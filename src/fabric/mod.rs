//! # Fabric Core
//!
//! Topic addressing and inbound routing for a fleet of MQTT nodes. Devices
//! publish data on their *onramp* and receive tasks on their *offramp*;
//! controllers do the opposite. All routing metadata is encoded in the topic,
//! so the broker needs no schema.
//!
//! ```text
//! fabric/
//! ├── identity.rs    - NodeIdentity and Role
//! ├── topic.rs       - topic builders and the topic parser
//! ├── status.rs      - online/offline/disconnected status messages
//! ├── envelope.rs    - {"d": {...}} value envelope codec
//! ├── dispatcher.rs  - role-aware routing of inbound messages
//! └── error.rs       - FabricError
//! ```
//!
//! Everything in here is synchronous and performs no I/O. Status messages are
//! built as [`crate::mqtt::OutboundMessage`] values carrying rumqttc's `QoS`,
//! so the transport can queue them as they are; the [`crate::mqtt`] module
//! drives the rest from a live broker connection.

pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod status;
pub mod topic;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use envelope::{parse_envelope, EnvelopeError, FeedValue, ValueEnvelope};
pub use error::FabricError;
pub use identity::{IdentityError, NodeIdentity, Role};
pub use status::{build_status_message, parse_status_message, FabricStatus, StatusReport};
pub use topic::{
    parse_topic, CommandRoute, OfframpRoute, OnrampRoute, TopicParseError, TopicPath,
};
