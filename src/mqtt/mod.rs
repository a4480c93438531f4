//! # MQTT Transport
//!
//! Connects the fabric core to a live broker through rumqttc. The core stays
//! transport-agnostic; this module owns the client, the event loop and the
//! connection lifecycle.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings and client id generation
//! ├── message_manager.rs  - Inbound and outbound message representation
//! └── mqtt_handler.rs     - FabricNode state machine and FabricPublisher
//! ```
//!
//! Inbound publishes are handed to the [`crate::fabric::Dispatcher`] one at a
//! time from the event loop task. Status and last-will messages always use
//! QoS 2 with the retain flag set.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::MqttConfig;
pub use message_manager::{InboundMessage, OutboundMessage};
pub use mqtt_handler::{ConnectionState, FabricNode, FabricPublisher, MqttError, MqttStatus};
