//! Topic addressing and message routing for MQTT device/controller fabrics.

pub mod config;
pub mod fabric;
pub mod mqtt;
