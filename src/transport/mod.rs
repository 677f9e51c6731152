//! Publish/subscribe transport for relay control
//!
//! This module handles:
//! - The transport capability trait the relay client holds
//! - An MQTT session with automatic reconnection and exponential backoff
//! - Delivery of inbound messages to a registered handler

mod backoff;
pub mod mqtt;
pub mod traits;

pub use mqtt::{MqttConfig, MqttTransport};
pub use traits::{PubSubTransport, TransportError};
