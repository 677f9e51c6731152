//! Relay command/acknowledgment protocol
//!
//! This module handles:
//! - Publishing relay power commands over the transport
//! - Matching inbound acknowledgments against the outstanding command
//! - Bounded at-least-once retries and escalation to control loss

mod client;

pub use client::{RelayCommandClient, RelayConfig, RelayError};
