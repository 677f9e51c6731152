//! Power-Cycle Rig Shared Protocol Types
//!
//! This crate provides the relay wire payloads, their JSON codec and the
//! readiness phase state machine shared by the rig controller and the relay
//! emulator.

pub mod codec;
pub mod protocol;
pub mod state_machine;

pub use protocol::{AckMessage, CommandMessage, RelayTarget};

/// Relay command protocol parameters
pub mod relay {
    /// `type` tag carried by outbound relay commands
    pub const COMMAND_TYPE: &str = "event";

    /// `type` tag carried by acknowledgments from the Socket-mini-v2 relay
    pub const ACK_TYPE: &str = "Socket-mini-v2";

    /// Per-attempt confirmation window in milliseconds
    pub const ACK_WINDOW_MS: u64 = 5000;

    /// Publish attempts before control of the relay is considered lost
    pub const MAX_ATTEMPTS: u32 = 5;
}

/// Broker reconnect parameters
pub mod reconnect {
    /// First delay before a reconnect attempt, in seconds
    pub const INITIAL_DELAY_SECS: u64 = 1;

    /// Multiplier applied to the delay after each failed attempt
    pub const RATE: u32 = 2;

    /// Upper bound on the delay between attempts, in seconds
    pub const MAX_DELAY_SECS: u64 = 60;

    /// Attempts before the session gives up and raises its exit flag
    pub const MAX_ATTEMPTS: u32 = 12;
}
