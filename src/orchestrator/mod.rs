//! Power-cycle test orchestration
//!
//! This module handles:
//! - Probing host reachability and the per-cycle ping phase
//! - Optional multi-round reachability confirmation
//! - The cycle loop tying relay, readiness and alerts together

pub mod cycle;
pub mod ping;

pub use cycle::{CycleConfig, Orchestrator, Termination};
pub use ping::SystemPing;
