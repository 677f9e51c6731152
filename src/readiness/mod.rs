//! Device readiness monitoring
//!
//! Watches the per-device pass counter after a power cycle and reports
//! whether every device resumed its test, plus a diagnosis hook used when
//! a run times out.

mod diagnosis;
mod monitor;

pub use monitor::{ReadinessConfig, ReadinessMonitor};
