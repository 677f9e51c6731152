//! Device driver abstraction for per-device progress queries
//!
//! This module handles:
//! - The driver trait consumed by the readiness monitor
//! - An ADB-backed driver reading the test application's progress counter
//! - Parsing of UI hierarchy dumps

pub mod adb;
pub mod ui_dump;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

pub use adb::{AdbConfig, AdbDriver};

/// Identifier of a device under test (its network address)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Evidence captured from a device that failed to show progress
#[derive(Debug, Clone, Default)]
pub struct DiagnosticCapture {
    /// Package owning the foreground window, if it could be determined
    pub foreground_app: Option<String>,
    /// Where the device log was saved, if it was
    pub log_path: Option<PathBuf>,
}

/// Driver for talking to devices under test
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Per-device session handle
    type Session: Send + Sync;

    /// Attempt to establish a session with a device
    async fn connect(&self, id: &DeviceId) -> Option<Self::Session>;

    /// Read the device's pass counter; `None` on any failure
    async fn query_progress(&self, session: &Self::Session) -> Option<u64>;

    /// Capture diagnostic evidence from a device
    async fn capture_diagnostic(&self, session: &Self::Session) -> Result<DiagnosticCapture>;

    /// Release a session that is no longer valid
    async fn release(&self, _session: Self::Session) {}

    /// Human-readable name for this driver
    fn name(&self) -> &'static str;
}
