//! ADB device driver
//!
//! Talks to network-attached Android devices through the `adb` binary.
//! Progress is read from the test application's UI by dumping the view
//! hierarchy and locating the pass counter by its resource id.

use super::ui_dump;
use super::{DeviceDriver, DeviceId, DiagnosticCapture};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Configuration for the ADB driver
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdbConfig {
    /// Path to the adb binary
    pub adb_path: String,
    /// Resource id of the view showing the pass counter
    pub progress_resource_id: String,
    /// Where the UI dump is written on the device
    pub device_dump_path: String,
    /// Directory for saved device logs
    pub log_dir: PathBuf,
    /// Timeout for a single adb invocation, in seconds
    pub command_timeout_secs: u64,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".into(),
            progress_resource_id: "com.sdmc.facTest:id/thread_num".into(),
            device_dump_path: "/sdcard/window_dump.xml".into(),
            log_dir: PathBuf::from("./log"),
            command_timeout_secs: 20,
        }
    }
}

/// An `adb connect`ed device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbSession {
    pub id: DeviceId,
}

impl AdbSession {
    fn serial(&self) -> &str {
        self.id.as_str()
    }
}

/// Device driver backed by the adb command-line tool
pub struct AdbDriver {
    config: AdbConfig,
}

impl AdbDriver {
    /// Create a new ADB driver
    pub fn new(config: AdbConfig) -> Self {
        Self { config }
    }

    /// Run adb with the given arguments and collect its output
    async fn adb(&self, args: &[&str]) -> Result<Output> {
        let mut command = Command::new(&self.config.adb_path);
        command.args(args).kill_on_drop(true);

        let limit = Duration::from_secs(self.config.command_timeout_secs);
        timeout(limit, command.output())
            .await
            .map_err(|_| anyhow!("adb {} timed out after {:?}", args.join(" "), limit))?
            .with_context(|| format!("failed to run {}", self.config.adb_path))
    }

    /// Dump the UI hierarchy of a device
    async fn dump_hierarchy(&self, session: &AdbSession) -> Result<String> {
        let dump_path = self.config.device_dump_path.as_str();
        let output = self
            .adb(&["-s", session.serial(), "shell", "uiautomator", "dump", dump_path])
            .await?;
        if !output.status.success() {
            return Err(anyhow!(
                "uiautomator dump failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let output = self
            .adb(&["-s", session.serial(), "exec-out", "cat", dump_path])
            .await?;
        if !output.status.success() {
            return Err(anyhow!("reading UI dump failed"));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Save the device log buffer to the log directory
    async fn save_logcat(&self, session: &AdbSession) -> Result<PathBuf> {
        let output = self.adb(&["-s", session.serial(), "logcat", "-d"]).await?;

        tokio::fs::create_dir_all(&self.config.log_dir)
            .await
            .with_context(|| format!("creating {}", self.config.log_dir.display()))?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let file_name = format!(
            "{}_{}_logcat.txt",
            timestamp,
            session.serial().replace(':', "_")
        );
        let path = self.config.log_dir.join(file_name);
        tokio::fs::write(&path, &output.stdout)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

#[async_trait]
impl DeviceDriver for AdbDriver {
    type Session = AdbSession;

    async fn connect(&self, id: &DeviceId) -> Option<AdbSession> {
        match self.adb(&["connect", id.as_str()]).await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                // Covers both "connected to" and "already connected to"
                if stdout.contains("connected to") {
                    debug!("[ADB] {}: {}", id, stdout.trim());
                    Some(AdbSession { id: id.clone() })
                } else {
                    info!("[ADB] {} not connected: {}", id, stdout.trim());
                    None
                }
            }
            Err(e) => {
                warn!("[ADB] connect {} failed: {:#}", id, e);
                None
            }
        }
    }

    async fn query_progress(&self, session: &AdbSession) -> Option<u64> {
        let dump = match self.dump_hierarchy(session).await {
            Ok(dump) => dump,
            Err(e) => {
                info!("[ADB] {} UI dump failed: {:#}", session.id, e);
                return None;
            }
        };

        let resource_id = self.config.progress_resource_id.as_str();
        let Some(text) = ui_dump::node_text(&dump, resource_id) else {
            info!("[ADB] {} has no node {}", session.id, resource_id);
            return None;
        };

        match ui_dump::parse_counter(&text) {
            Some(counter) => {
                info!(
                    "[ADB] {} progress: {}/{}",
                    session.id, counter.passed, counter.total
                );
                Some(counter.passed)
            }
            None => {
                info!("[ADB] {} counter unreadable: {:?}", session.id, text);
                None
            }
        }
    }

    async fn capture_diagnostic(&self, session: &AdbSession) -> Result<DiagnosticCapture> {
        let log_path = match self.save_logcat(session).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("[ADB] Logcat for {} not saved: {:#}", session.id, e);
                None
            }
        };

        let dump = self.dump_hierarchy(session).await?;
        let foreground_app = ui_dump::foreground_package(&dump);

        Ok(DiagnosticCapture {
            foreground_app,
            log_path,
        })
    }

    async fn release(&self, session: AdbSession) {
        if let Err(e) = self.adb(&["disconnect", session.serial()]).await {
            debug!("[ADB] disconnect {} failed: {:#}", session.id, e);
        }
    }

    fn name(&self) -> &'static str {
        "ADB"
    }
}
