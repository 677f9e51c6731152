//! Host reachability probing
//!
//! Provides the ICMP probe used by the cycle loop and the two phases built
//! on it: the per-cycle ping phase and the optional multi-round confirmation.

use crate::device::DeviceId;
use crate::shutdown::sleep_until_or_shutdown;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Answers whether a host is reachable right now
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn probe(&self, host: &DeviceId) -> bool;
}

/// Probes hosts with a single echo request via the system `ping`
#[derive(Debug, Clone)]
pub struct SystemPing {
    timeout: Duration,
}

impl SystemPing {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(&self, host: &str) -> Command {
        let mut command = Command::new("ping");
        if cfg!(windows) {
            let wait_ms = self.timeout.as_millis().to_string();
            command.args(["-n", "1", "-w", wait_ms.as_str(), host]);
        } else {
            let wait_secs = self.timeout.as_secs().max(1).to_string();
            command.args(["-c", "1", "-W", wait_secs.as_str(), host]);
        }
        command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

impl Default for SystemPing {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl Reachability for SystemPing {
    async fn probe(&self, host: &DeviceId) -> bool {
        match self.command(host.as_str()).status().await {
            Ok(status) => status.success(),
            Err(e) => {
                warn!("[PING] Failed to run ping for {}: {}", host, e);
                false
            }
        }
    }
}

/// Result of the per-cycle ping phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingOutcome {
    /// Every host answered within the cycle timeout
    AllReachable { elapsed: Duration },
    /// The cycle timeout passed first
    TimedOut {
        elapsed: Duration,
        unreachable: Option<DeviceId>,
    },
    /// Shutdown was requested between passes
    Interrupted,
}

/// Probe every host until all answer in one pass or the cycle times out
///
/// A single miss abandons the pass and starts over from the first host;
/// the cycle timer keeps running across passes.
pub async fn run_ping_phase<P: Reachability + ?Sized>(
    probe: &P,
    hosts: &[DeviceId],
    cycle_start: Instant,
    cycle_timeout: Duration,
    retry_interval: Duration,
    shutdown: &watch::Receiver<bool>,
) -> PingOutcome {
    loop {
        let mut unreachable = None;
        for host in hosts {
            if probe.probe(host).await {
                debug!("[PING] {} is reachable", host);
            } else {
                info!("[PING] {} is unreachable", host);
                unreachable = Some(host.clone());
                break;
            }
        }

        let elapsed = cycle_start.elapsed();
        if elapsed > cycle_timeout {
            return PingOutcome::TimedOut {
                elapsed,
                unreachable,
            };
        }
        if unreachable.is_none() {
            info!("[PING] All {} hosts reachable after {:?}", hosts.len(), elapsed);
            return PingOutcome::AllReachable { elapsed };
        }

        if sleep_until_or_shutdown(Instant::now() + retry_interval, shutdown).await {
            info!("[PING] Shutdown requested, leaving ping phase");
            return PingOutcome::Interrupted;
        }
    }
}

/// Result of the multi-round confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Every round reached every host
    Passed { rounds: u32 },
    /// A host missed a probe
    HostLost { host: DeviceId, round: u32 },
    /// The budget ran out before all rounds completed, with no misses
    BudgetExhausted { completed: u32 },
    /// Shutdown was requested between rounds
    Interrupted { completed: u32 },
}

/// Re-verify reachability over `rounds` consecutive rounds before `deadline`
pub async fn run_confirmation<P: Reachability + ?Sized>(
    probe: &P,
    hosts: &[DeviceId],
    rounds: u32,
    interval: Duration,
    deadline: Instant,
    shutdown: &watch::Receiver<bool>,
) -> ConfirmOutcome {
    for round in 1..=rounds {
        for host in hosts {
            if Instant::now() >= deadline {
                return ConfirmOutcome::BudgetExhausted {
                    completed: round - 1,
                };
            }
            if !probe.probe(host).await {
                warn!("[PING] {} lost in confirmation round {}", host, round);
                return ConfirmOutcome::HostLost {
                    host: host.clone(),
                    round,
                };
            }
        }
        info!("[PING] Confirmation round {}/{} passed", round, rounds);

        if round < rounds {
            let wake = std::cmp::min(Instant::now() + interval, deadline);
            if sleep_until_or_shutdown(wake, shutdown).await {
                return ConfirmOutcome::Interrupted { completed: round };
            }
        }
    }

    ConfirmOutcome::Passed { rounds }
}
