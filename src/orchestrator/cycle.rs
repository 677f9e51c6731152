//! Power-cycle test loop
//!
//! Each cycle: wait for every host to answer pings, optionally re-confirm
//! reachability, optionally wait for the devices' test counters to move,
//! then switch the relay off and back on. A cycle timer bounds the waiting
//! phases and is reset after each power cycle.

use super::ping::{run_confirmation, run_ping_phase, ConfirmOutcome, PingOutcome, Reachability};
use crate::alert::{AlertCategory, AlertSink};
use crate::device::{DeviceDriver, DeviceId};
use crate::readiness::ReadinessMonitor;
use crate::relay::{RelayCommandClient, RelayError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Configuration for the cycle loop
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Hosts that must answer pings, in probe order
    pub hosts: Vec<DeviceId>,
    /// Budget for the waiting phases of one cycle, in seconds
    pub cycle_timeout_secs: u64,
    /// Delay before switching the relay off, in seconds
    pub power_off_delay_secs: u64,
    /// How long the relay stays off, in seconds
    pub relay_off_secs: u64,
    /// Off time of the power cycle run before the first cycle, in seconds
    pub startup_off_secs: u64,
    /// Pause between failed ping passes, in milliseconds
    pub ping_retry_interval_ms: u64,
    /// Confirmation rounds after the ping phase (0 disables)
    pub confirm_rounds: u32,
    /// Pause between confirmation rounds, in seconds
    pub confirm_interval_secs: u64,
    /// Whether to wait for device test counters each cycle
    pub readiness_enabled: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            cycle_timeout_secs: 240,
            power_off_delay_secs: 5,
            relay_off_secs: 10,
            startup_off_secs: 3,
            ping_retry_interval_ms: 1000,
            confirm_rounds: 0,
            confirm_interval_secs: 20,
            readiness_enabled: true,
        }
    }
}

impl CycleConfig {
    fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Relay control was lost or a device failed to boot
    AbortedFatal { reason: String },
    /// The ping phase never completed within the cycle timeout
    AbortedTimeout { elapsed: Duration },
    /// Shutdown was requested
    Interrupted,
}

/// Outcome of the checks between the ping phase and the power cycle
enum Verdict {
    Continue,
    Abort(String),
}

/// Drives the power-cycle test
pub struct Orchestrator<D: DeviceDriver, P: Reachability> {
    config: CycleConfig,
    relay: RelayCommandClient,
    monitor: Option<ReadinessMonitor<D>>,
    probe: P,
    alerts: Arc<dyn AlertSink>,
    shutdown: watch::Receiver<bool>,
    successes: u64,
}

impl<D: DeviceDriver, P: Reachability> Orchestrator<D, P> {
    /// Create an orchestrator; `monitor` is only used when readiness is enabled
    pub fn new(
        config: CycleConfig,
        relay: RelayCommandClient,
        monitor: Option<ReadinessMonitor<D>>,
        probe: P,
        alerts: Arc<dyn AlertSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let monitor = monitor
            .filter(|_| config.readiness_enabled)
            .map(|monitor| monitor.with_shutdown(shutdown.clone()));
        Self {
            config,
            relay,
            monitor,
            probe,
            alerts,
            shutdown,
            successes: 0,
        }
    }

    /// Number of ping phases completed so far
    pub fn successes(&self) -> u64 {
        self.successes
    }

    /// Run cycles until a terminal condition
    pub async fn run(&mut self) -> Termination {
        info!(
            "[CYCLE] Starting power-cycle test on {} hosts",
            self.config.hosts.len()
        );

        if let Err(e) = self.startup_power_cycle().await {
            return self.control_lost(e).await;
        }

        let mut cycle_start = Instant::now();
        loop {
            if self.interrupted() {
                return Termination::Interrupted;
            }

            match run_ping_phase(
                &self.probe,
                &self.config.hosts,
                cycle_start,
                self.config.cycle_timeout(),
                Duration::from_millis(self.config.ping_retry_interval_ms),
                &self.shutdown,
            )
            .await
            {
                PingOutcome::AllReachable { elapsed } => {
                    self.successes += 1;
                    info!(
                        "[CYCLE] All hosts reachable after {:?} (successes: {})",
                        elapsed, self.successes
                    );
                }
                PingOutcome::TimedOut {
                    elapsed,
                    unreachable,
                } => {
                    error!(
                        "[CYCLE] Ping phase timed out after {:?} (last miss: {:?})",
                        elapsed, unreachable
                    );
                    let detail = match unreachable {
                        Some(host) => format!("{} unreachable after {:?}", host, elapsed),
                        None => format!("ping phase exceeded {:?}", self.config.cycle_timeout()),
                    };
                    self.alerts.notify(AlertCategory::Timeout, &detail).await;
                    return Termination::AbortedTimeout { elapsed };
                }
                PingOutcome::Interrupted => return Termination::Interrupted,
            }

            if self.interrupted() {
                return Termination::Interrupted;
            }

            if let Verdict::Abort(reason) = self.verify(cycle_start).await {
                error!("[CYCLE] Aborting with relay left as is: {}", reason);
                return Termination::AbortedFatal { reason };
            }

            if self.interrupted() {
                return Termination::Interrupted;
            }

            if let Err(e) = self.power_cycle().await {
                return self.control_lost(e).await;
            }

            cycle_start = Instant::now();
        }
    }

    /// Confirmation and readiness checks for the current cycle
    async fn verify(&mut self, cycle_start: Instant) -> Verdict {
        let deadline = cycle_start + self.config.cycle_timeout();

        if self.config.confirm_rounds > 0 {
            match run_confirmation(
                &self.probe,
                &self.config.hosts,
                self.config.confirm_rounds,
                Duration::from_secs(self.config.confirm_interval_secs),
                deadline,
                &self.shutdown,
            )
            .await
            {
                ConfirmOutcome::Passed { rounds } => {
                    info!("[CYCLE] Reachability confirmed over {} rounds", rounds);
                }
                ConfirmOutcome::HostLost { host, round } => {
                    let detail = format!("{} lost in confirmation round {}", host, round);
                    self.alerts.notify(AlertCategory::Failure, &detail).await;
                    // Remaining checks are meaningless once a host dropped
                    return Verdict::Continue;
                }
                ConfirmOutcome::BudgetExhausted { completed } => {
                    warn!(
                        "[CYCLE] Budget ran out after {} confirmation rounds, all hosts up",
                        completed
                    );
                }
                ConfirmOutcome::Interrupted { completed } => {
                    info!("[CYCLE] Interrupted after {} confirmation rounds", completed);
                    return Verdict::Continue;
                }
            }
        }

        if self.interrupted() {
            return Verdict::Continue;
        }

        let Some(monitor) = self.monitor.as_mut() else {
            return Verdict::Continue;
        };

        let budget = deadline.saturating_duration_since(Instant::now());
        let report = monitor.run(budget).await;
        debug!("[CYCLE] Baseline counters: {:?}", report.baseline);
        for transition in &report.transitions {
            info!(
                "[CYCLE] {} counter {} -> {} in round {}",
                transition.device, transition.from, transition.to, transition.round
            );
        }

        if !report.outcome.is_timeout() {
            info!(
                "[CYCLE] Devices progressed after {:?} ({} rounds)",
                report.elapsed, report.rounds
            );
            return Verdict::Continue;
        }
        // A run cut short by shutdown says nothing about the devices
        if *self.shutdown.borrow() {
            return Verdict::Continue;
        }

        let diagnosis = monitor.diagnose(&report.changed).await;
        let detail = format!("{}: {}", report.outcome, diagnosis.summary());

        if diagnosis.any_not_booted() {
            self.alerts.notify(AlertCategory::Failure, &detail).await;
            return Verdict::Abort(detail);
        }

        if diagnosis.any_test_app_absent() {
            warn!("[CYCLE] Test application did not start: {}", detail);
            self.alerts.notify(AlertCategory::Failure, &detail).await;
        } else {
            warn!("[CYCLE] Readiness timed out with counters visible: {}", detail);
            self.alerts.notify(AlertCategory::Timeout, &detail).await;
        }
        Verdict::Continue
    }

    /// Off, short pause, on; brings devices to a known state before the first cycle
    async fn startup_power_cycle(&mut self) -> Result<(), RelayError> {
        self.relay.turn_off().await?;
        self.release_sessions().await;
        sleep(Duration::from_secs(self.config.startup_off_secs)).await;
        self.relay.turn_on().await
    }

    /// Delayed power-off followed by power-on
    async fn power_cycle(&mut self) -> Result<(), RelayError> {
        info!(
            "[CYCLE] Powering off in {}s",
            self.config.power_off_delay_secs
        );
        sleep(Duration::from_secs(self.config.power_off_delay_secs)).await;

        self.relay.turn_off().await?;
        self.release_sessions().await;

        sleep(Duration::from_secs(self.config.relay_off_secs)).await;
        self.relay.turn_on().await
    }

    async fn release_sessions(&mut self) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.release_sessions().await;
        }
    }

    async fn control_lost(&self, e: RelayError) -> Termination {
        error!("[CYCLE] Relay control lost: {}", e);
        let reason = format!("relay control lost: {}", e);
        self.alerts.notify(AlertCategory::Error, &reason).await;
        Termination::AbortedFatal { reason }
    }

    fn interrupted(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::ReadinessConfig;
    use crate::relay::RelayConfig;
    use crate::testing::{AckScript, FakeTransport, RecordingAlerts, ScriptedDriver, ScriptedProbe};

    const LAUNCHER: &str = "com.google.android.apps.tv.launcherx";

    struct Rig {
        transport: Arc<FakeTransport>,
        alerts: Arc<RecordingAlerts>,
        shutdown: watch::Sender<bool>,
        orchestrator: Orchestrator<ScriptedDriver, ScriptedProbe>,
    }

    fn rig(config: CycleConfig, driver: Option<ScriptedDriver>, probe: ScriptedProbe) -> Rig {
        let transport = Arc::new(FakeTransport::new("relay/ack"));
        let relay = RelayCommandClient::new(
            transport.clone(),
            RelayConfig {
                command_topic: "relay/cmd".into(),
                ack_topic: "relay/ack".into(),
                ..Default::default()
            },
        );
        let monitor = driver.map(|driver| {
            ReadinessMonitor::new(driver, config.hosts.clone(), ReadinessConfig::default())
        });
        let alerts = Arc::new(RecordingAlerts::default());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let orchestrator = Orchestrator::new(
            config,
            relay,
            monitor,
            probe,
            alerts.clone(),
            shutdown_rx,
        );
        Rig {
            transport,
            alerts,
            shutdown,
            orchestrator,
        }
    }

    fn config(hosts: &[&str]) -> CycleConfig {
        CycleConfig {
            hosts: hosts.iter().map(|h| DeviceId::from(*h)).collect(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_boot_aborts_without_power_off() {
        let driver = ScriptedDriver::new()
            .progress("d1", &[None])
            .foreground("d1", "com.android.systemui");
        let probe = ScriptedProbe::new().script("d1", &[true]);
        let mut rig = rig(config(&["d1"]), Some(driver), probe);

        let termination = rig.orchestrator.run().await;

        assert!(matches!(termination, Termination::AbortedFatal { .. }));
        // Only the startup off/on pair was published
        assert_eq!(rig.transport.commands(), vec![0, 1]);
        assert_eq!(rig.alerts.categories(), vec![AlertCategory::Failure]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_app_absent_continues_and_resets_timer() {
        let driver = ScriptedDriver::new()
            .progress("d1", &[None])
            .foreground("d1", LAUNCHER);
        // First cycle pings fine, the second never does
        let probe = ScriptedProbe::new().script("d1", &[true, false]);
        let mut rig = rig(config(&["d1"]), Some(driver), probe);

        let start = Instant::now();
        let termination = rig.orchestrator.run().await;

        assert!(matches!(termination, Termination::AbortedTimeout { .. }));
        // Startup pair, then a full power cycle after the diagnosis
        assert_eq!(rig.transport.commands(), vec![0, 1, 0, 1]);
        assert_eq!(
            rig.alerts.categories(),
            vec![AlertCategory::Failure, AlertCategory::Timeout]
        );
        // The second cycle got a fresh 240s budget
        assert!(start.elapsed() >= Duration::from_secs(480));
        assert_eq!(rig.orchestrator.successes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_loss_is_fatal() {
        let probe = ScriptedProbe::new().script("d1", &[true]);
        let mut rig = rig(config(&["d1"]), None, probe);
        rig.transport.set_default(AckScript::Drop);

        let termination = rig.orchestrator.run().await;

        assert!(matches!(termination, Termination::AbortedFatal { .. }));
        assert_eq!(rig.transport.commands(), vec![0; 5]);
        assert_eq!(rig.alerts.categories(), vec![AlertCategory::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_timeout_alerts_and_stops() {
        let probe = ScriptedProbe::new().script("d1", &[false]);
        let mut rig = rig(config(&["d1"]), None, probe);

        let termination = rig.orchestrator.run().await;

        assert!(matches!(termination, Termination::AbortedTimeout { .. }));
        assert_eq!(rig.alerts.categories(), vec![AlertCategory::Timeout]);
        assert_eq!(rig.orchestrator.successes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_pass_cycles_until_interrupted() {
        // Counter advances by one on every read
        let driver = ScriptedDriver::new().progress("d1", &(0..100u64).map(Some).collect::<Vec<_>>());
        let probe = ScriptedProbe::new().script("d1", &[true]);
        let mut rig = rig(config(&["d1"]), Some(driver), probe);

        let shutdown = rig.shutdown.clone();
        tokio::spawn(async move {
            // Long enough for a few cycles of ~15s each
            sleep(Duration::from_secs(50)).await;
            let _ = shutdown.send(true);
        });

        let termination = rig.orchestrator.run().await;

        assert_eq!(termination, Termination::Interrupted);
        assert!(rig.orchestrator.successes() >= 3);
        assert!(rig.alerts.categories().is_empty());
        // Commands always come in complete off/on pairs
        let commands = rig.transport.commands();
        assert_eq!(commands.len() % 2, 0);
        assert!(commands.chunks(2).all(|pair| pair == [0, 1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_failure_skips_readiness_and_continues() {
        let driver = ScriptedDriver::new().progress("d1", &[Some(1), Some(2)]);
        // Ping phase ok, first confirmation round lost, then never reachable again
        let probe = ScriptedProbe::new().script("d1", &[true, false]);
        let mut config = config(&["d1"]);
        config.confirm_rounds = 3;
        let mut rig = rig(config, Some(driver), probe);

        let termination = rig.orchestrator.run().await;

        assert!(matches!(termination, Termination::AbortedTimeout { .. }));
        assert_eq!(
            rig.alerts.categories(),
            vec![AlertCategory::Failure, AlertCategory::Timeout]
        );
        assert_eq!(rig.orchestrator.monitor.as_ref().map(|m| m.driver().query_count("d1")), Some(0));
        assert_eq!(rig.transport.commands(), vec![0, 1, 0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_that_progressed_is_not_declared_dead() {
        // d1 moves in the first round and then loses its UI dump; d2 never moves
        let driver = ScriptedDriver::new()
            .progress("d1", &[Some(1), Some(2), None])
            .foreground("d1", "com.android.systemui")
            .progress("d2", &[Some(5)]);
        // Both answer in the first cycle, d1 never comes back in the second
        let probe = ScriptedProbe::new()
            .script("d1", &[true, false])
            .script("d2", &[true]);
        let mut rig = rig(config(&["d1", "d2"]), Some(driver), probe);

        let termination = rig.orchestrator.run().await;

        assert!(matches!(termination, Termination::AbortedTimeout { .. }));
        assert_eq!(rig.transport.commands(), vec![0, 1, 0, 1]);
        let alerts = rig.alerts.alerts();
        assert_eq!(alerts[0].0, AlertCategory::Timeout);
        assert!(alerts[0].1.starts_with("ThreadNotAllPass"));
        assert!(!alerts[0].1.contains("d1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_ping_phase_is_prompt() {
        let probe = ScriptedProbe::new().script("d1", &[false]);
        let mut rig = rig(config(&["d1"]), None, probe);

        let shutdown = rig.shutdown.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(30)).await;
            let _ = shutdown.send(true);
        });

        let start = Instant::now();
        let termination = rig.orchestrator.run().await;

        assert_eq!(termination, Termination::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(35));
        assert!(rig.alerts.categories().is_empty());
        assert_eq!(rig.transport.commands(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_readiness_skips_diagnosis() {
        let driver = ScriptedDriver::new()
            .progress("d1", &[Some(7)])
            .foreground("d1", "com.android.systemui");
        let probe = ScriptedProbe::new().script("d1", &[true]);
        let mut rig = rig(config(&["d1"]), Some(driver), probe);

        let shutdown = rig.shutdown.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(60)).await;
            let _ = shutdown.send(true);
        });

        let start = Instant::now();
        let termination = rig.orchestrator.run().await;

        assert_eq!(termination, Termination::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(65));
        assert!(rig.alerts.categories().is_empty());
        assert_eq!(rig.transport.commands(), vec![0, 1]);
    }
}
