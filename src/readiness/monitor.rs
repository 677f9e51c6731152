//! Readiness Monitor
//!
//! Runs one deadline-bounded readiness check across all devices. A run walks
//! the phases of [`ReadinessStateMachine`]: establish a session per device,
//! capture a baseline progress value per device, then poll until every
//! device reports a value different from its baseline. All phases share a
//! single deadline computed once from the caller's budget.

use super::diagnosis::{Diagnosis, DiagnosticReport};
use crate::device::{DeviceDriver, DeviceId};
use crate::shutdown::sleep_until_or_shutdown;
use futures::future::join_all;
use rig_shared::state_machine::{
    PhaseEvent, ReadinessOutcome, ReadinessPhase, ReadinessStateMachine, TransitionResult,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Configuration for readiness monitoring
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Pause between polling rounds, in milliseconds
    pub poll_interval_ms: u64,
    /// Package of the home launcher; seeing it in front means the system
    /// booted but the test application did not start
    pub launcher_package: String,
    /// Package of the test application itself
    pub test_app_package: String,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            launcher_package: "com.google.android.apps.tv.launcherx".into(),
            test_app_package: "com.sdmc.facTest".into(),
        }
    }
}

impl ReadinessConfig {
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A device observed to move past its baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTransition {
    pub device: DeviceId,
    pub from: u64,
    pub to: u64,
    /// Polling round (1-based) in which the change was seen
    pub round: u32,
}

/// Summary of one readiness run
#[derive(Debug, Clone)]
pub struct ReadinessReport {
    pub outcome: ReadinessOutcome,
    pub baseline: BTreeMap<DeviceId, u64>,
    pub changed: BTreeSet<DeviceId>,
    pub transitions: Vec<ProgressTransition>,
    /// Polling rounds run in the await-change phase
    pub rounds: u32,
    pub elapsed: Duration,
}

/// Per-run working state
struct Run {
    deadline: Instant,
    baseline: BTreeMap<DeviceId, u64>,
    changed: BTreeSet<DeviceId>,
    transitions: Vec<ProgressTransition>,
    rounds: u32,
}

impl Run {
    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Deadline-bounded multi-phase readiness monitor
pub struct ReadinessMonitor<D: DeviceDriver> {
    driver: D,
    devices: Vec<DeviceId>,
    config: ReadinessConfig,
    sessions: HashMap<DeviceId, D::Session>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<D: DeviceDriver> ReadinessMonitor<D> {
    /// Create a monitor for an ordered, duplicate-free set of devices
    pub fn new(driver: D, devices: Vec<DeviceId>, config: ReadinessConfig) -> Self {
        let mut seen = BTreeSet::new();
        let devices = devices
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        Self {
            driver,
            devices,
            config,
            sessions: HashMap::new(),
            shutdown: None,
        }
    }

    /// End runs early once `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    #[cfg(test)]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Drop every session; used after the devices lose power
    pub async fn release_sessions(&mut self) {
        for (id, session) in self.sessions.drain() {
            debug!("[READY] Releasing session for {}", id);
            self.driver.release(session).await;
        }
    }

    /// Run the readiness check within `budget`
    pub async fn run(&mut self, budget: Duration) -> ReadinessReport {
        let started = Instant::now();
        let mut run = Run {
            deadline: started + budget,
            baseline: BTreeMap::new(),
            changed: BTreeSet::new(),
            transitions: Vec::new(),
            rounds: 0,
        };
        let mut fsm = ReadinessStateMachine::new();

        info!(
            "[READY] Monitoring {} devices with {:?} budget via {}",
            self.devices.len(),
            budget,
            self.driver.name()
        );

        let outcome = loop {
            let event = match fsm.phase() {
                ReadinessPhase::Connecting => self.connect_all(&mut run).await,
                ReadinessPhase::CapturingBaseline => self.capture_baseline(&mut run).await,
                ReadinessPhase::AwaitingChange => self.await_change(&mut run).await,
                ReadinessPhase::Finished(outcome) => break outcome,
            };

            match fsm.process_event(event) {
                TransitionResult::Advanced(phase) => {
                    info!(
                        "[READY] Entering {:?} after {:?}",
                        phase,
                        started.elapsed()
                    );
                }
                TransitionResult::Finished(outcome) => {
                    info!("[READY] Finished: {} after {:?}", outcome, started.elapsed());
                }
                TransitionResult::Invalid { from, event } => {
                    // Phase handlers only emit events valid for their phase
                    error!("[READY] Invalid event {:?} in {:?}", event, from);
                    break ReadinessOutcome::ThreadNotAllPass;
                }
            }
        };

        match outcome {
            ReadinessOutcome::AllPass => info!("[READY] All devices progressed"),
            ReadinessOutcome::TimeoutConnect => {
                error!("[READY] Timed out connecting to devices")
            }
            ReadinessOutcome::TimeoutInit => {
                error!("[READY] Timed out capturing baseline: {:?}", run.baseline)
            }
            ReadinessOutcome::ThreadNotAllPass => {
                let pending: Vec<&DeviceId> = self
                    .devices
                    .iter()
                    .filter(|id| !run.changed.contains(*id))
                    .collect();
                error!("[READY] Timed out, devices without progress: {:?}", pending);
            }
        }

        ReadinessReport {
            outcome,
            baseline: run.baseline,
            changed: run.changed,
            transitions: run.transitions,
            rounds: run.rounds,
            elapsed: started.elapsed(),
        }
    }

    /// Establish a session for every device lacking one
    async fn connect_all(&mut self, run: &mut Run) -> PhaseEvent {
        loop {
            let missing: Vec<DeviceId> = self
                .devices
                .iter()
                .filter(|id| !self.sessions.contains_key(*id))
                .cloned()
                .collect();

            if missing.is_empty() {
                return PhaseEvent::SessionsEstablished;
            }
            if run.expired() {
                return PhaseEvent::DeadlineExpired;
            }

            let driver = &self.driver;
            let attempts = join_all(missing.into_iter().map(|id| async move {
                let session = driver.connect(&id).await;
                (id, session)
            }))
            .await;

            let mut all_connected = true;
            for (id, session) in attempts {
                match session {
                    Some(session) => {
                        info!("[READY] Session established with {}", id);
                        self.sessions.insert(id, session);
                    }
                    None => {
                        debug!("[READY] {} not reachable yet", id);
                        all_connected = false;
                    }
                }
            }

            if !all_connected {
                self.pause(run).await;
            }
        }
    }

    /// Query each device until every one has yielded a baseline value
    async fn capture_baseline(&self, run: &mut Run) -> PhaseEvent {
        loop {
            for id in &self.devices {
                if run.baseline.contains_key(id) {
                    continue;
                }
                if run.expired() {
                    return PhaseEvent::DeadlineExpired;
                }

                match self.query(id).await {
                    Some(value) => {
                        info!("[READY] Baseline for {}: {}", id, value);
                        run.baseline.insert(id.clone(), value);
                    }
                    None => debug!("[READY] Baseline read for {} missed", id),
                }
            }

            if run.baseline.len() == self.devices.len() {
                return PhaseEvent::BaselineCaptured;
            }
            if run.expired() {
                return PhaseEvent::DeadlineExpired;
            }
            self.pause(run).await;
        }
    }

    /// Poll devices not yet changed until all differ from their baseline
    async fn await_change(&self, run: &mut Run) -> PhaseEvent {
        loop {
            if run.changed.len() == self.devices.len() {
                return PhaseEvent::AllChanged;
            }
            if run.expired() {
                return PhaseEvent::DeadlineExpired;
            }

            run.rounds += 1;
            for id in &self.devices {
                if run.changed.contains(id) {
                    continue;
                }
                if run.expired() {
                    break;
                }

                let Some(current) = self.query(id).await else {
                    continue;
                };
                let Some(&base) = run.baseline.get(id) else {
                    continue;
                };

                if current != base {
                    info!(
                        "[READY] {} progressed {} -> {} (round {})",
                        id, base, current, run.rounds
                    );
                    run.changed.insert(id.clone());
                    run.transitions.push(ProgressTransition {
                        device: id.clone(),
                        from: base,
                        to: current,
                        round: run.rounds,
                    });
                }
            }

            info!(
                "[READY] Round {}: {}/{} devices progressed",
                run.rounds,
                run.changed.len(),
                self.devices.len()
            );

            if run.changed.len() == self.devices.len() {
                return PhaseEvent::AllChanged;
            }
            self.pause(run).await;
        }
    }

    /// Read a device's progress through its session
    async fn query(&self, id: &DeviceId) -> Option<u64> {
        match self.sessions.get(id) {
            Some(session) => self.driver.query_progress(session).await,
            None => {
                warn!("[READY] No session for {}", id);
                None
            }
        }
    }

    /// Sleep one poll interval, never past the deadline
    ///
    /// A shutdown request pulls the deadline in so the current phase ends.
    async fn pause(&self, run: &mut Run) {
        let wake = std::cmp::min(Instant::now() + self.config.poll_interval(), run.deadline);
        match &self.shutdown {
            Some(shutdown) => {
                if sleep_until_or_shutdown(wake, shutdown).await {
                    info!("[READY] Shutdown requested, ending run");
                    run.deadline = Instant::now();
                }
            }
            None => sleep_until(wake).await,
        }
    }

    /// Classify every device that is not visibly making progress
    ///
    /// Devices in `changed` progressed during the run and count as booted
    /// without being touched. Devices without a session are reconnected
    /// first; a device that cannot be reached at all is classified as not
    /// booted.
    pub async fn diagnose(&mut self, changed: &BTreeSet<DeviceId>) -> DiagnosticReport {
        let mut report = DiagnosticReport::default();

        for id in self.devices.clone() {
            if changed.contains(&id) {
                info!("[READY] {}: progressed during the run", id);
                report.push(id, Diagnosis::ProgressVisible);
                continue;
            }

            let diagnosis = self.diagnose_device(&id).await;
            match &diagnosis {
                Diagnosis::ProgressVisible => info!("[READY] {}: progress visible", id),
                Diagnosis::TestAppStalled => {
                    warn!("[READY] {}: test app in front, counter unreadable", id)
                }
                Diagnosis::TestAppAbsent { foreground } => {
                    warn!("[READY] {}: system up, test app absent ({})", id, foreground)
                }
                Diagnosis::NotBooted { foreground } => {
                    error!("[READY] {}: system not booted ({:?})", id, foreground)
                }
            }
            report.push(id, diagnosis);
        }

        report
    }

    async fn diagnose_device(&mut self, id: &DeviceId) -> Diagnosis {
        if !self.sessions.contains_key(id) {
            match self.driver.connect(id).await {
                Some(session) => {
                    self.sessions.insert(id.clone(), session);
                }
                None => return Diagnosis::NotBooted { foreground: None },
            }
        }

        if self.query(id).await.is_some() {
            return Diagnosis::ProgressVisible;
        }

        let Some(session) = self.sessions.get(id) else {
            return Diagnosis::NotBooted { foreground: None };
        };
        match self.driver.capture_diagnostic(session).await {
            Ok(capture) => {
                if let Some(path) = &capture.log_path {
                    info!("[READY] {} device log saved to {}", id, path.display());
                }
                Diagnosis::from_foreground(
                    capture.foreground_app,
                    &self.config.launcher_package,
                    &self.config.test_app_package,
                )
            }
            Err(e) => {
                warn!("[READY] Diagnostic capture for {} failed: {:#}", id, e);
                Diagnosis::NotBooted { foreground: None }
            }
        }
    }
}
