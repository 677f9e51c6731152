//! Readiness Phase State Machine
//!
//! Defines the valid phase transitions of one readiness monitoring run:
//! ```text
//! Connecting -> CapturingBaseline -> AwaitingChange -> AllPass
//!      |               |                   |
//! TimeoutConnect   TimeoutInit      ThreadNotAllPass
//! ```
//! Every run starts fresh in `Connecting`; terminal phases accept no events.

use std::fmt;

/// Final result of a readiness run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadinessOutcome {
    /// Every device progressed past its baseline
    AllPass,
    /// Deadline passed before every device had a session
    TimeoutConnect,
    /// Deadline passed before every device yielded a baseline
    TimeoutInit,
    /// Deadline passed before every device progressed
    ThreadNotAllPass,
}

impl ReadinessOutcome {
    /// Whether this outcome is one of the phase timeouts
    pub fn is_timeout(self) -> bool {
        !matches!(self, ReadinessOutcome::AllPass)
    }
}

impl fmt::Display for ReadinessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessOutcome::AllPass => write!(f, "AllPass"),
            ReadinessOutcome::TimeoutConnect => write!(f, "TimeoutConnect"),
            ReadinessOutcome::TimeoutInit => write!(f, "TimeoutInit"),
            ReadinessOutcome::ThreadNotAllPass => write!(f, "ThreadNotAllPass"),
        }
    }
}

/// Phase of a readiness run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessPhase {
    Connecting,
    CapturingBaseline,
    AwaitingChange,
    Finished(ReadinessOutcome),
}

/// Events that drive phase transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Every device has an established session
    SessionsEstablished,
    /// Every device yielded a baseline value
    BaselineCaptured,
    /// Every device has been seen to change
    AllChanged,
    /// The shared run deadline passed
    DeadlineExpired,
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Moved to a new non-terminal phase
    Advanced(ReadinessPhase),
    /// Reached a terminal phase
    Finished(ReadinessOutcome),
    /// Event is not valid in the current phase
    Invalid { from: ReadinessPhase, event: PhaseEvent },
}

/// Phase tracker for a single readiness run
#[derive(Debug)]
pub struct ReadinessStateMachine {
    phase: ReadinessPhase,
}

impl Default for ReadinessStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessStateMachine {
    /// Create a state machine at the start of a run
    pub fn new() -> Self {
        Self {
            phase: ReadinessPhase::Connecting,
        }
    }

    /// Get current phase
    pub fn phase(&self) -> ReadinessPhase {
        self.phase
    }

    /// Outcome, once a terminal phase has been reached
    pub fn outcome(&self) -> Option<ReadinessOutcome> {
        match self.phase {
            ReadinessPhase::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: PhaseEvent) -> TransitionResult {
        use PhaseEvent::*;
        use ReadinessPhase::*;

        let next = match (self.phase, event) {
            (Connecting, SessionsEstablished) => CapturingBaseline,
            (CapturingBaseline, BaselineCaptured) => AwaitingChange,
            (AwaitingChange, AllChanged) => Finished(ReadinessOutcome::AllPass),

            (Connecting, DeadlineExpired) => Finished(ReadinessOutcome::TimeoutConnect),
            (CapturingBaseline, DeadlineExpired) => Finished(ReadinessOutcome::TimeoutInit),
            (AwaitingChange, DeadlineExpired) => Finished(ReadinessOutcome::ThreadNotAllPass),

            (from, event) => return TransitionResult::Invalid { from, event },
        };

        self.phase = next;
        match next {
            Finished(outcome) => TransitionResult::Finished(outcome),
            phase => TransitionResult::Advanced(phase),
        }
    }
}
