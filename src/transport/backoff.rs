//! Reconnect backoff schedule

use rig_shared::reconnect;
use std::time::Duration;

/// Exponential reconnect schedule with a capped delay and bounded attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub rate: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(reconnect::INITIAL_DELAY_SECS),
            rate: reconnect::RATE,
            max_delay: Duration::from_secs(reconnect::MAX_DELAY_SECS),
            max_attempts: reconnect::MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait before each attempt, in order
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let policy = *self;
        let mut delay = policy.initial_delay.min(policy.max_delay);
        (0..policy.max_attempts).map(move |_| {
            let current = delay;
            delay = std::cmp::min(delay * policy.rate, policy.max_delay);
            current
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let delays: Vec<u64> = ReconnectPolicy::default()
            .delays()
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60, 60, 60, 60]);
    }

    #[test]
    fn test_zero_attempts_yields_nothing() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(policy.delays().count(), 0);
    }
}
