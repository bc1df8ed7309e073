/// Reconnection backoff: linear delay with a ceiling and a bounded budget
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default ceiling for a single backoff delay
pub const DEFAULT_CAP_DELAY: Duration = Duration::from_secs(30);

/// Static retry settings of one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub cap_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_secs(2),
            cap_delay: DEFAULT_CAP_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, cap_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            cap_delay,
        }
    }

    /// Delay before the given (1-based) attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt)
            .min(self.cap_delay)
    }
}

/// Whether the supervisor should schedule another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

/// Mutable retry bookkeeping of one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    policy: RetryPolicy,
    current: u32,
    reconnecting: bool,
    exhausted: bool,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            current: 0,
            reconnecting: false,
            exhausted: false,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Decide on the next attempt. Callers must check `is_reconnecting`
    /// first; a pending retry is never doubled.
    pub fn next(&mut self) -> RetryDecision {
        if self.exhausted {
            return RetryDecision::GiveUp {
                attempts: self.current,
            };
        }

        let attempt = self.current + 1;
        if attempt > self.policy.max_retries {
            self.exhausted = true;
            return RetryDecision::GiveUp {
                attempts: self.current,
            };
        }

        self.current = attempt;
        self.reconnecting = true;
        RetryDecision::Retry {
            attempt,
            delay: self.policy.delay_for(attempt),
        }
    }

    /// The pending timer fired and its attempt is starting
    pub fn fire(&mut self) {
        self.reconnecting = false;
    }

    /// Successful handshake: the budget starts over
    pub fn reset(&mut self) {
        self.current = 0;
        self.reconnecting = false;
        self.exhausted = false;
    }

    pub fn snapshot(&self) -> RetrySnapshot {
        RetrySnapshot {
            current: self.current,
            max: self.policy.max_retries,
            reconnecting: self.reconnecting,
            exhausted: self.exhausted,
        }
    }
}

/// Serializable view of a retry state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySnapshot {
    pub current: u32,
    pub max: u32,
    pub reconnecting: bool,
    pub exhausted: bool,
}

impl RetrySnapshot {
    pub fn idle(max: u32) -> Self {
        Self {
            current: 0,
            max,
            reconnecting: false,
            exhausted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max: u32) -> RetryPolicy {
        RetryPolicy::new(max, Duration::from_secs(2), Duration::from_secs(30))
    }

    #[test]
    fn test_linear_backoff_with_cap() {
        let policy = policy(100);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(15), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.cap_delay, DEFAULT_CAP_DELAY);
        assert_eq!(policy.max_retries, 10);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let mut state = RetryState::new(policy(3));
        let mut scheduled = 0;

        loop {
            match state.next() {
                RetryDecision::Retry { attempt, .. } => {
                    scheduled += 1;
                    assert_eq!(attempt, scheduled);
                    state.fire();
                }
                RetryDecision::GiveUp { attempts } => {
                    assert_eq!(attempts, 3);
                    break;
                }
            }
        }

        assert_eq!(scheduled, 3);
        assert!(state.is_exhausted());
        // Frozen once exhausted
        assert_eq!(state.next(), RetryDecision::GiveUp { attempts: 3 });
        assert_eq!(state.current(), 3);
    }

    #[test]
    fn test_reset_restores_budget() {
        let mut state = RetryState::new(policy(1));
        assert!(matches!(state.next(), RetryDecision::Retry { attempt: 1, .. }));
        state.fire();
        assert!(matches!(state.next(), RetryDecision::GiveUp { .. }));

        state.reset();
        assert_eq!(state.current(), 0);
        assert!(!state.is_exhausted());
        assert!(matches!(state.next(), RetryDecision::Retry { attempt: 1, .. }));
    }

    #[test]
    fn test_zero_retries_gives_up_immediately() {
        let mut state = RetryState::new(policy(0));
        assert_eq!(state.next(), RetryDecision::GiveUp { attempts: 0 });
        assert!(!state.is_reconnecting());
    }

    #[test]
    fn test_snapshot_tracks_state() {
        let mut state = RetryState::new(policy(5));
        state.next();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.current, 1);
        assert_eq!(snapshot.max, 5);
        assert!(snapshot.reconnecting);
        assert!(!snapshot.exhausted);
    }
}
