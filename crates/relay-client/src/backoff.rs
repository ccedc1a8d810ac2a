//! Linear, capped reconnect backoff.

use std::time::Duration;

/// Reconnect delay schedule.
///
/// The n-th consecutive failure waits `base * n`, with `n` capped at
/// `ceiling`. There is no attempt limit: once the cap is reached every
/// further retry waits the capped delay.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    ceiling: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy with the given unit delay and growth ceiling.
    pub fn new(base: Duration, ceiling: u32) -> Self {
        Self {
            base,
            ceiling: ceiling.max(1),
            attempts: 0,
        }
    }

    /// Count one more failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = (self.attempts + 1).min(self.ceiling);
        self.base * self.attempts
    }

    /// Forget previous failures (after a successful open).
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Current attempt counter.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Longest delay this policy will ever produce.
    pub fn max_delay(&self) -> Duration {
        self.base * self.ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_growth_then_cap() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(1000), 5);
        let delays: Vec<u64> = (0..8).map(|_| policy.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 3000, 4000, 5000, 5000, 5000, 5000]);
        assert_eq!(policy.attempts(), 5);
        assert_eq!(policy.max_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_never_gives_up() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(10), 3);
        for _ in 0..10_000 {
            assert!(policy.next_delay() <= policy.max_delay());
        }
    }

    #[test]
    fn test_reset() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(100), 5);
        policy.next_delay();
        policy.next_delay();
        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
    }
}
