//! Retry backoff for transient dispatch failures

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capped exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failure
    pub initial_backoff: Duration,

    /// Upper bound on any single delay
    pub max_backoff: Duration,

    /// Growth per failed attempt
    pub multiplier: f64,

    /// Failed attempts after which the job is given up
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    pub fn from_millis(initial_ms: u64, max_ms: u64, multiplier: f64, max_attempts: u32) -> Self {
        Self {
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_millis(max_ms),
            multiplier: multiplier.max(1.0),
            max_attempts,
        }
    }

    /// Delay before retrying after `failures` consecutive failures
    ///
    /// Returns `None` once the attempt budget is spent.
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if failures == 0 {
            return Some(Duration::ZERO);
        }
        if failures >= self.max_attempts {
            return None;
        }
        let factor = self.multiplier.powi(failures.saturating_sub(1) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for(7), Some(Duration::from_secs(32)));

        let policy = RetryPolicy::from_millis(500, 3_000, 2.0, 20);
        assert_eq!(policy.delay_for(10), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_budget_exhausts() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for(7).is_some());
        assert_eq!(policy.delay_for(8), None);
    }
}
