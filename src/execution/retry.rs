use std::time::Duration;

use crate::exchange::ExchangeError;

/// Retry policy shared by submit/cancel/poll calls: bounded attempts,
/// exponential backoff, and retry only on transient exchange errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Outbound call deadline for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry attempt `attempt` (1-based): 1s, 2s, 4s, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    pub fn should_retry(&self, error: &ExchangeError, retry_count: u32) -> bool {
        error.is_transient() && retry_count < self.max_retries
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn retries_only_transient_errors_within_budget() {
        let policy = RetryPolicy::default();
        let transient = ExchangeError::Timeout("t".into());
        let terminal = ExchangeError::InsufficientBalance("b".into());

        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&terminal, 0));
    }
}
