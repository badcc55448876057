use rand::Rng;
use std::time::Duration;

/// Total attempts per enrichment task, the first one included.
pub const MAX_ATTEMPTS: u32 = 4;
pub const BASE_DELAY: Duration = Duration::from_millis(500);
pub const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    NonRetryable,
}

/// 408, 429 and 5xx are worth another attempt; any other status is final.
pub fn retry_decision_for_status(status: reqwest::StatusCode) -> RetryDecision {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RetryDecision::Retryable
    } else {
        RetryDecision::NonRetryable
    }
}

impl RetryPolicy {
    /// Exponential delay after the `attempt`-th failure (1-based), capped,
    /// plus up to a quarter of it again as jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = 2u32.saturating_pow(attempt.saturating_sub(1));
        let base = self.base_delay.saturating_mul(exponent).min(self.max_delay);
        let jitter_ms = (base.as_millis() / 4) as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        base.saturating_add(Duration::from_millis(jitter))
    }

    /// Whether a task that just failed its `attempt`-th try may go again.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::default();

        let first = policy.delay_for(1);
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(625));

        let third = policy.delay_for(3);
        assert!(third >= Duration::from_secs(2) && third <= Duration::from_millis(2_500));

        let late = policy.delay_for(20);
        assert!(late >= MAX_DELAY && late <= MAX_DELAY + MAX_DELAY / 4);
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(3));
        assert!(!policy.allows_retry(4));
    }

    #[test]
    fn test_status_classification() {
        use reqwest::StatusCode;
        assert_eq!(retry_decision_for_status(StatusCode::TOO_MANY_REQUESTS), RetryDecision::Retryable);
        assert_eq!(retry_decision_for_status(StatusCode::BAD_GATEWAY), RetryDecision::Retryable);
        assert_eq!(retry_decision_for_status(StatusCode::REQUEST_TIMEOUT), RetryDecision::Retryable);
        assert_eq!(retry_decision_for_status(StatusCode::BAD_REQUEST), RetryDecision::NonRetryable);
        assert_eq!(retry_decision_for_status(StatusCode::UNAUTHORIZED), RetryDecision::NonRetryable);
    }
}
