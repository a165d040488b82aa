//! Resilience patterns: client-side rate limiting, backoff and retry budgets.

mod backoff;
mod budget;
mod rate_limiter;

pub use backoff::{exponential_backoff, parse_retry_after, rate_limit_reset, retry_after};
pub use budget::RetryBudget;
pub use rate_limiter::{
    PathOverride, RateLimitDecision, RateLimitProfile, RateLimitRule, RateLimiter, READ_CLASS,
    WRITE_CLASS,
};

use std::time::Duration;

/// Default per-request timeout (active time, waits excluded).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(240);

/// Retry configuration for the request executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Backoff base.
    pub min_wait: Duration,
    /// Backoff ceiling.
    pub max_wait: Duration,
    /// Retries after the first attempt; 0 means unbounded.
    pub max_retries: u32,
    /// Forced re-authentications allowed per request.
    pub max_session_retries: u32,
    /// Added to every `Retry-After` hint.
    pub retry_after_padding: Duration,
    /// Statuses that are retried.
    pub retry_statuses: Vec<u16>,
    /// Active-time limit per logical request; 0 disables it.
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_wait: Duration::from_secs(2),
            max_wait: Duration::from_secs(10),
            max_retries: 5,
            max_session_retries: 2,
            retry_after_padding: Duration::ZERO,
            retry_statuses: vec![429, 503],
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RetryConfig {
    /// Whether a status is retried.
    pub fn is_retry_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Backoff for a retry number.
    pub fn backoff(&self, retry: u32) -> Duration {
        exponential_backoff(retry, self.min_wait, self.max_wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_statuses() {
        let config = RetryConfig::default();
        assert!(config.is_retry_status(429));
        assert!(config.is_retry_status(503));
        assert!(!config.is_retry_status(500));
        assert_eq!(config.max_session_retries, 2);
    }

    #[test]
    fn test_backoff_uses_config_bounds() {
        let config = RetryConfig {
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(config.backoff(0), Duration::from_secs(1));
        assert_eq!(config.backoff(2), Duration::from_secs(4));
        assert_eq!(config.backoff(3), Duration::from_secs(5));
    }
}
