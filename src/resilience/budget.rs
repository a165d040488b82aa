//! Per-request retry budget.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::ZscalerError;

/// Tracks attempts and active time of one logical request.
///
/// Time spent sleeping through [`RetryBudget::sleep`] is recorded separately
/// and does not count against the timeout.
#[derive(Debug)]
pub struct RetryBudget {
    attempts: u32,
    max_retries: u32,
    started: Instant,
    waited: Duration,
    timeout: Duration,
}

impl RetryBudget {
    /// `max_retries == 0` means unbounded; `timeout == 0` disables the deadline.
    pub fn new(max_retries: u32, timeout: Duration) -> Self {
        Self {
            attempts: 0,
            max_retries,
            started: Instant::now(),
            waited: Duration::ZERO,
            timeout,
        }
    }

    /// Registers a send and returns the attempt number (1-based).
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retries made so far (attempts after the first).
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Whether another retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.max_retries == 0 || self.retries() < self.max_retries
    }

    /// Time spent sleeping.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Wall-clock time minus sleeps.
    pub fn active_elapsed(&self) -> Duration {
        self.started.elapsed().saturating_sub(self.waited)
    }

    /// Fails with `Timeout` once active time exceeds the limit.
    pub fn check_deadline(&self) -> Result<(), ZscalerError> {
        let elapsed = self.active_elapsed();
        if !self.timeout.is_zero() && elapsed > self.timeout {
            return Err(ZscalerError::Timeout {
                elapsed,
                timeout: self.timeout,
            });
        }
        Ok(())
    }

    /// Sleeps for `delay` unless cancelled; the slept time is excluded from
    /// the deadline.
    pub async fn sleep(
        &mut self,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ZscalerError> {
        let start = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ZscalerError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        };
        self.waited += start.elapsed();
        result
    }
}
