//! Retry policy for failed publish attempts.

use chrono::{DateTime, Duration, Utc};

/// Backoff schedule in seconds, indexed by `attempts - 1`: 1min, 5min, 15min, 1hr.
pub const RETRY_BACKOFF_SECS: [i64; 4] = [60, 300, 900, 3600];

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the job back to pending, eligible again at `next_retry_at`.
    Retry {
        delay: Duration,
        next_retry_at: DateTime<Utc>,
    },
    /// Give up: the job and its post fail terminally.
    GiveUp,
}

/// Maps an attempt count to a backoff delay and a retry/terminal decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff_secs: Vec<i64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_secs: RETRY_BACKOFF_SECS.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// A policy with a custom backoff table. An empty table means no delay.
    pub fn with_backoff(backoff_secs: Vec<i64>) -> Self {
        Self { backoff_secs }
    }

    /// Delay before the next attempt, given how many attempts have been made.
    ///
    /// Attempts past the end of the table reuse the last entry.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let Some(last) = self.backoff_secs.len().checked_sub(1) else {
            return Duration::zero();
        };
        let index = (attempts.saturating_sub(1) as usize).min(last);
        Duration::seconds(self.backoff_secs[index])
    }

    /// Decide the fate of a job that just failed its `attempts`-th attempt.
    ///
    /// Non-retryable failures give up regardless of the remaining budget.
    pub fn decide(
        &self,
        attempts: u32,
        max_attempts: u32,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if !retryable || attempts >= max_attempts {
            return RetryDecision::GiveUp;
        }
        let delay = self.backoff(attempts);
        RetryDecision::Retry {
            delay,
            next_retry_at: now + delay,
        }
    }
}

/// Error message recorded on a post whose job ran out of attempts.
pub fn exhausted_message(error: &str) -> String {
    format!("Max retries exceeded. Last error: {}", error)
}

/// Error message recorded on a post whose job failed in a way no retry can fix.
pub fn permanent_failure_message(error: &str) -> String {
    format!("Publish failed permanently: {}", error)
}
