/*
[INPUT]:  Snapshot failures, sequence gaps and stale snapshots
[OUTPUT]: Retry delay per refetch or a terminal give-up
[POS]:    Replica layer - centralized snapshot retry policy
[UPDATE]: When changing backoff bounds or the failure budget
*/

use std::time::Duration;

use tracing::warn;

use depthbook_adapter::backoff_delay;

use crate::error::SyncError;

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Failures in a row before the subscription is declared dead.
    pub max_consecutive_failures: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

#[derive(Debug)]
pub enum RetryDecision {
    /// Refetch after `delay`. `attempt` counts consecutive failures so far.
    Retry { attempt: u32, delay: Duration },
    /// Budget exhausted; carries a `FatalResyncFailure`.
    GiveUp(SyncError),
}

/// Tracks consecutive refetch failures for one subscription.
#[derive(Debug, Clone)]
pub struct Resynchronizer {
    policy: RetryPolicy,
    consecutive_failures: u32,
}

impl Resynchronizer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a failure and decide what happens next.
    ///
    /// The first retry goes out immediately; later ones back off
    /// exponentially. A rate-limited failure waits at least the server delay.
    /// Non-retryable failures give up at once.
    pub fn on_failure(&mut self, error: &SyncError) -> RetryDecision {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let attempt = self.consecutive_failures;

        if !error.is_retryable() {
            warn!(attempts = attempt, error = %error, "non-retryable resync failure");
            return RetryDecision::GiveUp(SyncError::FatalResyncFailure {
                attempts: attempt,
                last_error: error.to_string(),
            });
        }

        if attempt >= self.policy.max_consecutive_failures.max(1) {
            warn!(
                attempts = attempt,
                max_consecutive_failures = self.policy.max_consecutive_failures,
                error = %error,
                "resync budget exhausted"
            );
            return RetryDecision::GiveUp(SyncError::FatalResyncFailure {
                attempts: attempt,
                last_error: error.to_string(),
            });
        }

        let mut delay = backoff_delay(
            attempt - 1,
            self.policy.initial_backoff,
            self.policy.max_backoff,
        );
        if let Some(server_delay) = error.server_delay() {
            delay = delay.max(server_delay);
        }
        RetryDecision::Retry { attempt, delay }
    }

    /// A snapshot reconciled; the budget starts over.
    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
    }
}

impl Default for Resynchronizer {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
