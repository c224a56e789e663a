//! Reconnection policy.
//!
//! A pure decision function over a terminated session's failure
//! classification and the number of automatic retries already spent. The
//! supervisor owns the timers; user-initiated stop cancels any pending retry
//! before it fires, regardless of what this policy decided.

use std::time::Duration;

use crate::session::FailureKind;

/// Outcome of a reconnect decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after waiting out the delay.
    RetryAfter(Duration),
    /// Stop permanently; this failure cannot be fixed by retrying.
    GiveUp,
}

/// Bounded fixed-delay retry for transport faults only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum automatic retries per connection loss (not counting the
    /// initial attempt).
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy { max_retries: 3, retry_delay: Duration::from_secs(10) }
    }
}

impl ReconnectPolicy {
    /// Decide what to do after a termination classified as `failure`, given
    /// that `attempts` automatic retries have already been made since data
    /// last flowed.
    ///
    /// Only `NetworkError` is retryable: auth rejections, clean remote
    /// closures, and silent mountpoints are conditions a retry cannot fix.
    pub fn decide(&self, failure: FailureKind, attempts: u32) -> RetryDecision {
        match failure {
            FailureKind::NetworkError if attempts < self.max_retries => {
                RetryDecision::RetryAfter(self.retry_delay)
            }
            _ => RetryDecision::GiveUp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_retry_up_to_max() {
        let policy = ReconnectPolicy::default();
        for attempts in 0..3 {
            assert_eq!(
                policy.decide(FailureKind::NetworkError, attempts),
                RetryDecision::RetryAfter(Duration::from_secs(10))
            );
        }
        // Never a fourth automatic attempt.
        assert_eq!(policy.decide(FailureKind::NetworkError, 3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(FailureKind::NetworkError, 10), RetryDecision::GiveUp);
    }

    #[test]
    fn non_network_failures_always_give_up() {
        let policy = ReconnectPolicy::default();
        for kind in [
            FailureKind::AuthFailure,
            FailureKind::IdleTimeout,
            FailureKind::MountpointClosed,
        ] {
            assert_eq!(policy.decide(kind, 0), RetryDecision::GiveUp, "{kind:?}");
        }
    }

    #[test]
    fn custom_bounds_respected() {
        let policy = ReconnectPolicy { max_retries: 1, retry_delay: Duration::from_millis(50) };
        assert_eq!(
            policy.decide(FailureKind::NetworkError, 0),
            RetryDecision::RetryAfter(Duration::from_millis(50))
        );
        assert_eq!(policy.decide(FailureKind::NetworkError, 1), RetryDecision::GiveUp);
    }
}
