//! Engine settings.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Default bound on a single provider call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Provider calls that outlive this are reported as unknown outcomes.
    pub call_timeout: Duration,
    /// How long delivered event ids are remembered for dedup.
    pub processed_event_retention: ChronoDuration,
    /// Maximum age of a webhook timestamp; `None` disables the check.
    pub webhook_tolerance: Option<ChronoDuration>,
    pub payout_retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            processed_event_retention: ChronoDuration::days(7),
            webhook_tolerance: Some(ChronoDuration::minutes(5)),
            payout_retry: RetryPolicy::default(),
        }
    }
}

impl SyncSettings {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_processed_event_retention(mut self, retention: ChronoDuration) -> Self {
        self.processed_event_retention = retention;
        self
    }

    pub fn with_webhook_tolerance(mut self, tolerance: Option<ChronoDuration>) -> Self {
        self.webhook_tolerance = tolerance;
        self
    }

    pub fn with_payout_retry(mut self, policy: RetryPolicy) -> Self {
        self.payout_retry = policy;
        self
    }
}

/// Bounded exponential backoff for resubmitting failed payouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: ChronoDuration,
    pub max_delay: ChronoDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: ChronoDuration::minutes(1),
            max_delay: ChronoDuration::hours(1),
        }
    }
}

impl RetryPolicy {
    /// Delay required after the `retry_count`-th failure.
    pub fn delay_for(&self, retry_count: u32) -> ChronoDuration {
        let exponent = retry_count.saturating_sub(1).min(20);
        let factor = 1i32 << exponent;
        let delay = self.base_delay * factor;
        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }

    /// Earliest time another attempt is allowed, `None` once exhausted.
    pub fn next_attempt_at(
        &self,
        retry_count: u32,
        last_failure_at: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if retry_count >= self.max_attempts {
            return None;
        }
        Some(match last_failure_at {
            Some(at) => at + self.delay_for(retry_count),
            None => DateTime::<Utc>::MIN_UTC,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), ChronoDuration::minutes(1));
        assert_eq!(policy.delay_for(2), ChronoDuration::minutes(2));
        assert_eq!(policy.delay_for(4), ChronoDuration::minutes(8));
        assert_eq!(policy.delay_for(9), ChronoDuration::hours(1));
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let failed_at = Utc::now();
        assert_eq!(
            policy.next_attempt_at(1, Some(failed_at)),
            Some(failed_at + ChronoDuration::minutes(1))
        );
        assert_eq!(policy.next_attempt_at(2, Some(failed_at)), None);
    }
}
