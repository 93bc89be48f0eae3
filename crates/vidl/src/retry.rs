//! Backoff for segment, key, init section and playlist requests.
//!
//! Whether a failure is worth another attempt is decided by
//! [`DownloadError::is_retryable`]: 5xx, 429, connect and body errors and
//! truncated bodies retry; 4xx, parse and decryption failures do not.

use crate::error::DownloadError;
use rand::RngExt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many times, and how far apart, a failed request is repeated.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one. Zero disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each one after it.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Spread concurrent workers apart by up to half of `base_delay`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sleep before retry number `attempt + 1`. Never exceeds `max_delay`.
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let backoff = self
            .base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay));

        let headroom = self.max_delay.saturating_sub(backoff).min(self.base_delay / 2);
        let headroom_ms = u64::try_from(headroom.as_millis()).unwrap_or(u64::MAX);
        if !self.jitter || headroom_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::rng().random_range(0..headroom_ms))
    }
}

/// Outcome of one attempt as seen by [`retry_with_backoff`].
pub enum RetryAction<T> {
    Success(T),
    /// Try again after a backoff, unless the attempts are used up.
    Retry(DownloadError),
    /// Give up now and return this error.
    Fail(DownloadError),
}

impl<T> RetryAction<T> {
    /// Sorts a request result by [`DownloadError::is_retryable`].
    ///
    /// Cancellation is never retryable, so it always ends the loop.
    pub fn classify(result: Result<T, DownloadError>) -> Self {
        match result {
            Ok(value) => RetryAction::Success(value),
            Err(err) if err.is_retryable() => RetryAction::Retry(err),
            Err(err) => RetryAction::Fail(err),
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently or runs out of retries.
///
/// `operation` is called with the 0-based attempt number. The last retryable
/// error is returned once `policy.max_retries` retries have been spent.
/// Cancellation is checked before every attempt and during every sleep.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, DownloadError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let err = match operation(attempt).await {
            RetryAction::Success(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "Recovered after retrying");
                }
                return Ok(value);
            }
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) if attempt >= policy.max_retries => return Err(err),
            RetryAction::Retry(err) => err,
        };

        let delay = policy.delay_for_attempt(attempt);
        attempt += 1;
        warn!(
            retry = attempt,
            of = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient failure; retrying"
        );
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_secs(1),
            jitter: false,
        }
    }

    #[test]
    fn delay_respects_max_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn delay_without_jitter_doubles() {
        let policy = RetryPolicy {
            jitter: false,
            base_delay: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_with_jitter_stays_in_window() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..32 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn non_retryable_fails_after_one_attempt() {
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = retry_with_backoff(&fast_policy(3), &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { RetryAction::Fail(DownloadError::fetch("404 not found", false)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn retryable_is_attempted_max_retries_plus_one_times() {
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = retry_with_backoff(&fast_policy(2), &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { RetryAction::Retry(DownloadError::fetch("500 internal", true)) }
        })
        .await;
        assert!(matches!(result, Err(DownloadError::Fetch { .. })));
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn succeeds_on_second_attempt() {
        let token = CancellationToken::new();
        let result = retry_with_backoff(&fast_policy(3), &token, |attempt| async move {
            if attempt == 0 {
                RetryAction::Retry(DownloadError::fetch("timeout", true))
            } else {
                RetryAction::Success(99u32)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
    }

    #[tokio::test]
    async fn classify_uses_error_retryability() {
        let action: RetryAction<()> = RetryAction::classify(Err(DownloadError::parse("bad")));
        assert!(matches!(action, RetryAction::Fail(_)));
        let action: RetryAction<()> =
            RetryAction::classify(Err(DownloadError::fetch("reset", true)));
        assert!(matches!(action, RetryAction::Retry(_)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(100),
            max_delay: Duration::from_secs(100),
            jitter: false,
        };
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let result: Result<u32, _> = retry_with_backoff(&policy, &token, |_| async {
            RetryAction::Retry(DownloadError::fetch("503", true))
        })
        .await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
    }
}
