use std::future::Future;
use std::time::Duration;

use crate::config::DEFAULT_RATE_LIMIT_SLEEP;
use crate::error::UploaderError;
use crate::strava_client::ApiError;

/// Rate-limit handling for Strava calls.
///
/// Strava's quota resets every 15 minutes, so a rate-limited call sleeps once
/// and tries again. Hitting the limit again means the daily quota is gone and
/// the run is over.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay: DEFAULT_RATE_LIMIT_SLEEP,
        }
    }
}

impl RateLimitPolicy {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Run `operation`, retrying only on [`ApiError::RateLimited`]. Other
    /// errors are returned untouched on the first occurrence.
    pub async fn run<F, Fut, T>(&self, label: &str, operation: F) -> Result<T, RetryError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let total_attempts = self.max_attempts.max(1);

        for attempt in 1..=total_attempts {
            match operation().await {
                Err(ApiError::RateLimited) if attempt < total_attempts => {
                    tracing::warn!(
                        "Rate limit exceeded during {} (attempt {}/{}), retrying in {}s",
                        label,
                        attempt,
                        total_attempts,
                        self.delay.as_secs()
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(ApiError::RateLimited) => {
                    tracing::error!("Daily rate limit exceeded during {}", label);
                    return Err(RetryError::Exhausted(UploaderError::RateLimitExceeded(
                        label.to_string(),
                    )));
                }
                Err(e) => return Err(RetryError::Api(e)),
                Ok(value) => return Ok(value),
            }
        }

        Err(RetryError::Exhausted(UploaderError::RateLimitExceeded(
            label.to_string(),
        )))
    }
}

/// Result of a guarded call that did not succeed.
#[derive(Debug)]
pub enum RetryError {
    /// The rate limit outlasted every attempt.
    Exhausted(UploaderError),
    Api(ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy::with_delay(Duration::ZERO)
    }

    #[test]
    fn test_default_policy() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.delay, Duration::from_secs(900));
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let result = policy().run("upload", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retries_once_after_rate_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = calls.clone();
        let result = policy()
            .run("upload", || {
                let cc = cc.clone();
                async move {
                    if cc.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ApiError::RateLimited)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_rate_limit_is_fatal() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = calls.clone();
        let result: Result<(), _> = policy()
            .run("upload", || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::RateLimited)
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted(UploaderError::RateLimitExceeded(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = calls.clone();
        let result: Result<(), _> = policy()
            .run("wait", || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::Upload("bad file".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Api(ApiError::Upload(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
