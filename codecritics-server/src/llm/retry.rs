//! Bounded retry with exponential backoff for provider calls.

use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use super::LlmError;

/// Three attempts total: the initial call plus this many retries.
const MAX_RETRIES: u32 = 2;
const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
        }
    }
}

/// Run `operation`, retrying retryable failures with exponential backoff.
/// A rate-limited error that carries a server-indicated reset waits that
/// long instead (still bounded by the attempt cap).
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;

                let delay = e.retry_after().unwrap_or_else(|| {
                    std::cmp::min(config.base_delay * 2u32.pow(attempt - 1), config.max_delay)
                });

                warn!(
                    "Provider call failed (attempt {}/{}), retrying in {:?}: {}",
                    attempt,
                    config.max_retries + 1,
                    delay,
                    e
                );

                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let result = with_retry(&fast_config(), || async {
            Ok::<_, LlmError>("reply".to_string())
        })
        .await;
        assert_eq!(result.unwrap(), "reply");
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = with_retry(&fast_config(), || {
            let attempts = attempts_clone.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LlmError::Timeout(Duration::from_millis(1)))
                } else {
                    Ok("reply".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "reply");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempt_cap() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<String, _> = with_retry(&fast_config(), || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Timeout(Duration::from_millis(1)))
            }
        })
        .await;

        assert!(result.is_err());
        // Initial attempt plus two retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<String, _> = with_retry(&fast_config(), || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Authentication("bad key".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_honors_server_indicated_reset() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let start = std::time::Instant::now();

        let result: Result<String, _> = with_retry(
            &RetryConfig {
                max_retries: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::RateLimited {
                        retry_after: Some(Duration::from_millis(50)),
                    })
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
