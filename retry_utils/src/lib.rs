use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Classification of errors for retry strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryableError {
    /// 429 Rate Limit, optionally carrying the provider's Retry-After hint
    RateLimit { retry_after: Option<Duration> },
    /// 5xx Server Error
    ServerError,
    /// Network timeout
    Timeout,
    /// Other errors - don't retry
    Other,
}

/// Doubling backoff with a per-step ceiling and a total budget.
///
/// Provider hints (Retry-After) replace the computed step for that attempt but
/// still count against the budget. The computed step doubles regardless.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_delay: Duration,
    max_total: Option<Duration>,
    next: Duration,
    spent: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max_delay: Duration) -> Self {
        Self {
            max_delay,
            max_total: None,
            next: initial,
            spent: Duration::ZERO,
        }
    }

    pub fn with_budget(mut self, max_total: Duration) -> Self {
        self.max_total = Some(max_total);
        self
    }

    /// Delay to wait before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self, hint: Option<Duration>) -> Option<Duration> {
        let delay = hint.unwrap_or(self.next);

        if let Some(max_total) = self.max_total {
            if self.spent + delay > max_total {
                return None;
            }
        }

        self.spent += delay;
        self.next = (self.next * 2).min(self.max_delay);
        Some(delay)
    }

    /// Total time handed out so far
    pub fn spent(&self) -> Duration {
        self.spent
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including initial attempt)
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Retry an async operation with exponential backoff
///
/// # Arguments
/// * `operation` - The async operation to retry (should be a closure that returns a Future)
/// * `config` - Retry configuration
/// * `classify_error` - Function to classify errors for retry strategy
///
/// # Example
/// ```ignore
/// let result = retry_with_backoff(
///     || async { my_api_call().await },
///     &RetryConfig::default(),
///     |e| if e.is_rate_limit() { RetryableError::RateLimit { retry_after: None } } else { RetryableError::Other }
/// ).await;
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    config: &RetryConfig,
    classify_error: impl Fn(&E) -> RetryableError,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut backoff = config.backoff();

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("Operation succeeded after {} retry attempts", attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                let error_type = classify_error(&e);

                let hint = match error_type {
                    RetryableError::Other => {
                        error!("Operation failed with non-retryable error: {}", e);
                        return Err(e);
                    }
                    RetryableError::RateLimit { retry_after } => retry_after,
                    RetryableError::ServerError | RetryableError::Timeout => None,
                };

                if attempt >= config.max_attempts {
                    error!(
                        "Operation failed after {} attempts (max retries exhausted): {}",
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = match backoff.next_delay(hint) {
                    Some(d) => d,
                    None => return Err(e),
                };

                warn!(
                    "Operation failed (attempt {}/{}): {} - Retrying in {}ms (error type: {:?})",
                    attempt + 1,
                    config.max_attempts + 1,
                    e,
                    delay.as_millis(),
                    error_type
                );

                tokio::time::sleep(delay).await;

                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        kind: &'static str,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.kind)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 4,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(500), Duration::from_millis(10_000));
        let delays: Vec<u128> = (0..7)
            .map(|_| backoff.next_delay(None).unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[test]
    fn test_backoff_honors_hint_and_budget() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(500), Duration::from_millis(10_000))
                .with_budget(Duration::from_secs(5));

        assert_eq!(
            backoff.next_delay(Some(Duration::from_secs(3))),
            Some(Duration::from_secs(3))
        );
        // computed step advanced to 1000ms even though the hint was used
        assert_eq!(backoff.next_delay(None), Some(Duration::from_millis(1000)));
        assert_eq!(backoff.next_delay(Some(Duration::from_secs(2))), None);
        assert_eq!(backoff.spent(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_immediate_success() {
        let result = retry_with_backoff(
            || async { Ok::<_, TestError>(42) },
            &RetryConfig::default(),
            |_| RetryableError::Other,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_non_retryable_error() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result = retry_with_backoff(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError { kind: "fatal" })
            },
            &fast_config(3),
            |_| RetryableError::Other,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result = retry_with_backoff(
            move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(TestError { kind: "rate_limit" })
                } else {
                    Ok(42)
                }
            },
            &fast_config(3),
            |_| RetryableError::RateLimit { retry_after: None },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result = retry_with_backoff(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError { kind: "server" })
            },
            &fast_config(2),
            |_| RetryableError::ServerError,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3); // Initial + 2 retries
    }
}
