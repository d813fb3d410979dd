//! Retry utilities with exponential backoff
//!
//! Nothing in the pipeline retries on its own. These helpers back
//! [`RetryMiddleware`](crate::middleware::RetryMiddleware) and can be used
//! directly around any fallible async operation.
//!
//! # Examples
//!
//! ```rust,no_run
//! use chat_pipeline::retry::{retry_with_backoff_conditional, RetryConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> chat_pipeline::Result<()> {
//! let config = RetryConfig::default()
//!     .with_max_attempts(3)
//!     .with_initial_delay(Duration::from_millis(250));
//!
//! let answer = retry_with_backoff_conditional(config, || async {
//!     Ok::<_, chat_pipeline::Error>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::utils::cancellable;
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    pub max_delay: Duration,

    /// Multiplier for exponential backoff (2.0 doubles the delay each time)
    pub backoff_multiplier: f64,

    /// Random jitter as a fraction of the delay (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (clamped to 0.0..=1.0)
    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt + 1`
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponential = base_ms * self.backoff_multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let delay = capped + jitter - (jitter_range / 2.0);

        Duration::from_millis(delay.max(0.0) as u64)
    }
}

/// Retry an async operation on any error
pub async fn retry_with_backoff<F, Fut, T>(config: RetryConfig, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run(config, &CancellationToken::new(), operation, |_| true).await
}

/// Retry an async operation, but only on errors [`is_retryable_error`]
/// accepts. Anything else is returned after the first attempt.
pub async fn retry_with_backoff_conditional<F, Fut, T>(config: RetryConfig, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run(config, &CancellationToken::new(), operation, is_retryable_error).await
}

/// Like [`retry_with_backoff_conditional`], but gives up with
/// [`Error::Cancelled`] as soon as `cancel` fires, whether an attempt or a
/// backoff sleep is in flight.
pub async fn retry_with_backoff_cancellable<F, Fut, T>(
    config: RetryConfig,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run(config, cancel, operation, is_retryable_error).await
}

async fn run<F, Fut, T, P>(
    config: RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
    should_retry: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match cancellable(cancel, operation()).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !should_retry(&err) {
                    return Err(err);
                }
                log::debug!("attempt {}/{} failed: {}", attempt + 1, attempts, err);
                last_error = Some(err);

                if attempt + 1 < attempts {
                    cancellable(cancel, async {
                        sleep(config.delay_for(attempt)).await;
                        Ok(())
                    })
                    .await?;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("Retry failed with no error")))
}

/// Determine if an error is transient.
///
/// Network failures, timeouts, rate limiting and 5xx/429 responses are
/// retryable. Capability gaps, tool failures, cancellation, malformed
/// payloads and caller mistakes are not.
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Http(_) | Error::Timeout | Error::RateLimited(_) => true,
        Error::Api(msg) => matches!(status_code(msg), Some(429 | 500..=599)),
        Error::CapabilityNotSupported { .. }
        | Error::ToolExecution(_)
        | Error::Cancelled
        | Error::ProtocolDecode(_)
        | Error::Config(_)
        | Error::InvalidInput(_) => false,
        _ => false,
    }
}

/// First token of an API error message that looks like an HTTP status
fn status_code(msg: &str) -> Option<u16> {
    msg.split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|code| (100..600).contains(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(30))
            .with_backoff_multiplier(1.5)
            .with_jitter_factor(2.0);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.jitter_factor, 1.0);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300))
            .with_jitter_factor(0.0);

        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(300));
        assert_eq!(config.delay_for(6), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(5));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = retry_with_backoff(config, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(Error::timeout())
                } else {
                    Ok::<i32, Error>(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let config = RetryConfig::new()
            .with_max_attempts(2)
            .with_initial_delay(Duration::from_millis(5));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = retry_with_backoff(config, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, Error>(Error::timeout()) }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_conditional_stops_on_permanent_error() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(5));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = retry_with_backoff_conditional(config, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), Error>(Error::unsupported("complete", "Stub")) }
        })
        .await;

        assert!(matches!(result, Err(Error::CapabilityNotSupported { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_retrying() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_secs(2))
            .with_jitter_factor(0.0);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let started = std::time::Instant::now();
        let result = retry_with_backoff_cancellable(config, &cancel, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), Error>(Error::timeout()) }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::timeout()));
        assert!(is_retryable_error(&Error::rate_limited("slow down")));
        assert!(is_retryable_error(&Error::api("503 Service Unavailable: busy")));
        assert!(is_retryable_error(&Error::api("429 Too Many Requests: wait")));
        assert!(!is_retryable_error(&Error::api("400 Bad Request: nope")));
        assert!(!is_retryable_error(&Error::api("401 Unauthorized: model 5000")));
        assert!(!is_retryable_error(&Error::config("Invalid config")));
        assert!(!is_retryable_error(&Error::invalid_input("Bad input")));
        assert!(!is_retryable_error(&Error::tool("lookup: failed")));
        assert!(!is_retryable_error(&Error::Cancelled));
        assert!(!is_retryable_error(&Error::protocol("bad line")));
        assert!(!is_retryable_error(&Error::unsupported("complete", "Stub")));
    }
}
