//! ============================================================================
//! Retry Logic - Exponential Backoff for Game API Calls
//! ============================================================================
//! Provides bounded retries around remote calls with:
//! - Exponential backoff with jitter between attempts
//! - Error classification (retryable vs permanent vs rate limited)
//! - Prompt exit when the run is cancelled
//! ============================================================================

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::{FacesError, FacesResult};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay between retries (will be multiplied by 2^attempt)
    pub base_delay_ms: u64,
    /// Maximum delay between retries
    pub max_delay_ms: u64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorKind {
    /// Error is likely transient, should retry
    Retryable,
    /// Error is permanent, don't retry
    Permanent,
    /// Rate limited, back off more aggressively
    RateLimited,
}

/// Classify an error to determine if retry is appropriate
pub fn classify_error(error: &FacesError) -> ErrorKind {
    match error {
        FacesError::NetworkFailure(_) => ErrorKind::Retryable,
        FacesError::RateLimited(_) => ErrorKind::RateLimited,
        FacesError::AuthExpired
        | FacesError::NotFound(_)
        | FacesError::ProtocolMismatch(_)
        | FacesError::CacheCorruption(_)
        | FacesError::StorageWriteFailure(_)
        | FacesError::Cancelled => ErrorKind::Permanent,
    }
}

/// Calculate delay with exponential backoff and optional jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    // Cap exponent to prevent overflow
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let base_delay = config.base_delay_ms.saturating_mul(multiplier);
    let capped_delay = base_delay.min(config.max_delay_ms);

    let final_delay = if config.jitter && capped_delay > 0 {
        // Add random jitter (0-50% of delay)
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(0.0..0.5);
        (capped_delay as f64 * jitter_factor) as u64
    } else {
        capped_delay
    };

    Duration::from_millis(final_delay)
}

/// Run `op` until it succeeds, fails permanently, runs out of attempts or
/// the run is cancelled. Returns the last error on exhaustion.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> FacesResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FacesResult<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error = FacesError::NetworkFailure(format!("{}: no attempt made", label));

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = match classify_error(&last_error) {
                ErrorKind::RateLimited => {
                    let delay = Duration::from_millis(config.max_delay_ms);
                    warn!("{}: rate limited, waiting {:?}", label, delay);
                    delay
                }
                _ => calculate_delay(attempt - 1, config),
            };
            debug!("{}: retry attempt {} after {:?} delay", label, attempt, delay);
            tokio::select! {
                _ = cancel.cancelled() => return Err(FacesError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if cancel.is_cancelled() {
            return Err(FacesError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let kind = classify_error(&error);
                warn!(
                    "{}: attempt {}/{} failed ({:?}): {}",
                    label,
                    attempt + 1,
                    attempts,
                    kind,
                    error
                );
                if kind == ErrorKind::Permanent {
                    return Err(error);
                }
                last_error = error;
            }
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
        }
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            classify_error(&FacesError::NetworkFailure("connection reset".into())),
            ErrorKind::Retryable
        );
        assert_eq!(
            classify_error(&FacesError::RateLimited("429".into())),
            ErrorKind::RateLimited
        );
        for permanent in [
            FacesError::AuthExpired,
            FacesError::NotFound("picture".into()),
            FacesError::ProtocolMismatch("missing suggestions".into()),
            FacesError::Cancelled,
        ] {
            assert_eq!(
                classify_error(&permanent),
                ErrorKind::Permanent,
                "Expected Permanent for: {}",
                permanent
            );
        }
    }

    #[test]
    fn test_calculate_delay() {
        let config = RetryConfig {
            jitter: false,
            ..Default::default()
        };

        // Without jitter, delays should be deterministic
        assert_eq!(calculate_delay(0, &config), Duration::from_millis(250));
        assert_eq!(calculate_delay(1, &config), Duration::from_millis(500));
        assert_eq!(calculate_delay(2, &config), Duration::from_millis(1000));
        assert_eq!(calculate_delay(3, &config), Duration::from_millis(2000));
        // Should be capped at max_delay_ms
        assert_eq!(calculate_delay(10, &config), Duration::from_millis(4000));
        assert_eq!(calculate_delay(200, &config), Duration::from_millis(4000));
    }

    #[test]
    fn test_calculate_delay_with_jitter() {
        let config = RetryConfig {
            jitter: true,
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            ..Default::default()
        };

        // With jitter, delay should be in range [base, base * 1.5]
        for _ in 0..10 {
            let delay = calculate_delay(0, &config);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let result = with_retry(&fast_config(3), "submit", &cancel, move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(FacesError::NetworkFailure("timeout".into()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let result: FacesResult<()> = with_retry(&fast_config(2), "submit", &cancel, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(FacesError::NetworkFailure("reset".into()))
        })
        .await;

        assert_eq!(result, Err(FacesError::NetworkFailure("reset".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let cancel = CancellationToken::new();

        let result: FacesResult<()> = with_retry(&fast_config(5), "next", &cancel, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(FacesError::AuthExpired)
        })
        .await;

        assert_eq!(result, Err(FacesError::AuthExpired));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: FacesResult<()> =
            with_retry(&fast_config(3), "fetch", &cancel, || async { Ok(()) }).await;
        assert_eq!(result, Err(FacesError::Cancelled));
    }
}
