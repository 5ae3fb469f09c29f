//! Retry logic with exponential backoff for transient provider errors.

use crate::context::CancellationToken;
use crate::error::ProviderError;
use std::time::Duration;

/// Retry configuration for provider calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        // Negative or non-finite factors fall back to the cap
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called before sleeping ahead of the next attempt.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(
        &self,
        _attempt: u32,
        _max_attempts: u32,
        _error: &ProviderError,
        _delay: Duration,
    ) {
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Terminal error, or retryable error after the last attempt
    Failed { error: ProviderError, attempts: u32 },
    /// Cancelled while waiting to retry
    Cancelled { error: ProviderError, attempts: u32 },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Failed { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn error(&self) -> &ProviderError {
        match self {
            RetryError::Failed { error, .. } | RetryError::Cancelled { error, .. } => error,
        }
    }
}

/// Execute an operation with retry logic.
///
/// Retryable errors are retried with exponential backoff up to
/// `config.max_attempts`; terminal errors return immediately. The backoff
/// sleep wakes early when `cancel` fires.
///
/// On success returns the value together with the number of attempts used.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<(T, u32), RetryError>
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation() {
            Ok(value) => return Ok((value, attempt)),
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            return Err(RetryError::Failed {
                error,
                attempts: attempt,
            });
        }

        let delay = config.delay_for_attempt(attempt - 1);
        if let Some(cb) = callback {
            cb.on_retry(attempt, max_attempts, &error, delay);
        }

        if cancel.wait_timeout(delay) {
            return Err(RetryError::Cancelled {
                error,
                attempts: attempt,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use std::cell::Cell;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_retry_config_delay() {
        let config = RetryConfig::new(5, Duration::from_secs(1), 2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_config_delay_with_invalid_factor() {
        let negative = RetryConfig::new(5, Duration::from_millis(1), -2.0);
        assert_eq!(negative.delay_for_attempt(0), Duration::from_millis(1));
        assert_eq!(negative.delay_for_attempt(1), negative.max_delay);

        let nan = RetryConfig::new(5, Duration::from_millis(1), f64::NAN);
        assert_eq!(nan.delay_for_attempt(1), nan.max_delay);
    }

    #[test]
    fn test_with_retry_negative_factor_still_retries() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            backoff_factor: -2.0,
            max_delay: Duration::from_millis(5),
        };
        let attempts = Cell::new(0);
        let result = with_retry(&config, &CancellationToken::new(), None, || {
            let current = attempts.get();
            attempts.set(current + 1);
            if current < 2 {
                Err(ProviderError::transient("timeout"))
            } else {
                Ok("done")
            }
        });

        assert_eq!(result.unwrap(), ("done", 3));
    }

    #[test]
    fn test_with_retry_success_first_try() {
        let result = with_retry(&RetryConfig::no_retry(), &CancellationToken::new(), None, || {
            Ok::<_, ProviderError>(42)
        });
        assert_eq!(result.unwrap(), (42, 1));
    }

    #[test]
    fn test_with_retry_terminal_error() {
        let attempts = Cell::new(0);
        let result: Result<((), u32), _> =
            with_retry(&fast(5), &CancellationToken::new(), None, || {
                attempts.set(attempts.get() + 1);
                Err(ProviderError::new(ErrorCategory::PermissionDenied, "denied"))
            });

        assert_eq!(result.unwrap_err().attempts(), 1);
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_with_retry_eventual_success() {
        let attempts = Cell::new(0);
        let result = with_retry(&fast(3), &CancellationToken::new(), None, || {
            let current = attempts.get();
            attempts.set(current + 1);
            if current < 2 {
                Err(ProviderError::new(ErrorCategory::RateLimit, "slow down"))
            } else {
                Ok("done")
            }
        });

        assert_eq!(result.unwrap(), ("done", 3));
    }

    #[test]
    fn test_with_retry_all_attempts_fail() {
        let attempts = Cell::new(0);
        let result: Result<((), u32), _> =
            with_retry(&fast(3), &CancellationToken::new(), None, || {
                attempts.set(attempts.get() + 1);
                Err(ProviderError::transient("timeout"))
            });

        assert!(matches!(result, Err(RetryError::Failed { attempts: 3, .. })));
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_with_retry_cancelled_during_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<((), u32), _> = with_retry(&fast(5), &cancel, None, || {
            Err(ProviderError::transient("timeout"))
        });

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1, .. })));
    }

    #[test]
    fn test_callback_invoked() {
        struct CountingCallback(Cell<u32>);
        impl RetryCallback for CountingCallback {
            fn on_retry(&self, _: u32, _: u32, _: &ProviderError, _: Duration) {
                self.0.set(self.0.get() + 1);
            }
        }

        let callback = CountingCallback(Cell::new(0));
        let _: Result<((), u32), _> =
            with_retry(&fast(3), &CancellationToken::new(), Some(&callback), || {
                Err(ProviderError::transient("timeout"))
            });

        // Called for each retry, not for the final failure
        assert_eq!(callback.0.get(), 2);
    }
}
