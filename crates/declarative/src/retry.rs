//! Retry logic with exponential backoff for transient provider errors.

use std::thread;
use std::time::Duration;

use crate::context::CancelToken;

/// Backoff policy for retryable operations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub backoff_factor: f64,
    /// Upper bound on a single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay after a failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        // Negative factors give negative delays, which mean "retry now"
        let capped = delay.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// A config that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Execute an operation with retry logic.
///
/// `operation` receives the 1-indexed attempt number. Errors for which
/// `is_retryable` returns false are returned immediately. `on_retry` is
/// called before each backoff sleep with the attempt that failed, the
/// error and the delay. A cancelled token stops further attempts and the
/// last error is returned.
pub fn with_retry<T, E, F, R, C>(
    config: &RetryConfig,
    cancel: &CancelToken,
    is_retryable: R,
    mut on_retry: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    R: Fn(&E) -> bool,
    C: FnMut(u32, &E, Duration),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !is_retryable(&err) || attempt >= max_attempts || cancel.is_cancelled() {
            return Err(err);
        }

        let delay = config.delay_for_attempt(attempt - 1);
        on_retry(attempt, &err, delay);
        thread::sleep(delay);

        if cancel.is_cancelled() {
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
        }
    }

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Fatal,
    }

    fn retryable(e: &TestError) -> bool {
        *e == TestError::Transient
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig::new(5, Duration::from_secs(1), 2.0);
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn test_success_first_try() {
        let result = with_retry(
            &RetryConfig::no_retry(),
            &CancelToken::new(),
            retryable,
            |_, _, _| {},
            |_| Ok::<_, TestError>(42),
        );
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn test_non_retryable_error() {
        let attempts = Cell::new(0);
        let result: Result<(), _> = with_retry(
            &fast(5),
            &CancelToken::new(),
            retryable,
            |_, _, _| {},
            |_| {
                attempts.set(attempts.get() + 1);
                Err(TestError::Fatal)
            },
        );
        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_eventual_success() {
        let result = with_retry(
            &fast(3),
            &CancelToken::new(),
            retryable,
            |_, _, _| {},
            |attempt| {
                if attempt < 3 {
                    Err(TestError::Transient)
                } else {
                    Ok(attempt)
                }
            },
        );
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_all_attempts_fail_and_callback_counts_retries() {
        let attempts = Cell::new(0);
        let retries = Cell::new(0);
        let result: Result<(), _> = with_retry(
            &fast(3),
            &CancelToken::new(),
            retryable,
            |_, _, _| retries.set(retries.get() + 1),
            |_| {
                attempts.set(attempts.get() + 1);
                Err(TestError::Transient)
            },
        );
        assert_eq!(result, Err(TestError::Transient));
        assert_eq!(attempts.get(), 3);
        // Not called after the last attempt
        assert_eq!(retries.get(), 2);
    }

    #[test]
    fn test_cancel_stops_retries() {
        let cancel = CancelToken::new();
        let attempts = Cell::new(0);
        let result: Result<(), _> = with_retry(
            &fast(5),
            &cancel,
            retryable,
            |_, _, _| {},
            |_| {
                attempts.set(attempts.get() + 1);
                cancel.cancel();
                Err(TestError::Transient)
            },
        );
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_negative_factor_clamps_to_zero() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: -2.0,
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }
}
