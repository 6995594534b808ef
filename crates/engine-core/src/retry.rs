use connectors::DbError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

/// Indicates whether an error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    Stop,
}

/// Result of running an operation under the retry policy.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The error was considered fatal and should bubble up immediately.
    #[error("{0}")]
    Fatal(E),
    /// The error was retryable, but the configured attempts were exhausted.
    #[error("retries exhausted: {0}")]
    AttemptsExceeded(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal(e) | RetryError::AttemptsExceeded(e) => e,
        }
    }
}

/// Exponential backoff: attempt `n` waits `min(max_delay, initial_delay *
/// backoff_base^n)` plus up to 10% jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub backoff_base: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            backoff_base: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

const MAX_JITTER_RATIO: f64 = 0.1;

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay: if max_delay.is_zero() {
                initial_delay
            } else {
                max_delay
            },
            ..Self::default()
        }
    }

    /// Preset tuned for database/network calls (higher delay, more attempts).
    pub fn for_database() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(250),
            backoff_base: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }

    /// Retries immediately; for tests and dry runs.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
            ..Self::default()
        }
    }

    pub fn with_backoff_base(mut self, base: f64) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn should_retry(&self, attempt: usize, disposition: RetryDisposition) -> bool {
        disposition == RetryDisposition::Retry && attempt < self.max_retries
    }

    pub fn compute_delay(&self, attempt: usize) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay.as_secs_f64() * self.backoff_base.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay.as_secs_f64())
        } else {
            self.max_delay.as_secs_f64()
        };

        let jitter = if self.jitter && capped > 0.0 {
            rand::thread_rng().gen_range(0.0..=capped * MAX_JITTER_RATIO)
        } else {
            0.0
        };
        Duration::from_secs_f64(capped + jitter)
    }

    /// Executes the operation with the configured retry policy. The
    /// operation runs at most `max_retries + 1` times.
    pub async fn run<F, Fut, T, E, Classifier>(
        &self,
        mut op: F,
        classify: Classifier,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        Classifier: Fn(&E) -> RetryDisposition,
    {
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let disposition = classify(&err);
                    if disposition == RetryDisposition::Stop {
                        return Err(RetryError::Fatal(err));
                    }
                    if !self.should_retry(attempt, disposition) {
                        return Err(RetryError::AttemptsExceeded(err));
                    }

                    let delay = self.compute_delay(attempt);
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %err, "Retrying after transient failure");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// `run` for database operations, classified with [`classify_db_error`].
    pub async fn execute_with_retry<F, Fut, T>(&self, op: F) -> Result<T, RetryError<DbError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        self.run(op, classify_db_error).await
    }
}

/// Transient driver errors are retried; data, syntax and configuration
/// errors are not.
pub fn classify_db_error(err: &DbError) -> RetryDisposition {
    if err.is_transient() {
        RetryDisposition::Retry
    } else {
        RetryDisposition::Stop
    }
}
