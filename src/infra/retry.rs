//! Retry with exponential backoff and jitter.
//!
//! Used for three distinct failure families: version-conflict reapplies on
//! document writes, transient database errors, and outbound delivery
//! (notifications, webhook callbacks).

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = only the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on exponential growth.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Jitter factor in [0, 1]; 0 disables jitter.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Reapplying a document operation after a lost conditional write.
    /// Conflicts resolve quickly; keep delays short.
    pub fn conflict() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(250),
            multiplier: 2.0,
            jitter: 0.3,
        }
    }

    /// Transient database errors.
    pub fn database() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    /// Outbound notification delivery (email/SMS provider).
    pub fn notification() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    /// Webhook callback delivery to external initiators (most patient).
    pub fn webhook() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delayed = if self.jitter > 0.0 {
            let range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-range..=range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(delayed)
    }
}

/// Retry executor.
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`, retrying while `should_retry` approves the error
    /// and the retry budget lasts.
    pub async fn run_with_predicate<F, Fut, T, E, P>(
        &self,
        operation: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempts > self.config.max_retries || !should_retry(&e) {
                        return Err(e);
                    }

                    let delay = self.config.delay_for_attempt(attempts - 1);
                    tracing::debug!(
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Run `operation` with retries on every error, logging under `context`.
    pub async fn run_with_context<F, Fut, T, E>(&self, context: &str, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(context, attempts, "succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempts > self.config.max_retries {
                        tracing::warn!(context, attempts, error = %e, "retries exhausted");
                        return Err(e);
                    }

                    let delay = self.config.delay_for_attempt(attempts - 1);
                    tracing::warn!(
                        context,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Transient database errors worth retrying.
pub fn is_retryable_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => false,
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().unwrap_or_default();
            // serialization failure, deadlock, connection exceptions
            code == "40001" || code == "40P01" || code.starts_with("08")
        }
        _ => false,
    }
}
