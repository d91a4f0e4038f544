//! Retry policy with exponential backoff.
//!
//! One reusable abstraction parameterized over any fallible async
//! operation, replacing per-call-site attempt loops.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::GenerationConfig;
use crate::metrics::GENERATION_RETRIES_TOTAL;

/// Exponential backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
        }
    }

    /// Delay to sleep after the given 1-based attempt fails.
    ///
    /// The first failure waits `base_delay`, each later one multiplies
    /// it again.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        let delayed = if self.jitter_factor > 0.0 {
            let jitter_range = base * self.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (base + jitter).max(0.0)
        } else {
            base
        };

        Duration::from_millis(delayed as u64)
    }

    /// Drive `op` until it succeeds or the attempt budget is exhausted,
    /// sleeping between attempts.
    ///
    /// The closure receives the 1-based attempt number. The error of
    /// the final attempt is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    GENERATION_RETRIES_TOTAL.inc();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
