//! Retry Policy
//!
//! Linear backoff with bounded random jitter:
//!
//! ```text
//! delay(n) = n × base_delay + uniform(0, jitter_ceiling)
//! ```
//!
//! The jitter source is owned by the policy instance. Seed it to get a
//! reproducible delay sequence in tests.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, warn};

use super::error::TransferError;
use crate::config::RetryConfig;

/// Outcome of a single failed attempt, as seen by [`RetryPolicy::run`].
#[derive(Debug)]
pub enum AttemptError {
    /// Transient failure. Consumes one attempt and backs off.
    Retryable(String),
    /// Surfaced to the caller immediately; the retry budget is not touched.
    Fatal(TransferError),
}

/// Backoff calculator and bounded retry driver
pub struct RetryPolicy {
    base_delay: Duration,
    jitter_ceiling: Duration,
    max_attempts: u32,
    rng: Mutex<StdRng>,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

    /// Create a policy with an entropy-seeded jitter source
    pub fn new(base_delay: Duration, jitter_ceiling: Duration, max_attempts: u32) -> Self {
        Self::with_rng(base_delay, jitter_ceiling, max_attempts, StdRng::from_entropy())
    }

    /// Create a policy whose jitter sequence is fully determined by `seed`
    pub fn seeded(
        base_delay: Duration,
        jitter_ceiling: Duration,
        max_attempts: u32,
        seed: u64,
    ) -> Self {
        Self::with_rng(
            base_delay,
            jitter_ceiling,
            max_attempts,
            StdRng::seed_from_u64(seed),
        )
    }

    fn with_rng(
        base_delay: Duration,
        jitter_ceiling: Duration,
        max_attempts: u32,
        rng: StdRng,
    ) -> Self {
        Self {
            base_delay,
            jitter_ceiling,
            // at least one attempt is always made
            max_attempts: max_attempts.max(1),
            rng: Mutex::new(rng),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let base = Duration::from_millis(config.base_delay_ms);
        let jitter = Duration::from_millis(config.jitter_ms);
        match config.seed {
            Some(seed) => Self::seeded(base, jitter, config.max_attempts, seed),
            None => Self::new(base, jitter, config.max_attempts),
        }
    }

    /// Total attempts allowed for one operation
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deterministic component of the backoff: `attempt × base_delay`
    #[inline]
    pub fn base_component(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Backoff to wait after failed attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_component(attempt) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let ceiling_ms = self.jitter_ceiling.as_millis() as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Duration::from_millis(rng.gen_range(0..=ceiling_ms))
    }

    /// Drive `attempt_fn` until it succeeds, fails fatally, or the budget is spent.
    ///
    /// `attempt_fn` receives the 1-based attempt number. After a retryable
    /// failure the driver sleeps `delay(attempt)` before the next attempt;
    /// no sleep follows the final attempt. Exactly `max_attempts` attempts are
    /// made before [`TransferError::RetryExhausted`] is returned.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt_fn: F,
    ) -> Result<T, TransferError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut last_cause = String::new();

        for attempt in 1..=self.max_attempts {
            match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(cause)) => {
                    if attempt < self.max_attempts {
                        let delay = self.delay(attempt);
                        warn!(
                            operation,
                            attempt,
                            max_attempts = self.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            cause = %cause,
                            "Attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_cause = cause;
                }
            }
        }

        error!(
            operation,
            attempts = self.max_attempts,
            last_cause = %last_cause,
            "Retry budget exhausted"
        );
        Err(TransferError::RetryExhausted {
            operation,
            attempts: self.max_attempts,
            last_cause,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_BASE_DELAY,
            Duration::ZERO,
            Self::DEFAULT_MAX_ATTEMPTS,
        )
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("base_delay", &self.base_delay)
            .field("jitter_ceiling", &self.jitter_ceiling)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
