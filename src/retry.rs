//! Bounded exponential backoff for fallible side effects.
//!
//! Retry policy lives here, not in the DAG engine: operators that talk to
//! the outside world (PDF download, webhook push, catalog fetch) wrap just
//! the outbound call, so a retried request never re-runs surrounding logic.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// Policy used for PDF downloads: 3 attempts, 1s..10s.
    pub fn download() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(10))
    }

    /// Policy used for webhook pushes: effectively "keep trying", 1s..10s.
    pub fn webhook() -> Self {
        Self::new(100, Duration::from_secs(1), Duration::from_secs(10))
    }

    /// Policy used for catalog fetches at the transport layer.
    pub fn catalog() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(10))
    }

    /// Delay before the retry following `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let raw = self.base_delay.mul_f64(factor);
        raw.min(self.max_delay)
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// The last error is returned when every attempt fails. `label` names the
/// operation in retry logs.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < policy.max_attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    "{label} failed (attempt {}/{}): {err}; retrying in {delay:?}",
                    attempt + 1,
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
