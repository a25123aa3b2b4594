use super::error::DirectError;
use crate::config::RetryConfig;
use crate::transport::http::truncate;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Bounded retry with exponential backoff and jitter for one outbound send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Backoff before `attempt` (2-based): `2^attempt * base + jitter`.
    pub fn delay_before(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).saturating_add(jitter)
    }

    fn sample_jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// Run `send_once` until it succeeds, fails with a non-transient error, or
/// `max_attempts` is used up. The last error is returned in the failure cases.
pub async fn send_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut send_once: F,
) -> Result<T, DirectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DirectError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match send_once().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                attempt += 1;
                let delay = policy.delay_before(attempt, policy.sample_jitter());
                warn!(
                    "{} failed ({}), retrying in {}ms (attempt {}/{})",
                    label,
                    truncate(&e.to_string(), 100),
                    delay.as_millis(),
                    attempt,
                    max_attempts
                );
                sleep(delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!("{} gave up after {} attempts: {}", label, attempt, e);
                }
                return Err(e);
            }
        }
    }
}
