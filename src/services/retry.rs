use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::config::{env_parse, ConfigError, EnvLookup};
use crate::external::data_source::{DataSourceError, ErrorClass};

/// Retry policy for upstream fetches.
///
/// Attempt `n` (1-based) that fails with a qualifying error is followed by a
/// wait of `base_delay * 2^(n-1)`, capped at `max_delay`. Rate-limit errors
/// multiply that wait by `rate_limit_multiplier`, or honour the upstream's
/// `Retry-After` when it asks for longer.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 3 means at most 4 calls.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_multiplier: u32,
    pub retry_transient: bool,
    pub retry_rate_limited: bool,
    /// Add up to 10% random jitter to each wait.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(120),
            rate_limit_multiplier: 2,
            retry_transient: true,
            retry_rate_limited: true,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_lookup(lookup: EnvLookup) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_retries: env_parse(lookup, "RETRY_MAX_RETRIES", defaults.max_retries)?,
            base_delay: Duration::from_millis(env_parse(
                lookup,
                "RETRY_BASE_DELAY_MS",
                defaults.base_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(env_parse(
                lookup,
                "RETRY_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )?),
            rate_limit_multiplier: env_parse(lookup, "RETRY_RATE_LIMIT_MULTIPLIER", defaults.rate_limit_multiplier)?,
            retry_transient: env_parse(lookup, "RETRY_TRANSIENT", defaults.retry_transient)?,
            retry_rate_limited: env_parse(lookup, "RETRY_RATE_LIMITED", defaults.retry_rate_limited)?,
            jitter: env_parse(lookup, "RETRY_JITTER", defaults.jitter)?,
        })
    }

    /// A policy with tiny delays and no jitter.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            rate_limit_multiplier: 2,
            jitter: false,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, error: &DataSourceError) -> bool {
        match error.class() {
            ErrorClass::Transient => self.retry_transient,
            ErrorClass::RateLimited => self.retry_rate_limited,
            ErrorClass::Fatal => false,
        }
    }

    /// Wait before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, error: &DataSourceError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let mut delay = self.base_delay.saturating_mul(1u32 << exponent);

        if let DataSourceError::RateLimited { retry_after } = error {
            delay = delay.saturating_mul(self.rate_limit_multiplier.max(1));
            if let Some(retry_after) = retry_after {
                delay = delay.max(*retry_after);
            }
        }

        delay.min(self.max_delay)
    }

    /// Longest total sleep one `retry_with_backoff` call can do. A
    /// `Retry-After` header can push any rate-limit wait up to `max_delay`.
    pub fn worst_case_wait(&self) -> Duration {
        (1..=self.max_retries)
            .map(|attempt| {
                let wait = if self.retry_rate_limited {
                    self.max_delay
                } else if self.retry_transient {
                    self.delay_for(attempt, &DataSourceError::Timeout)
                } else {
                    Duration::ZERO
                };
                if self.jitter && !wait.is_zero() {
                    wait + wait / 10 + Duration::from_millis(1)
                } else {
                    wait
                }
            })
            .sum()
    }

    /// Longest one fetch can take: every attempt runs into
    /// `request_timeout` and every wait is the worst case.
    pub fn worst_case_duration(&self, request_timeout: Duration) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        self.worst_case_wait()
            .saturating_add(request_timeout.saturating_mul(attempts))
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let max_jitter = (delay.as_millis() as u64 / 10).max(1);
        delay + Duration::from_millis(rand::rng().random_range(0..=max_jitter))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retry budget is spent. The last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, DataSourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DataSourceError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("✅ {} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if policy.should_retry(&e) && attempt <= policy.max_retries => {
                let delay = policy.with_jitter(policy.delay_for(attempt, &e));
                warn!(
                    "🔁 {} failed on attempt {}/{}: {} (retrying in {:?})",
                    label,
                    attempt,
                    policy.max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if policy.should_retry(&e) {
                    warn!("❌ {} gave up after {} attempts: {}", label, attempt, e);
                } else {
                    warn!("❌ {} failed with non-retryable error: {}", label, e);
                }
                return Err(e);
            }
        }
    }
}
