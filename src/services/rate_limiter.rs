use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration, Instant};
use parking_lot::Mutex;

/// Spaces out requests to the Agworld API.
///
/// The delay doubles every time the upstream answers 429 and falls back to
/// the configured base once a request goes through again.
pub struct RateLimiter {
    /// Semaphore to limit concurrent requests
    semaphore: Arc<Semaphore>,
    /// Last request timestamp to enforce minimum delay between requests
    last_request: Arc<Mutex<Instant>>,
    base_delay: Duration,
    current_delay: Mutex<Duration>,
    max_delay: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `max_concurrent` - Maximum number of concurrent API requests
    /// * `requests_per_minute` - Maximum requests per minute
    pub fn new(max_concurrent: usize, requests_per_minute: u32) -> Self {
        let min_delay_ms = 60_000 / requests_per_minute.max(1) as u64;
        let base_delay = Duration::from_millis(min_delay_ms);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            last_request: Arc::new(Mutex::new(
                Instant::now().checked_sub(Duration::from_secs(60)).unwrap_or_else(Instant::now),
            )),
            base_delay,
            current_delay: Mutex::new(base_delay),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Acquire permission to make a request
    ///
    /// Waits for a concurrency permit, then until the current delay has passed
    /// since the previous request. The permit is released when the guard drops.
    pub async fn acquire(&self) -> Option<RateLimitGuard> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;

        let wait_time = {
            let last = self.last_request.lock();
            let min_delay = *self.current_delay.lock();
            let elapsed = last.elapsed();

            if elapsed < min_delay {
                Some(min_delay - elapsed)
            } else {
                None
            }
        }; // Lock is dropped here

        if let Some(delay) = wait_time {
            sleep(delay).await;
        }

        *self.last_request.lock() = Instant::now();

        Some(RateLimitGuard { _permit: permit })
    }

    /// Double the spacing after the upstream rate-limited us.
    pub fn penalize(&self) {
        let mut delay = self.current_delay.lock();
        *delay = (*delay * 2).min(self.max_delay);
        tracing::warn!("⏳ Rate limited by Agworld, request spacing now {:?}", *delay);
    }

    /// Return to the base spacing after a successful request.
    pub fn reset(&self) {
        *self.current_delay.lock() = self.base_delay;
    }

    pub fn current_delay(&self) -> Duration {
        *self.current_delay.lock()
    }

    /// Get the current utilization (for monitoring)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Guard that holds a rate limit permit
/// The permit is automatically released when this is dropped
pub struct RateLimitGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
