use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;

use crate::config::EnrichmentConfig;
use crate::error::{PipelineError, Result};
use crate::metrics::EnrichmentMetrics;

/// Process-wide token bucket in front of the text service.
///
/// The bucket starts empty and refills continuously at
/// `requests_per_min / 60` tokens per second up to `burst`. Clones share one
/// bucket.
///
/// Callers first pass [`admit`](Self::admit), which caps how many tasks
/// compete for tokens at once: half of what the bucket refills within the
/// acquisition timeout. A large backlog then queues there instead of
/// timing out at the bucket.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    refill_per_sec: f64,
    capacity: f64,
    acquire_timeout: Duration,
    in_flight: Semaphore,
    max_in_flight: usize,
    // (tokens, last refill)
    bucket: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    pub fn new(requests_per_min: u32, burst: u32, acquire_timeout: Duration) -> Self {
        let refill_per_sec = f64::from(requests_per_min.max(1)) / 60.0;
        let max_in_flight = ((refill_per_sec * acquire_timeout.as_secs_f64()) / 2.0).floor().max(1.0) as usize;
        Self {
            inner: Arc::new(Inner {
                refill_per_sec,
                capacity: f64::from(burst.max(1)),
                acquire_timeout,
                in_flight: Semaphore::new(max_in_flight),
                max_in_flight,
                bucket: Mutex::new((0.0, Instant::now())),
            }),
        }
    }

    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self::new(config.requests_per_minute, config.burst, config.acquire_timeout())
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight
    }

    /// Wait for a slot among the tasks allowed to call [`acquire`](Self::acquire).
    /// Hold the permit until the task is finished, retries included.
    pub async fn admit(&self) -> Result<SemaphorePermit<'_>> {
        self.inner
            .in_flight
            .acquire()
            .await
            .map_err(|_| PipelineError::EnrichmentTransient("rate limiter closed".to_string()))
    }

    /// Wait for one token. Returns how long the caller waited.
    ///
    /// Fails with [`PipelineError::RateLimited`] once the acquisition timeout
    /// elapses. A token is only taken while the bucket lock is held, so a
    /// cancelled or timed-out waiter never consumes one.
    pub async fn acquire(&self) -> Result<Duration> {
        let started = Instant::now();
        match tokio::time::timeout(self.inner.acquire_timeout, self.take_token()).await {
            Ok(()) => {
                let waited = started.elapsed();
                EnrichmentMetrics::record_limiter_wait(waited.as_secs_f64());
                Ok(waited)
            }
            Err(_) => {
                EnrichmentMetrics::record_rate_limited();
                Err(PipelineError::RateLimited(self.inner.acquire_timeout))
            }
        }
    }

    async fn take_token(&self) {
        loop {
            let mut guard = self.inner.bucket.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *tokens = (*tokens + elapsed * self.inner.refill_per_sec).min(self.inner.capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                return;
            }

            let secs = (1.0 - *tokens) / self.inner.refill_per_sec;
            drop(guard);
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.001))).await;
        }
    }
}
