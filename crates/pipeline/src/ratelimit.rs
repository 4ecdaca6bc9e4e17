//! Fixed-window request counting over the shared store.
//!
//! Each key gets one counter per unix minute. The counter is created by an
//! atomic increment that sets its TTL only when the key is new, so concurrent
//! instances share one count and stale windows clean themselves up.

use std::time::Duration;

use apiguard_storage::{SharedBackend, SharedClock};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::error::{GuardError, Result};

const COUNTER_PREFIX: &str = "ratelimit/";

/// Per-minute request counter.
#[derive(Clone)]
pub struct RateLimiter {
    backend: SharedBackend,
    clock: SharedClock,
    counter_ttl: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("counter_ttl", &self.counter_ttl).finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter whose counters expire after `counter_ttl`.
    #[must_use]
    pub fn new(backend: SharedBackend, clock: SharedClock, counter_ttl: Duration) -> Self {
        Self { backend, clock, counter_ttl }
    }

    fn counter_key(&self, key: &str) -> Vec<u8> {
        let minute = self.clock.now().timestamp().div_euclid(60);
        format!("{COUNTER_PREFIX}{}/{minute}", URL_SAFE_NO_PAD.encode(key)).into_bytes()
    }

    /// Counts one call for `key` in the current minute.
    ///
    /// # Errors
    ///
    /// [`GuardError::RateLimited`] once the count exceeds `max_per_minute`,
    /// or [`GuardError::Storage`] if the counter cannot be incremented.
    pub async fn check(&self, key: &str, max_per_minute: u32) -> Result<()> {
        let count = self.backend.increment(&self.counter_key(key), Some(self.counter_ttl)).await?;
        if count > i64::from(max_per_minute) {
            tracing::warn!(
                audit.action = "rate_limited",
                key,
                count,
                limit = max_per_minute,
                "rate limit reached"
            );
            return Err(GuardError::RateLimited { limit: max_per_minute });
        }
        Ok(())
    }
}
