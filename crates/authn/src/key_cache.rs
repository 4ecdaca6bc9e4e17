//! In-memory cache of the verification key set.
//!
//! Validation needs the public key set on every call; loading it means a
//! prefix scan against the shared store. [`VerificationKeyCache`] serves the
//! last loaded set for a bounded TTL and coalesces concurrent misses into a
//! single load.
//!
//! # Cache Strategy
//!
//! - **TTL**: [`AuthnConfig::key_cache_ttl`](crate::AuthnConfig::key_cache_ttl), default one hour
//! - **Misses**: concurrent callers share one in-flight load
//! - **Refresh**: on demand via [`VerificationKeyCache::force_refresh`], never on a timer

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use moka::future::Cache;

use crate::{
    error::{AuthError, Result},
    jwks::PublicKeySet,
};

/// Something that can load the current verification key set.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Loads every currently valid public key.
    async fn load(&self) -> Result<PublicKeySet>;
}

/// TTL cache over a [`KeySetSource`].
#[derive(Clone)]
pub struct VerificationKeyCache {
    source: Arc<dyn KeySetSource>,
    cache: Cache<(), Arc<PublicKeySet>>,
    ttl: Duration,
}

impl fmt::Debug for VerificationKeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKeyCache")
            .field("ttl", &self.ttl)
            .field("cached", &self.cache.contains_key(&()))
            .finish()
    }
}

impl VerificationKeyCache {
    /// Creates an empty cache; the first [`get`](Self::get) loads.
    #[must_use]
    pub fn new(source: Arc<dyn KeySetSource>, ttl: Duration) -> Self {
        Self { source, cache: Cache::builder().time_to_live(ttl).max_capacity(1).build(), ttl }
    }

    /// Returns the cached key set, loading it if absent or expired.
    ///
    /// # Errors
    ///
    /// [`AuthError::KeyRefresh`] wrapping the load failure. Failures are not
    /// cached; the next call tries again.
    pub async fn get(&self) -> Result<Arc<PublicKeySet>> {
        let source = Arc::clone(&self.source);
        self.cache
            .try_get_with((), async move { source.load().await.map(Arc::new) })
            .await
            .map_err(AuthError::KeyRefresh)
    }

    /// Discards the cached set and loads a new one.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    #[tracing::instrument(skip(self))]
    pub async fn force_refresh(&self) -> Result<Arc<PublicKeySet>> {
        self.cache.invalidate(&()).await;
        let keys = self.get().await?;
        tracing::debug!(count = keys.len(), "verification keys refreshed");
        Ok(keys)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use apiguard_storage::StorageError;

    use super::*;

    #[derive(Default)]
    struct CountingSource {
        loads: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl KeySetSource for CountingSource {
        async fn load(&self) -> Result<PublicKeySet> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::connection("store down").into());
            }
            PublicKeySet::from_records(&[])
        }
    }

    #[tokio::test]
    async fn test_hit_does_not_reload() {
        let source = Arc::new(CountingSource::default());
        let cache = VerificationKeyCache::new(source.clone(), Duration::from_secs(60));

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        cache.force_refresh().await.unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_coalesce() {
        let source = Arc::new(CountingSource::default());
        let cache = VerificationKeyCache::new(source.clone(), Duration::from_secs(60));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get().await.map(|_| ()) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let source = Arc::new(CountingSource::default());
        source.fail.store(true, Ordering::SeqCst);
        let cache = VerificationKeyCache::new(source.clone(), Duration::from_secs(60));

        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, AuthError::KeyRefresh(_)));
        assert!(err.is_internal());

        source.fail.store(false, Ordering::SeqCst);
        assert!(cache.get().await.is_ok());
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }
}
