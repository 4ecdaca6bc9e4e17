//! Shared test utilities for code built on [`StorageBackend`].
//!
//! Feature-gated behind `testutil` so it never leaks into production builds:
//!
//! ```toml
//! [dev-dependencies]
//! apiguard-storage = { workspace = true, features = ["testutil"] }
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    StorageBackend,
    clock::ManualClock,
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
    transaction::Transaction,
    types::{KeyRange, KeyValue},
};

/// Unix time every manual test clock starts at (2023-11-14T22:13:20Z).
pub const TEST_EPOCH: i64 = 1_700_000_000;

/// Creates a [`MemoryBackend`] driven by a fresh [`ManualClock`] at
/// [`TEST_EPOCH`], returning both.
#[must_use]
pub fn manual_backend() -> (MemoryBackend, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_unix(TEST_EPOCH));
    (MemoryBackend::with_clock(clock.clone()), clock)
}

/// Create a deterministic test key from a prefix and index, zero-padded so
/// lexicographic order matches numeric order.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}:{idx:06}").into_bytes()
}

/// Wraps a [`MemoryBackend`] and injects failures on demand.
///
/// Counts prefix scans so cache tests can assert how often the store was hit.
#[derive(Clone)]
pub struct FaultyBackend {
    inner: MemoryBackend,
    fail_commits: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    scans: Arc<AtomicUsize>,
}

impl FaultyBackend {
    /// Wraps `inner` with every fault disabled.
    #[must_use]
    pub fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            fail_commits: Arc::new(AtomicBool::new(false)),
            fail_reads: Arc::new(AtomicBool::new(false)),
            scans: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes every subsequent transaction commit fail.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent read fail with a connection error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of prefix or range scans served so far.
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    fn check_reads(&self) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::connection("injected read failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FaultyBackend {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.check_reads()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.inner.set(key, value).await
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.inner.compare_and_set(key, expected, new_value).await
    }

    async fn increment(&self, key: &[u8], expire_if_new: Option<Duration>) -> StorageResult<i64> {
        self.check_reads()?;
        self.inner.increment(key, expire_if_new).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn get_range(&self, range: KeyRange) -> StorageResult<Vec<KeyValue>> {
        self.check_reads()?;
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.inner.get_range(range).await
    }

    async fn clear_range(&self, range: KeyRange) -> StorageResult<()> {
        self.inner.clear_range(range).await
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        let inner = self.inner.transaction().await?;
        Ok(Box::new(FaultyTransaction { inner, fail_commit: Arc::clone(&self.fail_commits) }))
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.check_reads()?;
        self.inner.health_check().await
    }
}

struct FaultyTransaction {
    inner: Box<dyn Transaction>,
    fail_commit: Arc<AtomicBool>,
}

#[async_trait]
impl Transaction for FaultyTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.inner.get(key).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.set(key, value);
    }

    fn set_with_ttl(&mut self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) {
        self.inner.set_with_ttl(key, value, ttl);
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.inner.delete(key);
    }

    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
        ttl: Option<Duration>,
    ) {
        self.inner.compare_and_set(key, expected, new_value, ttl);
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(StorageError::connection("injected commit failure"));
        }
        self.inner.commit().await
    }
}
