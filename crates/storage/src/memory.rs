//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] keeps every record in a single [`BTreeMap`] guarded by a
//! [`parking_lot::RwLock`]. It backs the test suites and single-process
//! deployments.
//!
//! # Expiry
//!
//! Each entry carries an optional absolute expiry computed from the injected
//! [`Clock`](crate::Clock). Reads treat an entry whose expiry is at or before `clock.now()`
//! as absent, so expiry is exact with respect to the clock. A background
//! sweeper reclaims the memory of expired entries once per second.
//!
//! # Example
//!
//! ```
//! use apiguard_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"greeting".to_vec(), b"hello".to_vec()).await.unwrap();
//!     let value = backend.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```

use std::{collections::BTreeMap, ops::Bound, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    backend::StorageBackend,
    clock::{SharedClock, SystemClock, add_duration},
    error::{StorageError, StorageResult},
    transaction::Transaction,
    types::{KeyRange, KeyValue},
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

type Entries = BTreeMap<Vec<u8>, Entry>;

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the sweeper exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// In-memory storage backend.
///
/// Cloning is cheap; all clones share the same data. The sweeper task stops
/// when the last clone is dropped or [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct MemoryBackend {
    entries: Arc<RwLock<Entries>>,
    clock: SharedClock,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl MemoryBackend {
    /// Creates a backend driven by the system clock.
    ///
    /// Must be called inside a Tokio runtime; it spawns the sweeper.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a backend whose expiry decisions follow `clock`.
    #[must_use]
    pub fn with_clock(clock: SharedClock) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let entries = Arc::new(RwLock::new(Entries::new()));

        // The sweeper holds the data but not the guard, so dropping the last
        // backend handle closes the channel.
        tokio::spawn(sweep_expired(Arc::clone(&entries), Arc::clone(&clock), shutdown_rx));

        Self { entries, clock, shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }) }
    }

    /// Signals the sweeper to stop. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Number of physically stored entries, including expired ones the
    /// sweeper has not reclaimed yet.
    #[must_use]
    pub fn stored_len(&self) -> usize {
        self.entries.read().len()
    }

    fn expiry_for(&self, ttl: Duration) -> Option<DateTime<Utc>> {
        // An unrepresentable expiry is far enough away to mean "never".
        add_duration(self.clock.now(), ttl)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").field("entries", &self.stored_len()).finish_non_exhaustive()
    }
}

async fn sweep_expired(
    entries: Arc<RwLock<Entries>>,
    clock: SharedClock,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = sleep(SWEEP_INTERVAL) => {}
            _ = shutdown_rx.changed() => return,
        }

        let now = clock.now();
        let mut guard = entries.write();
        let before = guard.len();
        guard.retain(|_, entry| entry.is_live(now));
        let swept = before - guard.len();
        if swept > 0 {
            tracing::trace!(swept, "removed expired entries");
        }
    }
}

fn live_value(entries: &Entries, key: &[u8], now: DateTime<Utc>) -> Option<Bytes> {
    entries.get(key).filter(|entry| entry.is_live(now)).map(|entry| entry.value.clone())
}

fn matches_expected(expected: Option<&[u8]>, current: Option<&Bytes>) -> bool {
    match (expected, current) {
        (None, None) => true,
        (Some(expected), Some(current)) => expected == &current[..],
        _ => false,
    }
}

fn borrow_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(b) => Bound::Included(b.as_slice()),
        Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn borrowed_range(range: &KeyRange) -> (Bound<&[u8]>, Bound<&[u8]>) {
    (borrow_bound(&range.0), borrow_bound(&range.1))
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let now = self.clock.now();
        Ok(live_value(&self.entries.read(), key, now))
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.entries.write().insert(key, Entry { value: Bytes::from(value), expires_at: None });
        Ok(())
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        let expires_at = self.expiry_for(ttl);
        self.entries.write().insert(key, Entry { value: Bytes::from(value), expires_at });
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        let now = self.clock.now();
        let mut entries = self.entries.write();

        let current = live_value(&entries, key, now);
        if !matches_expected(expected, current.as_ref()) {
            return Err(StorageError::Conflict);
        }

        entries.insert(key.to_vec(), Entry { value: Bytes::from(new_value), expires_at: None });
        Ok(())
    }

    async fn increment(&self, key: &[u8], expire_if_new: Option<Duration>) -> StorageResult<i64> {
        let now = self.clock.now();
        let mut entries = self.entries.write();

        let existing = entries.get(key).filter(|entry| entry.is_live(now));
        let (count, expires_at) = match existing {
            Some(entry) => {
                let current = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| StorageError::serialization("value is not a counter"))?;
                (current.saturating_add(1), entry.expires_at)
            },
            None => (1, expire_if_new.and_then(|ttl| add_duration(now, ttl))),
        };

        entries.insert(
            key.to_vec(),
            Entry { value: Bytes::from(count.to_string()), expires_at },
        );
        Ok(count)
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn get_range(&self, range: KeyRange) -> StorageResult<Vec<KeyValue>> {
        let now = self.clock.now();
        let entries = self.entries.read();

        let results = entries
            .range::<[u8], _>(borrowed_range(&range))
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(k, entry)| KeyValue::new(Bytes::copy_from_slice(k), entry.value.clone()))
            .collect();

        Ok(results)
    }

    async fn clear_range(&self, range: KeyRange) -> StorageResult<()> {
        let mut entries = self.entries.write();
        let doomed: Vec<Vec<u8>> =
            entries.range::<[u8], _>(borrowed_range(&range)).map(|(k, _)| k.clone()).collect();
        for key in doomed {
            entries.remove(&key);
        }
        Ok(())
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }

    async fn health_check(&self) -> StorageResult<()> {
        // Acquiring the lock proves we are not deadlocked.
        let _unused = self.entries.read();
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Put { value: Vec<u8>, ttl: Option<Duration> },
    Delete,
}

/// A compare-and-set operation to be verified at commit time.
#[derive(Debug, Clone)]
struct CasOperation {
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
    new_value: Vec<u8>,
    ttl: Option<Duration>,
}

/// Buffers writes until commit, with read-your-writes semantics.
struct MemoryTransaction {
    backend: MemoryBackend,
    pending_writes: BTreeMap<Vec<u8>, PendingWrite>,
    pending_cas: Vec<CasOperation>,
}

impl MemoryTransaction {
    fn new(backend: MemoryBackend) -> Self {
        Self { backend, pending_writes: BTreeMap::new(), pending_cas: Vec::new() }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        match self.pending_writes.get(key) {
            Some(PendingWrite::Put { value, .. }) => Ok(Some(Bytes::copy_from_slice(value))),
            Some(PendingWrite::Delete) => Ok(None),
            None => self.backend.get(key).await,
        }
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending_writes.insert(key, PendingWrite::Put { value, ttl: None });
    }

    fn set_with_ttl(&mut self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) {
        self.pending_writes.insert(key, PendingWrite::Put { value, ttl: Some(ttl) });
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending_writes.insert(key, PendingWrite::Delete);
    }

    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
        ttl: Option<Duration>,
    ) {
        self.pending_cas.push(CasOperation { key, expected, new_value, ttl });
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        fail::fail_point!("memory-txn-commit", |_| {
            Err(StorageError::internal("injected commit failure"))
        });

        let now = self.backend.clock.now();
        let mut entries = self.backend.entries.write();

        for cas in &self.pending_cas {
            let current = live_value(&entries, &cas.key, now);
            if !matches_expected(cas.expected.as_deref(), current.as_ref()) {
                return Err(StorageError::Conflict);
            }
        }

        let expiry = |ttl: Option<Duration>| ttl.and_then(|ttl| add_duration(now, ttl));

        for cas in self.pending_cas {
            let expires_at = expiry(cas.ttl);
            entries.insert(cas.key, Entry { value: Bytes::from(cas.new_value), expires_at });
        }

        for (key, write) in self.pending_writes {
            match write {
                PendingWrite::Put { value, ttl } => {
                    entries.insert(key, Entry { value: Bytes::from(value), expires_at: expiry(ttl) });
                },
                PendingWrite::Delete => {
                    entries.remove(&key);
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, types::prefix_range};

    fn manual_backend() -> (MemoryBackend, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        (MemoryBackend::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = MemoryBackend::new();

        backend.set(b"key1".to_vec(), b"value1".to_vec()).await.unwrap();
        assert_eq!(backend.get(b"key1").await.unwrap(), Some(Bytes::from("value1")));

        backend.delete(b"key1").await.unwrap();
        assert_eq!(backend.get(b"key1").await.unwrap(), None);

        // Deleting again is a no-op.
        backend.delete(b"key1").await.unwrap();
    }

    #[tokio::test]
    async fn test_prefix_scan_is_ordered_and_bounded() {
        let backend = MemoryBackend::new();
        backend.set(b"certs/public/0002".to_vec(), b"b".to_vec()).await.unwrap();
        backend.set(b"certs/public/0001".to_vec(), b"a".to_vec()).await.unwrap();
        backend.set(b"certs/private".to_vec(), b"x".to_vec()).await.unwrap();
        backend.set(b"certs/publicity".to_vec(), b"y".to_vec()).await.unwrap();

        let results = backend.get_prefix(b"certs/public/").await.unwrap();
        let keys: Vec<_> = results.iter().map(|kv| kv.key.clone()).collect();
        assert_eq!(keys, vec![Bytes::from("certs/public/0001"), Bytes::from("certs/public/0002")]);
    }

    #[tokio::test]
    async fn test_clear_range() {
        let backend = MemoryBackend::new();
        for key in [b"a1", b"a2", b"b1"] {
            backend.set(key.to_vec(), b"v".to_vec()).await.unwrap();
        }

        backend.clear_range(prefix_range(b"a")).await.unwrap();

        assert_eq!(backend.get(b"a1").await.unwrap(), None);
        assert_eq!(backend.get(b"a2").await.unwrap(), None);
        assert!(backend.get(b"b1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ttl_follows_clock() {
        let (backend, clock) = manual_backend();

        backend.set_with_ttl(b"k".to_vec(), b"v".to_vec(), Duration::from_secs(10)).await.unwrap();

        clock.advance(Duration::from_secs(9));
        assert!(backend.get(b"k").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert_eq!(backend.get(b"k").await.unwrap(), None, "expiry is inclusive of the deadline");
        assert!(backend.get_prefix(b"k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_clears_ttl() {
        let (backend, clock) = manual_backend();

        backend.set_with_ttl(b"k".to_vec(), b"v1".to_vec(), Duration::from_secs(1)).await.unwrap();
        backend.set(b"k".to_vec(), b"v2".to_vec()).await.unwrap();

        clock.advance(Duration::from_secs(60));
        assert_eq!(backend.get(b"k").await.unwrap(), Some(Bytes::from("v2")));
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let backend = MemoryBackend::new();

        backend.compare_and_set(b"k", None, b"v1".to_vec()).await.unwrap();
        let err = backend.compare_and_set(b"k", None, b"v2".to_vec()).await.unwrap_err();
        assert!(err.is_conflict());

        backend.compare_and_set(b"k", Some(b"v1"), b"v2".to_vec()).await.unwrap();
        let err = backend.compare_and_set(b"k", Some(b"v1"), b"v3".to_vec()).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(backend.get(b"k").await.unwrap(), Some(Bytes::from("v2")));
    }

    #[tokio::test]
    async fn test_compare_and_set_treats_expired_as_absent() {
        let (backend, clock) = manual_backend();
        backend.set_with_ttl(b"k".to_vec(), b"old".to_vec(), Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));

        backend.compare_and_set(b"k", None, b"new".to_vec()).await.unwrap();
        assert_eq!(backend.get(b"k").await.unwrap(), Some(Bytes::from("new")));
    }

    #[tokio::test]
    async fn test_increment_sets_ttl_only_when_new() {
        let (backend, clock) = manual_backend();
        let ttl = Some(Duration::from_secs(120));

        assert_eq!(backend.increment(b"c", ttl).await.unwrap(), 1);
        clock.advance(Duration::from_secs(100));
        assert_eq!(backend.increment(b"c", ttl).await.unwrap(), 2);

        // The second increment must not have pushed the expiry out.
        clock.advance(Duration::from_secs(20));
        assert_eq!(backend.get(b"c").await.unwrap(), None);
        assert_eq!(backend.increment(b"c", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_counter() {
        let backend = MemoryBackend::new();
        backend.set(b"c".to_vec(), b"not-a-number".to_vec()).await.unwrap();

        let err = backend.increment(b"c", None).await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }));
    }

    #[tokio::test]
    async fn test_transaction_read_your_writes() {
        let backend = MemoryBackend::new();
        backend.set(b"gone".to_vec(), b"v".to_vec()).await.unwrap();

        let mut txn = backend.transaction().await.unwrap();
        txn.set(b"new".to_vec(), b"v".to_vec());
        txn.delete(b"gone".to_vec());

        assert_eq!(txn.get(b"new").await.unwrap(), Some(Bytes::from("v")));
        assert_eq!(txn.get(b"gone").await.unwrap(), None);

        // Nothing is visible outside before commit.
        assert_eq!(backend.get(b"new").await.unwrap(), None);
        assert!(backend.get(b"gone").await.unwrap().is_some());

        txn.commit().await.unwrap();
        assert!(backend.get(b"new").await.unwrap().is_some());
        assert_eq!(backend.get(b"gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transaction_ttl_writes() {
        let (backend, clock) = manual_backend();

        let mut txn = backend.transaction().await.unwrap();
        txn.set_with_ttl(b"short".to_vec(), b"v".to_vec(), Duration::from_secs(5));
        txn.compare_and_set(b"cas".to_vec(), None, b"v".to_vec(), Some(Duration::from_secs(10)));
        txn.commit().await.unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(backend.get(b"short").await.unwrap(), None);
        assert!(backend.get(b"cas").await.unwrap().is_some());

        clock.advance(Duration::from_secs(5));
        assert_eq!(backend.get(b"cas").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transaction_conflict_writes_nothing() {
        let backend = MemoryBackend::new();
        backend.set(b"latest".to_vec(), b"v2".to_vec()).await.unwrap();

        let mut txn = backend.transaction().await.unwrap();
        txn.compare_and_set(b"latest".to_vec(), Some(b"v1".to_vec()), b"v3".to_vec(), None);
        txn.set(b"public/3".to_vec(), b"cert".to_vec());

        let err = txn.commit().await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(backend.get(b"latest").await.unwrap(), Some(Bytes::from("v2")));
        assert_eq!(backend.get(b"public/3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_health_check() {
        assert!(MemoryBackend::new().health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_clone_shares_data() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        backend.set(b"k".to_vec(), b"v".to_vec()).await.unwrap();
        assert_eq!(clone.get(b"k").await.unwrap(), Some(Bytes::from("v")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_expired_entries() {
        let (backend, clock) = manual_backend();
        backend.set_with_ttl(b"k".to_vec(), b"v".to_vec(), Duration::from_secs(1)).await.unwrap();
        backend.set(b"keep".to_vec(), b"v".to_vec()).await.unwrap();
        assert_eq!(backend.stored_len(), 2);

        clock.advance(Duration::from_secs(2));
        tokio::time::sleep(SWEEP_INTERVAL * 2).await;

        assert_eq!(backend.stored_len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.shutdown();
        backend.shutdown();
        backend.set(b"k".to_vec(), b"v".to_vec()).await.unwrap();
        assert!(backend.get(b"k").await.unwrap().is_some());
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn prefix_scan_returns_exactly_matching_keys(
                keys in proptest::collection::btree_set(
                    proptest::collection::vec(prop_oneof![Just(b'a'), Just(b'b'), Just(0xFF)], 1..5),
                    0..30,
                ),
                prefix in proptest::collection::vec(prop_oneof![Just(b'a'), Just(b'b'), Just(0xFF)], 0..3),
            ) {
                let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
                rt.block_on(async {
                    let backend = MemoryBackend::new();
                    for key in &keys {
                        backend.set(key.clone(), b"v".to_vec()).await.unwrap();
                    }

                    let found: Vec<Vec<u8>> = backend
                        .get_prefix(&prefix)
                        .await
                        .unwrap()
                        .into_iter()
                        .map(|kv| kv.key.to_vec())
                        .collect();
                    let expected: Vec<Vec<u8>> =
                        keys.iter().filter(|k| k.starts_with(&prefix)).cloned().collect();

                    prop_assert_eq!(found, expected);
                    Ok::<(), TestCaseError>(())
                })?;
            }
        }
    }
}
