//! Storage backend trait definition.
//!
//! [`StorageBackend`] is the key-value record store every stateful apiguard
//! component is built on: the certificate store, the token store and the rate
//! limiter's counters all live behind it.
//!
//! # Design
//!
//! - **Keys and values are bytes**: callers own their encoding
//! - **Async by default**: a production backend is a network round-trip away
//! - **Per-key expiry**: every write can carry a TTL; expired keys are invisible
//! - **Transactional**: multi-key writes commit atomically via [`Transaction`]
//! - **Object safe**: components hold an `Arc<dyn StorageBackend>`
//!
//! See [`MemoryBackend`](crate::MemoryBackend) for a reference implementation.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::StorageResult,
    transaction::Transaction,
    types::{KeyRange, KeyValue, prefix_range},
};

/// Shared handle to a storage backend.
pub type SharedBackend = Arc<dyn StorageBackend>;

/// Abstract storage backend for key-value operations.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StorageBackend::get) | Retrieve a single live value |
/// | [`set`](StorageBackend::set) | Store a non-expiring value |
/// | [`set_with_ttl`](StorageBackend::set_with_ttl) | Store with automatic expiration |
/// | [`compare_and_set`](StorageBackend::compare_and_set) | Atomic compare-and-swap |
/// | [`increment`](StorageBackend::increment) | Atomic counter with expire-if-new |
/// | [`delete`](StorageBackend::delete) | Remove a key |
/// | [`get_range`](StorageBackend::get_range) | Ordered scan of a key interval |
/// | [`get_prefix`](StorageBackend::get_prefix) | Ordered scan of a key prefix |
/// | [`clear_range`](StorageBackend::clear_range) | Delete a key interval |
/// | [`transaction`](StorageBackend::transaction) | Begin an atomic transaction |
/// | [`health_check`](StorageBackend::health_check) | Verify backend availability |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use apiguard_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();
/// let value = backend.get(b"key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// Returns `Ok(None)` when the key is absent or has expired.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair, overwriting any previous value and clearing
    /// any previous TTL.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Stores a key-value pair that expires after `ttl`.
    ///
    /// A zero `ttl` stores a value that is already expired.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()>;

    /// Atomically replaces a key's value if it matches `expected`.
    ///
    /// - `expected: None` succeeds only if the key is absent or expired.
    /// - `expected: Some(v)` succeeds only if the live value is byte-for-byte `v`.
    ///
    /// On mismatch returns [`StorageError::Conflict`](crate::StorageError::Conflict).
    /// On success the key becomes non-expiring.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Atomically increments the decimal counter stored at `key` and returns
    /// the new value.
    ///
    /// When the key is absent or expired the counter starts at 1 and, if
    /// `expire_if_new` is set, receives that TTL. An existing counter keeps
    /// its original expiry, so a burst of increments can never extend a
    /// window indefinitely.
    ///
    /// Fails with a serialization error if the live value is not a counter.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn increment(&self, key: &[u8], expire_if_new: Option<Duration>) -> StorageResult<i64>;

    /// Removes a key. Deleting an absent key is not an error.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Returns all live key-value pairs inside `range`, ordered by key.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_range(&self, range: KeyRange) -> StorageResult<Vec<KeyValue>>;

    /// Returns all live key-value pairs whose key starts with `prefix`,
    /// ordered by key.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>> {
        self.get_range(prefix_range(prefix)).await
    }

    /// Removes every key inside `range`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn clear_range(&self, range: KeyRange) -> StorageResult<()>;

    /// Begins a transaction whose buffered writes commit atomically.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>>;

    /// Verifies that the backend is reachable and responsive.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn health_check(&self) -> StorageResult<()>;
}
