//! Transaction trait for atomic storage operations.
//!
//! Writes are buffered until [`commit`](Transaction::commit), which applies
//! them all or none. Conditional writes are checked at commit time; if any no
//! longer holds the whole transaction fails with
//! [`StorageError::Conflict`](crate::StorageError::Conflict) and nothing is
//! written.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use apiguard_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//!
//! let mut txn = backend.transaction().await.unwrap();
//! txn.set_with_ttl(b"certs/private".to_vec(), b"key".to_vec(), Duration::from_secs(60));
//! txn.set_with_ttl(b"certs/public/1".to_vec(), b"cert".to_vec(), Duration::from_secs(60));
//! txn.commit().await.unwrap();
//!
//! assert!(backend.get(b"certs/public/1").await.unwrap().is_some());
//! # });
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// An atomic unit of buffered writes.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Reads a key, observing this transaction's own pending writes first.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers a non-expiring write.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers a write that expires `ttl` after commit.
    fn set_with_ttl(&mut self, key: Vec<u8>, value: Vec<u8>, ttl: Duration);

    /// Buffers a delete.
    fn delete(&mut self, key: Vec<u8>);

    /// Buffers a conditional write, verified at commit time.
    ///
    /// `expected` follows the same rules as
    /// [`StorageBackend::compare_and_set`](crate::StorageBackend::compare_and_set).
    /// `ttl`, when set, is applied to the new value.
    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
        ttl: Option<Duration>,
    );

    /// Applies every buffered write atomically.
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
