//! Common types used across storage operations.

use std::ops::Bound;

use bytes::Bytes;

/// Key-value pair returned from range and prefix queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// A half-open or closed key interval, as passed to
/// [`get_range`](crate::StorageBackend::get_range).
pub type KeyRange = (Bound<Vec<u8>>, Bound<Vec<u8>>);

/// Returns the range covering every key that starts with `prefix`.
///
/// The upper bound is the prefix with its last non-`0xFF` byte incremented.
/// A prefix consisting only of `0xFF` bytes (or an empty prefix) has no upper
/// bound.
///
/// ```
/// use std::ops::Bound;
///
/// use apiguard_storage::prefix_range;
///
/// let (start, end) = prefix_range(b"tokens/");
/// assert_eq!(start, Bound::Included(b"tokens/".to_vec()));
/// assert_eq!(end, Bound::Excluded(b"tokens0".to_vec()));
/// ```
#[must_use]
pub fn prefix_range(prefix: &[u8]) -> KeyRange {
    let start = Bound::Included(prefix.to_vec());

    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return (start, Bound::Excluded(upper));
        }
    }

    (start, Bound::Unbounded)
}
