//! Key-value record store abstraction for apiguard.
//!
//! Every stateful apiguard component (certificate store, token store, rate
//! limiter) persists through [`StorageBackend`], so a deployment shares one
//! store across all server instances.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ CertificateStore │ TokenStore │ RateLimiter              │
//! ├──────────────────────────────────────────────────────────┤
//! │               StorageBackend trait                       │
//! │ (get, set_with_ttl, increment, get_prefix, transaction)  │
//! ├──────────────────────────────────────────────────────────┤
//! │ MemoryBackend (tests, single process) │ networked stores │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Time is injected through [`Clock`] so expiry can be tested
//! deterministically with [`ManualClock`].

#![deny(unsafe_code)]

pub mod backend;
pub mod clock;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod transaction;
pub mod types;

pub use backend::{SharedBackend, StorageBackend};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use transaction::Transaction;
pub use types::{KeyRange, KeyValue, prefix_range};
