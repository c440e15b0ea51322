//! Transaction cache for a vault or a single wallet.
//!
//! A [`TransactionCache`] is the merged, deduplicated view of every transfer known for a scope
//! together with its sync checkpoint. It is persisted through a [`CacheBackend`], either a JSON
//! document per scope ([`FileBackend`]) or process memory ([`MemoryBackend`]).
#![warn(missing_docs)]
mod backend;
mod cache;
mod entry;
mod error;
mod file;
mod memory;
mod metrics;
mod scoped;

pub use backend::{CacheBackend, CacheSnapshot};
pub use cache::{TransactionCache, DEFAULT_STALE_AFTER};
pub use entry::CacheEntry;
pub use error::Error;
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use metrics::{BackendMetricsMiddleware, Metrics};
pub use scoped::{ScopedCaches, SharedCache};

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
