//! In-memory engine for checksumed-storage.
//!
//! [`MemoryStore`] keeps one table per model schema and implements
//! [`QueryExecutor`]: serial keys, equality and range filters, ordering,
//! required-field checks and unique constraints (including the uniqueness of
//! checksum fields). It is the engine used by tests and by embedders that do
//! not need durability.
//!
//! ```text
//! let store = MemoryStore::new();
//! let urls = ChecksumedRepository::for_model::<Url>(store.clone())?;
//! urls.initialize().await?;
//! urls.create([("url", "http://foo/")]).await?;
//! let found = urls.first([("url", "http://foo/")]).await?;
//! ```

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::unwrap_in_result,
        clippy::panic
    )
)]

mod store;

pub use store::MemoryStore;

// Re-export core types for convenience
pub use checksumed_storage::{
    ChecksumOptions, ChecksumedRepository, Checksumed, Lookup, Model, Query, QueryExecutor,
    Resource, StorageError, Value, digest,
};
