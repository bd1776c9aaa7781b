//! PostgreSQL engine for checksumed-storage.
//!
//! [`PgPool`] implements [`QueryExecutor`] over an sqlx connection pool.
//! `initialize` creates one table per model schema: checksum fields become
//! `CHAR(64) NOT NULL` columns carrying either a `UNIQUE` constraint or a
//! plain index, so lookups rewritten to checksum predicates are served by
//! the database.
//!
//! # Usage
//!
//! ```text
//! use checksumed_storage::{Checksumed, ChecksumedRepository};
//! use checksumed_storage_postgres::PgPool;
//!
//! #[derive(Serialize, Deserialize, Checksumed)]
//! #[model(table = "urls")]
//! pub struct Url {
//!     pub id: Option<i64>,
//!     #[checksum]
//!     pub url: String,
//! }
//!
//! let pool = PgPool::connect("postgres://localhost/links").await?;
//! let urls = ChecksumedRepository::for_model::<Url>(pool)?;
//! urls.initialize().await?;
//! let found = urls.first([("url", "http://foo/")]).await?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod bind;
mod ddl;
mod executor;

pub use ddl::{column_type, create_statements};
pub use executor::PgPool;

// Re-export core types for convenience
pub use checksumed_storage::{
    ChecksumOptions, ChecksumedRepository, Checksumed, ConnectionConfig, Filter, Lookup, Model,
    Order, Query, QueryExecutor, Resource, StorageDatetime, StorageError, Value,
};
