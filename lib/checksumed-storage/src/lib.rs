//! Checksumed Storage - checksum-backed attribute indexing for persistent records.
//!
//! Attributes declared *checksumed* get a sibling field holding the SHA-256 of
//! their canonical text. Equality lookups on the attribute are transparently
//! answered through the checksum field, and the checksum is refreshed whenever
//! the attribute changes before a record is saved.
//!
//! # Core Concepts
//!
//! - **Checksum**: 64 lowercase hex characters, SHA-256 of a value's canonical text
//!   (see [`digest`] and [`Canonical`]).
//! - **Checksum field**: `{attribute}_checksum`, fixed width, required, and either
//!   unique or indexed.
//! - **Dirty attribute**: an attribute whose value changed since the record was
//!   last loaded or saved.
//!
//! # Components
//!
//! - [`SchemaBuilder`]: declares fields and checksumed attributes, producing an
//!   immutable [`ModelSchema`] with its [`ChecksumRegistry`]
//! - [`ChecksumRegistry::rewrite`]: substitutes checksum predicates in a [`Lookup`]
//! - [`sync_checksums`]: refreshes checksums of dirty attributes before a write
//! - [`ChecksumedRepository`]: wraps a [`QueryExecutor`] with both of the above

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::unwrap_in_result,
        clippy::panic
    )
)]

mod digest;
mod error;
mod query;
mod record;
mod registry;
mod repository;
mod schema;
mod time;
mod value;

pub use digest::{CHECKSUM_LENGTH, Canonical, digest, digest_text};
pub use error::{ConversionError, StorageError};
pub use query::{Filter, Lookup, Order, PredicateMap, Query, QueryExecutor, Row};
pub use record::{Attributes, Resource, sync_checksums};
pub use registry::{
    CHECKSUM_SUFFIX, ChecksumOptions, ChecksumRegistry, ChecksumSpec, checksum_field_name,
};
pub use repository::{ChecksumedRepository, ConnectionConfig, Model};
pub use schema::{
    FieldConstraint, FieldDefault, FieldDefinition, FieldKind, ModelSchema, SchemaBuilder,
};
pub use time::StorageDatetime;
pub use value::Value;

// Re-export derive macro
pub use checksumed_storage_derive::Checksumed;
