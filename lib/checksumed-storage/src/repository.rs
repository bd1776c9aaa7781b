//! Repository wrapper that puts checksum indexing in front of an engine.
//!
//! - `ChecksumedRepository<E>`: read entry points rewrite their lookups, `save` syncs checksums
//! - `Model`: typed models that can define their schema (usually via `#[derive(Checksumed)]`)
//! - `ConnectionConfig`: how engines that need a connection are configured

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Lookup, ModelSchema, Order, Query, QueryExecutor, Resource, Row, StorageError, Value,
    sync_checksums,
};

/// Connection configuration for database backends.
///
/// This enum is extensible for future authentication methods.
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    /// Connect using a database URL string.
    Url(String),
}

impl ConnectionConfig {
    pub fn url(&self) -> &str {
        match self {
            ConnectionConfig::Url(url) => url,
        }
    }
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

/// A typed model with a schema.
///
/// `define()` runs once per repository, during model initialization.
pub trait Model: Serialize + DeserializeOwned + Send + Sync {
    fn define() -> Result<ModelSchema, StorageError>;
}

/// Checksum-aware access to one model stored by an executor.
///
/// Every read entry point that takes a [`Lookup`] substitutes equality
/// predicates on checksumed attributes with predicates on their checksum
/// fields. [`save`](Self::save) refreshes the checksums of dirty attributes
/// before handing the record to the executor.
#[derive(Debug, Clone)]
pub struct ChecksumedRepository<E> {
    executor: E,
    schema: Arc<ModelSchema>,
}

impl<E: QueryExecutor> ChecksumedRepository<E> {
    pub fn new(executor: E, schema: Arc<ModelSchema>) -> Self {
        Self { executor, schema }
    }

    /// Define `M`'s schema and wrap `executor` with it.
    pub fn for_model<M: Model>(executor: E) -> Result<Self, StorageError> {
        Ok(Self::new(executor, M::define()?.into_shared()))
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Create the model's storage.
    pub async fn initialize(&self) -> Result<(), StorageError> {
        self.executor.initialize(&self.schema).await
    }

    pub fn is_checksumed(&self, name: &str) -> bool {
        self.schema.is_checksumed(name)
    }

    /// A new record for this model.
    pub fn new_resource(&self) -> Resource {
        Resource::new(self.schema.clone())
    }

    /// Rewrite a lookup against the checksum registry and lower it to a query.
    pub fn prepare(&self, lookup: impl Into<Lookup>) -> Result<Query, StorageError> {
        let lookup = self.schema.registry().rewrite(lookup.into())?;
        Ok(lookup.into_query(self.schema.table()))
    }

    /// The first record matching `lookup`, by key.
    pub async fn first(&self, lookup: impl Into<Lookup>) -> Result<Option<Resource>, StorageError> {
        let query = self.ordered(self.prepare(lookup)?);
        let row = self.executor.fetch_optional(&self.schema, query).await?;
        Ok(row.map(|row| self.load(row)))
    }

    /// Every record matching `lookup`, by key.
    pub async fn all(&self, lookup: impl Into<Lookup>) -> Result<Vec<Resource>, StorageError> {
        let query = self.ordered(self.prepare(lookup)?);
        let rows = self.executor.fetch(&self.schema, query).await?;
        Ok(rows.into_iter().map(|row| self.load(row)).collect())
    }

    /// The record with the highest key.
    pub async fn last(&self) -> Result<Option<Resource>, StorageError> {
        let query = Query::new(self.schema.table()).order_by(self.schema.key(), Order::Desc);
        let row = self.executor.fetch_optional(&self.schema, query).await?;
        Ok(row.map(|row| self.load(row)))
    }

    /// The record with the given key.
    pub async fn get(&self, key: impl Into<Value>) -> Result<Option<Resource>, StorageError> {
        let query = Query::new(self.schema.table()).eq(self.schema.key(), key);
        let row = self.executor.fetch_optional(&self.schema, query).await?;
        Ok(row.map(|row| self.load(row)))
    }

    fn ordered(&self, query: Query) -> Query {
        if query.order_by.is_empty() {
            query.order_by(self.schema.key(), Order::Asc)
        } else {
            query
        }
    }

    fn load(&self, row: Row) -> Resource {
        Resource::loaded(self.schema.clone(), row)
    }

    /// Build a record from `attributes` and save it.
    pub async fn create<K, V>(
        &self,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Resource, StorageError>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut resource = Resource::with_attributes(self.schema.clone(), attributes)?;
        self.save(&mut resource).await?;
        Ok(resource)
    }

    /// Save a record.
    ///
    /// Dirty checksumed attributes get fresh checksums, new records get their
    /// defaults and a key, and the record is snapshotted as persisted. The
    /// record is only modified if the whole save succeeds. Returns `false`
    /// when a persisted record had nothing to write.
    pub async fn save(&self, resource: &mut Resource) -> Result<bool, StorageError> {
        if resource.schema().table() != self.schema.table() {
            return Err(StorageError::StorageError(format!(
                "Resource for {} saved through repository for {}",
                resource.schema().table(),
                self.schema.table()
            )));
        }

        let mut staged = resource.clone();
        let refreshed = sync_checksums(self.schema.registry(), &mut staged)?;

        if staged.is_new() {
            staged.apply_defaults()?;
            let key = self.executor.insert(&self.schema, staged.values()).await?;
            tracing::debug!(table = %self.schema.table(), ?key, refreshed, "Inserted record");
            staged.assign_key(key);
        } else {
            if staged.is_clean() {
                *resource = staged;
                return Ok(false);
            }
            let key = staged
                .key()
                .cloned()
                .ok_or_else(|| StorageError::MissingKey(self.schema.table().to_string()))?;
            let rows = self
                .executor
                .update(&self.schema, &key, &staged.changes())
                .await?;
            if rows == 0 {
                return Err(StorageError::NotFound(format!(
                    "{} {:?}",
                    self.schema.table(),
                    key
                )));
            }
            tracing::debug!(table = %self.schema.table(), key = ?staged.key(), refreshed, "Updated record");
        }

        staged.mark_persisted();
        *resource = staged;
        Ok(true)
    }

    /// Save a typed model as a new record.
    pub async fn create_model<M: Serialize>(&self, model: &M) -> Result<Resource, StorageError> {
        let mut resource = Resource::from_model(self.schema.clone(), model)?;
        self.save(&mut resource).await?;
        Ok(resource)
    }

    pub async fn first_as<M: DeserializeOwned>(
        &self,
        lookup: impl Into<Lookup>,
    ) -> Result<Option<M>, StorageError> {
        self.first(lookup)
            .await?
            .map(|resource| resource.to_model())
            .transpose()
    }

    pub async fn all_as<M: DeserializeOwned>(
        &self,
        lookup: impl Into<Lookup>,
    ) -> Result<Vec<M>, StorageError> {
        self.all(lookup)
            .await?
            .iter()
            .map(Resource::to_model)
            .collect()
    }
}
