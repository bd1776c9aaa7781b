//! Database-agnostic query builder and the executor contract.
//!
//! Read entry points accept a [`Lookup`]. Flat equality maps are rewritten
//! against the model's checksum registry and lowered to a [`Query`] that a
//! [`QueryExecutor`] translates to its backend (memory, PostgreSQL, ...).

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{ModelSchema, StorageError, Value};

/// Flat mapping from attribute name to the value it must equal.
pub type PredicateMap = BTreeMap<String, Value>;

/// Stored attribute values of one record, as exchanged with an executor.
pub type Row = BTreeMap<String, Value>;

/// Filter conditions for queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// field = value
    Eq(String, Value),
    /// field != value
    Ne(String, Value),
    /// field > value
    Gt(String, Value),
    /// field >= value
    Gte(String, Value),
    /// field < value
    Lt(String, Value),
    /// field <= value
    Lte(String, Value),
    /// field IN (values) - for arrays
    In(String, Value),
    /// field IS NULL
    IsNull(String),
    /// field IS NOT NULL
    IsNotNull(String),
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(field, _)
            | Filter::Ne(field, _)
            | Filter::Gt(field, _)
            | Filter::Gte(field, _)
            | Filter::Lt(field, _)
            | Filter::Lte(field, _)
            | Filter::In(field, _)
            | Filter::IsNull(field)
            | Filter::IsNotNull(field) => field,
        }
    }
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A SELECT query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// The table to query.
    pub table: String,
    /// Filter conditions.
    pub filters: Vec<Filter>,
    /// Order by clauses.
    pub order_by: Vec<(String, Order)>,
    /// Maximum number of results.
    pub limit: Option<u64>,
    /// Offset for pagination.
    pub offset: Option<u64>,
}

impl Query {
    /// Create a new query for a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Add a filter condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter (shorthand for Filter::Eq).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    /// Add an IN filter (shorthand for Filter::In).
    pub fn r#in(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(Filter::In(field.into(), values.into()))
    }

    /// Add a greater-than filter.
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gt(field.into(), value.into()))
    }

    /// Add a less-than filter.
    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lt(field.into(), value.into()))
    }

    /// Add an order-by clause.
    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by.push((field.into(), order));
        self
    }

    /// Set the maximum number of results.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset for pagination.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// What a read entry point was asked to match.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Lookup {
    /// No filter: every record matches.
    #[default]
    Unfiltered,
    /// Flat equality predicates. Subject to checksum substitution.
    Equals(PredicateMap),
    /// A prepared query, executed as given.
    Structured(Query),
    /// Equality predicates that can name a field more than once, lowered
    /// against the model's table. Every pair must hold.
    Conjunction(Vec<(String, Value)>),
}

impl Lookup {
    /// Build an equality lookup from `(attribute, value)` pairs.
    pub fn equals<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Lookup::Equals(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Lower the lookup to a query against `table`.
    ///
    /// A structured query keeps its own table and clauses.
    pub fn into_query(self, table: &str) -> Query {
        match self {
            Lookup::Unfiltered => Query::new(table),
            Lookup::Equals(predicates) => predicates
                .into_iter()
                .fold(Query::new(table), |query, (field, value)| {
                    query.eq(field, value)
                }),
            Lookup::Structured(query) => query,
            Lookup::Conjunction(predicates) => predicates
                .into_iter()
                .fold(Query::new(table), |query, (field, value)| {
                    query.eq(field, value)
                }),
        }
    }
}

impl From<PredicateMap> for Lookup {
    fn from(predicates: PredicateMap) -> Self {
        Lookup::Equals(predicates)
    }
}

impl From<Query> for Lookup {
    fn from(query: Query) -> Self {
        Lookup::Structured(query)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Lookup {
    fn from(pairs: [(K, V); N]) -> Self {
        Lookup::equals(pairs)
    }
}

/// Trait for executing queries against a persistence engine.
///
/// Engines own storage, key assignment and unique-constraint enforcement.
/// They receive queries whose checksum predicates have already been
/// substituted, and resources whose checksum fields are already in sync.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Create storage for the schema (tables, unique constraints, indexes).
    async fn initialize(&self, schema: &ModelSchema) -> Result<(), StorageError>;

    /// Execute a SELECT query and return results.
    async fn fetch(&self, schema: &ModelSchema, query: Query) -> Result<Vec<Row>, StorageError>;

    /// Execute a SELECT query and return at most one result.
    async fn fetch_optional(
        &self,
        schema: &ModelSchema,
        query: Query,
    ) -> Result<Option<Row>, StorageError> {
        let results = self.fetch(schema, query.limit(1)).await?;
        Ok(results.into_iter().next())
    }

    /// Insert a new record and return its assigned key.
    ///
    /// `row` holds every assigned attribute; the key is left to the engine.
    async fn insert(&self, schema: &ModelSchema, row: &Row) -> Result<Value, StorageError>;

    /// Overwrite `changes` on the record with the given key. Attributes mapped
    /// to [`Value::Null`] are cleared. Returns rows affected.
    async fn update(
        &self,
        schema: &ModelSchema,
        key: &Value,
        changes: &Row,
    ) -> Result<u64, StorageError>;
}
