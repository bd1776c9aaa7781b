//! PostgreSQL implementation of QueryExecutor.

const DEFAULT_MAX_CONNECTIONS: u32 = 16;

use async_trait::async_trait;
use checksumed_storage::{
    ConnectionConfig, FieldKind, Filter, ModelSchema, Order, Query, QueryExecutor, Row,
    StorageError, Value,
};
use sqlx::Row as _;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use std::ops::Deref;

use crate::bind::{bind_field, bind_row, bind_value, extract_row};
use crate::ddl::create_statements;

/// Wrapper around sqlx::PgPool that implements QueryExecutor.
#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    /// Create a new PgPool from an sqlx PgPool.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self(pool)
    }

    /// Connect to a PostgreSQL database.
    pub async fn connect(config: impl Into<ConnectionConfig>) -> Result<Self, StorageError> {
        let config = config.into();
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(config.url())
            .await
            .map_err(|e| StorageError::StorageError(e.to_string()))?;
        Ok(Self(pool))
    }

    /// Get the inner sqlx::PgPool.
    pub fn inner(&self) -> &sqlx::PgPool {
        &self.0
    }
}

impl Deref for PgPool {
    type Target = sqlx::PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Build a WHERE clause from filters and return the SQL and argument count.
fn build_where_clause(filters: &[Filter], start_param: usize) -> (String, usize) {
    if filters.is_empty() {
        return (String::new(), 0);
    }

    let mut clauses = Vec::new();
    let mut param_idx = start_param;

    for filter in filters {
        let op = match filter {
            Filter::Eq(..) => "=",
            Filter::Ne(..) => "!=",
            Filter::Gt(..) => ">",
            Filter::Gte(..) => ">=",
            Filter::Lt(..) => "<",
            Filter::Lte(..) => "<=",
            Filter::In(field, _) => {
                clauses.push(format!("{} = ANY(${})", field, param_idx));
                param_idx += 1;
                continue;
            }
            Filter::IsNull(field) => {
                clauses.push(format!("{} IS NULL", field));
                continue;
            }
            Filter::IsNotNull(field) => {
                clauses.push(format!("{} IS NOT NULL", field));
                continue;
            }
        };
        clauses.push(format!("{} {} ${}", filter.field(), op, param_idx));
        param_idx += 1;
    }

    let param_count = param_idx - start_param;
    (format!(" WHERE {}", clauses.join(" AND ")), param_count)
}

/// Bind filter values to PgArguments.
fn bind_filters(args: &mut PgArguments, filters: &[Filter]) -> Result<(), StorageError> {
    for filter in filters {
        match filter {
            Filter::Eq(_, value)
            | Filter::Ne(_, value)
            | Filter::Gt(_, value)
            | Filter::Gte(_, value)
            | Filter::Lt(_, value)
            | Filter::Lte(_, value)
            | Filter::In(_, value) => {
                bind_value(args, value)?;
            }
            Filter::IsNull(_) | Filter::IsNotNull(_) => {
                // No binding needed
            }
        }
    }
    Ok(())
}

/// Build ORDER BY clause.
fn build_order_clause(order_by: &[(String, Order)]) -> String {
    if order_by.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = order_by
        .iter()
        .map(|(field, order)| {
            let dir = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            format!("{} {}", field, dir)
        })
        .collect();

    format!(" ORDER BY {}", clauses.join(", "))
}

fn build_select_sql(query: &Query) -> String {
    let (where_clause, _) = build_where_clause(&query.filters, 1);
    let order_clause = build_order_clause(&query.order_by);

    let mut sql = format!(
        "SELECT * FROM {}{}{}",
        query.table, where_clause, order_clause
    );
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = query.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }
    sql
}

fn build_insert_sql(table: &str, key: &str, columns: &[&str]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, key);
    }

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        table,
        columns.join(", "),
        placeholders.join(", "),
        key
    )
}

fn build_update_sql(table: &str, key: &str, columns: &[&str]) -> String {
    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| format!("{} = ${}", column, idx + 1))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {} = ${}",
        table,
        assignments.join(", "),
        key,
        columns.len() + 1
    )
}

/// Columns of `row` other than the key, in row order.
fn value_columns<'a>(schema: &ModelSchema, row: &'a Row) -> Vec<&'a str> {
    row.keys()
        .map(String::as_str)
        .filter(|column| *column != schema.key())
        .collect()
}

#[async_trait]
impl QueryExecutor for PgPool {
    async fn initialize(&self, schema: &ModelSchema) -> Result<(), StorageError> {
        for statement in create_statements(schema) {
            tracing::debug!(table = %schema.table(), sql = %statement, "Creating schema");
            sqlx::query(&statement)
                .execute(&self.0)
                .await
                .map_err(|e| StorageError::StorageError(e.to_string()))?;
        }
        Ok(())
    }

    async fn fetch(&self, schema: &ModelSchema, query: Query) -> Result<Vec<Row>, StorageError> {
        let sql = build_select_sql(&query);

        let mut args = PgArguments::default();
        bind_filters(&mut args, &query.filters)?;

        tracing::debug!(sql = %sql, "Fetching rows");
        let rows = sqlx::query_with(&sql, args)
            .fetch_all(&self.0)
            .await
            .map_err(|e| StorageError::StorageError(e.to_string()))?;

        rows.iter().map(|row| extract_row(schema, row)).collect()
    }

    async fn insert(&self, schema: &ModelSchema, row: &Row) -> Result<Value, StorageError> {
        let columns = value_columns(schema, row);
        let sql = build_insert_sql(schema.table(), schema.key(), &columns);

        let mut args = PgArguments::default();
        bind_row(&mut args, schema, &columns, row)?;

        let inserted = sqlx::query_with(&sql, args)
            .fetch_one(&self.0)
            .await
            .map_err(|e| unique_violation(schema, e))?;

        let key: i64 = inserted
            .try_get(0)
            .map_err(|e| StorageError::StorageError(e.to_string()))?;
        Ok(Value::Int(key))
    }

    async fn update(
        &self,
        schema: &ModelSchema,
        key: &Value,
        changes: &Row,
    ) -> Result<u64, StorageError> {
        let columns = value_columns(schema, changes);
        if columns.is_empty() {
            return Err(StorageError::StorageError(format!(
                "No columns to update in {} besides the key",
                schema.table()
            )));
        }
        let sql = build_update_sql(schema.table(), schema.key(), &columns);

        let mut args = PgArguments::default();
        bind_row(&mut args, schema, &columns, changes)?;
        bind_field(&mut args, schema.key(), &FieldKind::Serial, key)?;

        let result = sqlx::query_with(&sql, args)
            .execute(&self.0)
            .await
            .map_err(|e| unique_violation(schema, e))?;

        Ok(result.rows_affected())
    }
}

/// Map a unique-constraint failure to `UniqueViolation`, anything else to a
/// generic storage error.
fn unique_violation(schema: &ModelSchema, error: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            let field = db
                .constraint()
                .and_then(|constraint| {
                    schema
                        .fields()
                        .iter()
                        .find(|field| {
                            constraint == format!("{}_{}_key", schema.table(), field.name)
                        })
                        .map(|field| field.name.clone())
                })
                .unwrap_or_default();
            tracing::warn!(table = %schema.table(), field = %field, "Unique constraint violated");
            return StorageError::UniqueViolation {
                table: schema.table().to_string(),
                field,
            };
        }
    }
    StorageError::StorageError(error.to_string())
}
