//! In-memory implementation of QueryExecutor.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use checksumed_storage::{
    FieldConstraint, FieldKind, Filter, ModelSchema, Order, Query, QueryExecutor, Row,
    StorageError, Value,
};

#[derive(Debug, Default)]
struct Table {
    next_key: i64,
    rows: BTreeMap<i64, Row>,
}

/// Shared, cloneable in-memory store. Clones see the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored in `table`.
    pub fn len(&self, table: &str) -> Result<usize, StorageError> {
        Ok(self.read()?.get(table).map_or(0, |t| t.rows.len()))
    }

    pub fn is_empty(&self, table: &str) -> Result<bool, StorageError> {
        Ok(self.len(table)? == 0)
    }

    /// Stored row for `key`, bypassing the repository.
    pub fn row(&self, table: &str, key: i64) -> Result<Option<Row>, StorageError> {
        Ok(self
            .read()?
            .get(table)
            .and_then(|t| t.rows.get(&key).cloned()))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Table>>, StorageError> {
        self.tables
            .read()
            .map_err(|_| StorageError::StorageError("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Table>>, StorageError> {
        self.tables
            .write()
            .map_err(|_| StorageError::StorageError("memory store lock poisoned".to_string()))
    }
}

/// Order two values. Numbers compare across widths; mismatched kinds are unordered.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Datetime(a), Value::Datetime(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::UInt(a), Value::UInt(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::UInt(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
        (Value::UInt(a), Value::Int(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn field_value<'a>(row: &'a Row, field: &str) -> &'a Value {
    static NULL: Value = Value::Null;
    row.get(field).unwrap_or(&NULL)
}

fn matches(row: &Row, filter: &Filter) -> bool {
    let cmp = |field: &str, value: &Value| compare_values(field_value(row, field), value);

    match filter {
        Filter::Eq(field, value) => cmp(field, value) == Some(Ordering::Equal),
        Filter::Ne(field, value) => cmp(field, value) != Some(Ordering::Equal),
        Filter::Gt(field, value) => cmp(field, value) == Some(Ordering::Greater),
        Filter::Gte(field, value) => matches!(
            cmp(field, value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Filter::Lt(field, value) => cmp(field, value) == Some(Ordering::Less),
        Filter::Lte(field, value) => {
            matches!(cmp(field, value), Some(Ordering::Less | Ordering::Equal))
        }
        Filter::In(field, Value::Strings(options)) => match field_value(row, field) {
            Value::String(s) => options.contains(s),
            _ => false,
        },
        Filter::In(field, value) => cmp(field, value) == Some(Ordering::Equal),
        Filter::IsNull(field) => field_value(row, field).is_null(),
        Filter::IsNotNull(field) => !field_value(row, field).is_null(),
    }
}

fn sort_rows(rows: &mut [Row], order_by: &[(String, Order)]) {
    rows.sort_by(|a, b| {
        for (field, order) in order_by {
            let ordering = compare_values(field_value(a, field), field_value(b, field))
                .unwrap_or(Ordering::Equal);
            let ordering = match order {
                Order::Asc => ordering,
                Order::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Reject `candidate` if it repeats a unique value held by another row.
fn check_unique(
    schema: &ModelSchema,
    table: &Table,
    candidate: &Row,
    own_key: Option<i64>,
) -> Result<(), StorageError> {
    for field in schema
        .fields()
        .iter()
        .filter(|f| f.constraint == FieldConstraint::Unique)
    {
        let Some(value) = candidate.get(&field.name).filter(|v| !v.is_null()) else {
            continue;
        };

        let taken = table
            .rows
            .iter()
            .filter(|(key, _)| Some(**key) != own_key)
            .any(|(_, row)| row.get(&field.name) == Some(value));

        if taken {
            tracing::warn!(
                table = %schema.table(),
                field = %field.name,
                "Unique constraint violated"
            );
            return Err(StorageError::UniqueViolation {
                table: schema.table().to_string(),
                field: field.name.clone(),
            });
        }
    }
    Ok(())
}

/// Reject rows missing a required attribute or carrying undeclared ones.
fn check_row(schema: &ModelSchema, row: &Row) -> Result<(), StorageError> {
    for name in row.keys() {
        if !schema.has_field(name) {
            return Err(StorageError::UnknownAttribute(name.clone()));
        }
    }
    for field in schema.fields() {
        if field.required
            && field.kind != FieldKind::Serial
            && row.get(&field.name).is_none_or(Value::is_null)
        {
            return Err(StorageError::MissingAttribute(field.name.clone()));
        }
        if let (FieldKind::FixedString { length }, Some(Value::String(s))) =
            (field.kind, row.get(&field.name))
        {
            if s.chars().count() != length {
                return Err(StorageError::StorageError(format!(
                    "{}.{} must be {} characters",
                    schema.table(),
                    field.name,
                    length
                )));
            }
        }
    }
    Ok(())
}

fn table_mut<'a>(
    tables: &'a mut HashMap<String, Table>,
    schema: &ModelSchema,
) -> Result<&'a mut Table, StorageError> {
    tables
        .get_mut(schema.table())
        .ok_or_else(|| StorageError::NotFound(format!("table {}", schema.table())))
}

#[async_trait]
impl QueryExecutor for MemoryStore {
    async fn initialize(&self, schema: &ModelSchema) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        tables.entry(schema.table().to_string()).or_insert_with(|| Table {
            next_key: 1,
            rows: BTreeMap::new(),
        });
        tracing::debug!(table = %schema.table(), "Initialized memory table");
        Ok(())
    }

    async fn fetch(&self, schema: &ModelSchema, query: Query) -> Result<Vec<Row>, StorageError> {
        let tables = self.read()?;
        let table = tables
            .get(&query.table)
            .ok_or_else(|| StorageError::NotFound(format!("table {}", query.table)))?;

        for filter in &query.filters {
            if !schema.has_field(filter.field()) {
                return Err(StorageError::UnknownAttribute(filter.field().to_string()));
            }
        }

        let mut rows: Vec<Row> = table
            .rows
            .values()
            .filter(|row| query.filters.iter().all(|filter| matches(row, filter)))
            .cloned()
            .collect();
        sort_rows(&mut rows, &query.order_by);

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |limit| limit as usize);
        let rows: Vec<Row> = rows.into_iter().skip(offset).take(limit).collect();

        tracing::debug!(table = %query.table, filters = query.filters.len(), found = rows.len(), "Fetched rows");
        Ok(rows)
    }

    async fn insert(&self, schema: &ModelSchema, row: &Row) -> Result<Value, StorageError> {
        check_row(schema, row)?;

        let mut tables = self.write()?;
        let table = table_mut(&mut tables, schema)?;
        check_unique(schema, table, row, None)?;

        let key = table.next_key;
        table.next_key += 1;

        let mut stored = row.clone();
        stored.insert(schema.key().to_string(), Value::Int(key));
        table.rows.insert(key, stored);

        tracing::debug!(table = %schema.table(), key, "Inserted row");
        Ok(Value::Int(key))
    }

    async fn update(
        &self,
        schema: &ModelSchema,
        key: &Value,
        changes: &Row,
    ) -> Result<u64, StorageError> {
        let key = key
            .as_i64()
            .ok_or_else(|| StorageError::StorageError(format!("Invalid key: {:?}", key)))?;

        let mut tables = self.write()?;
        let table = table_mut(&mut tables, schema)?;
        let Some(current) = table.rows.get(&key) else {
            return Ok(0);
        };

        let mut updated = current.clone();
        for (name, value) in changes {
            if value.is_null() {
                updated.remove(name);
            } else {
                updated.insert(name.clone(), value.clone());
            }
        }
        check_row(schema, &updated)?;
        check_unique(schema, table, &updated, Some(key))?;

        table.rows.insert(key, updated);
        tracing::debug!(table = %schema.table(), key, changed = changes.len(), "Updated row");
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checksumed_storage::{ChecksumOptions, FieldDefinition, SchemaBuilder};

    fn schema() -> ModelSchema {
        SchemaBuilder::new("pages")
            .key("id")
            .field(FieldDefinition::new("path", FieldKind::Text).required())
            .unwrap()
            .field(FieldDefinition::new("rank", FieldKind::BigInt))
            .unwrap()
            .checksum("path", ChecksumOptions::default())
            .unwrap()
            .build()
            .unwrap()
    }

    fn row(path: &str, rank: i64) -> Row {
        let mut row = Row::new();
        row.insert("path".to_string(), Value::from(path));
        row.insert(
            "path_checksum".to_string(),
            Value::from(checksumed_storage::digest_text(path)),
        );
        row.insert("rank".to_string(), Value::Int(rank));
        row
    }

    #[tokio::test]
    async fn insert_assigns_serial_keys() {
        let store = MemoryStore::new();
        let schema = schema();
        store.initialize(&schema).await.unwrap();

        assert_eq!(store.insert(&schema, &row("/a", 1)).await.unwrap(), Value::Int(1));
        assert_eq!(store.insert(&schema, &row("/b", 2)).await.unwrap(), Value::Int(2));
        assert_eq!(store.len("pages").unwrap(), 2);
        assert_eq!(
            store.row("pages", 2).unwrap().unwrap().get("id"),
            Some(&Value::Int(2))
        );
    }

    #[tokio::test]
    async fn unique_fields_are_enforced() {
        let store = MemoryStore::new();
        let schema = schema();
        store.initialize(&schema).await.unwrap();

        store.insert(&schema, &row("/a", 1)).await.unwrap();
        let err = store.insert(&schema, &row("/a", 2)).await.unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation { field, .. } if field == "path_checksum"));
        assert_eq!(store.len("pages").unwrap(), 1);
    }

    #[tokio::test]
    async fn required_fields_are_enforced() {
        let store = MemoryStore::new();
        let schema = schema();
        store.initialize(&schema).await.unwrap();

        let mut missing = row("/a", 1);
        missing.remove("path_checksum");
        let err = store.insert(&schema, &missing).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingAttribute(name) if name == "path_checksum"));

        let mut short = row("/a", 1);
        short.insert("path_checksum".to_string(), Value::from("abc"));
        assert!(store.insert(&schema, &short).await.is_err());
    }

    #[tokio::test]
    async fn fetch_filters_orders_and_pages() {
        let store = MemoryStore::new();
        let schema = schema();
        store.initialize(&schema).await.unwrap();
        for (path, rank) in [("/a", 3), ("/b", 1), ("/c", 2), ("/d", 5)] {
            store.insert(&schema, &row(path, rank)).await.unwrap();
        }

        let query = Query::new("pages")
            .gt("rank", 1_i64)
            .order_by("rank", Order::Desc)
            .offset(1)
            .limit(2);
        let rows = store.fetch(&schema, query).await.unwrap();
        let paths: Vec<_> = rows.iter().map(|r| r.get("path").unwrap().clone()).collect();
        assert_eq!(paths, vec![Value::from("/a"), Value::from("/c")]);

        let rows = store
            .fetch(&schema, Query::new("pages").r#in("path", vec!["/b", "/d"]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn fetch_rejects_undeclared_fields() {
        let store = MemoryStore::new();
        let schema = schema();
        store.initialize(&schema).await.unwrap();

        let err = store
            .fetch(&schema, Query::new("pages").eq("nope", 1_i64))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownAttribute(name) if name == "nope"));
    }

    #[tokio::test]
    async fn update_writes_changes_and_checks_uniqueness() {
        let store = MemoryStore::new();
        let schema = schema();
        store.initialize(&schema).await.unwrap();
        store.insert(&schema, &row("/a", 1)).await.unwrap();
        store.insert(&schema, &row("/b", 2)).await.unwrap();

        let mut changes = Row::new();
        changes.insert("rank".to_string(), Value::Null);
        assert_eq!(store.update(&schema, &Value::Int(1), &changes).await.unwrap(), 1);
        assert!(store.row("pages", 1).unwrap().unwrap().get("rank").is_none());

        let clash = row("/b", 9);
        assert!(store.update(&schema, &Value::Int(1), &clash).await.is_err());
        assert_eq!(store.update(&schema, &Value::Int(42), &changes).await.unwrap(), 0);
    }

    #[test]
    fn numbers_compare_across_widths() {
        assert_eq!(
            compare_values(&Value::Int(2), &Value::UInt(2)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_values(&Value::Int(-1), &Value::UInt(0)),
            Some(Ordering::Less)
        );
        assert_eq!(compare_values(&Value::Int(1), &Value::from("1")), None);
    }
}
