//! Binding attribute values to PostgreSQL parameters and reading rows back.
//!
//! Record values are bound against their declared [`FieldKind`] so that nulls
//! carry the column's type and RFC 3339 strings reach `TIMESTAMPTZ` columns as
//! timestamps. Filter values have no declared kind and are bound as they are.

use chrono::{DateTime, Utc};
use checksumed_storage::{FieldKind, ModelSchema, Row, StorageDatetime, StorageError, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Arguments, Column, Row as _, TypeInfo};

fn bind_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::StorageError(e.to_string())
}

/// Bind a filter value.
pub(crate) fn bind_value(args: &mut PgArguments, value: &Value) -> Result<(), StorageError> {
    match value {
        Value::String(s) => args.add(s.as_str()),
        Value::Int(n) => args.add(*n),
        Value::UInt(n) => args.add(i64::try_from(*n).map_err(bind_error)?),
        Value::Float(n) => args.add(*n),
        Value::Bool(b) => args.add(*b),
        Value::Strings(v) => args.add(v.as_slice()),
        Value::Datetime(dt) => args.add(*dt.inner()),
        Value::Bytes(bytes) => args.add(bytes.as_slice()),
        Value::Json(json) => args.add(json.clone()),
        Value::Null => args.add(None::<String>),
    }
    .map_err(bind_error)
}

/// Bind a record value for a column of the given kind.
pub(crate) fn bind_field(
    args: &mut PgArguments,
    name: &str,
    kind: &FieldKind,
    value: &Value,
) -> Result<(), StorageError> {
    match (kind, value) {
        (FieldKind::Datetime, Value::Null) => args.add(None::<DateTime<Utc>>),
        (FieldKind::Serial | FieldKind::BigInt, Value::Null) => args.add(None::<i64>),
        (FieldKind::Integer, Value::Null) => args.add(None::<i32>),
        (FieldKind::Boolean, Value::Null) => args.add(None::<bool>),
        (FieldKind::Float, Value::Null) => args.add(None::<f64>),
        (FieldKind::Json, Value::Null) => args.add(None::<serde_json::Value>),
        (_, Value::Null) => args.add(None::<String>),

        (FieldKind::Datetime, Value::String(s)) => {
            let dt = StorageDatetime::parse(s).map_err(|e| {
                StorageError::StorageError(format!("Invalid datetime for {}: {}", name, e))
            })?;
            args.add(*dt.inner())
        }
        (FieldKind::Integer, Value::Int(n)) => args.add(i32::try_from(*n).map_err(bind_error)?),
        (FieldKind::Float, Value::Int(n)) => args.add(*n as f64),
        (FieldKind::Json, Value::Json(json)) => args.add(json.clone()),
        (FieldKind::Json, other) => args.add(other.to_json()),
        (FieldKind::Text | FieldKind::FixedString { .. }, Value::Bytes(bytes)) => {
            let text = std::str::from_utf8(bytes).map_err(|e| {
                StorageError::StorageError(format!("Invalid text for {}: {}", name, e))
            })?;
            args.add(text)
        }
        _ => return bind_value(args, value),
    }
    .map_err(bind_error)
}

/// Bind `values` for `columns` in order.
pub(crate) fn bind_row(
    args: &mut PgArguments,
    schema: &ModelSchema,
    columns: &[&str],
    values: &Row,
) -> Result<(), StorageError> {
    for column in columns {
        let field = schema
            .field(column)
            .ok_or_else(|| StorageError::UnknownAttribute((*column).to_string()))?;
        let value = values.get(*column).unwrap_or(&Value::Null);
        bind_field(args, column, &field.kind, value)?;
    }
    Ok(())
}

/// Read a fetched row into record values.
///
/// Only columns declared by the schema are read. Nulls are left out, matching
/// how records hold unassigned attributes.
pub(crate) fn extract_row(schema: &ModelSchema, row: &PgRow) -> Result<Row, StorageError> {
    let mut values = Row::new();
    for field in schema.fields() {
        let value = extract_column_value(row, &field.name)?;
        if !value.is_null() {
            values.insert(field.name.clone(), value);
        }
    }
    Ok(values)
}

fn extract_column_value(row: &PgRow, col_name: &str) -> Result<Value, StorageError> {
    let col_idx = row
        .columns()
        .iter()
        .position(|c| c.name() == col_name)
        .ok_or_else(|| StorageError::StorageError(format!("Column not found: {}", col_name)))?;

    let type_name = row.columns()[col_idx].type_info().name();

    let value = match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(col_idx)
            .map_err(bind_error)?
            .map(Value::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(col_idx)
            .map_err(bind_error)?
            .map(|n| Value::Int(n.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(col_idx)
            .map_err(bind_error)?
            .map(|n| Value::Int(n.into())),
        "INT8" => row
            .try_get::<Option<i64>, _>(col_idx)
            .map_err(bind_error)?
            .map(Value::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(col_idx)
            .map_err(bind_error)?
            .map(|n| Value::Float(n.into())),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(col_idx)
            .map_err(bind_error)?
            .map(Value::Float),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(col_idx)
            .map_err(bind_error)?
            .map(|dt| Value::Datetime(dt.into())),
        "JSONB" | "JSON" => row
            .try_get::<Option<serde_json::Value>, _>(col_idx)
            .map_err(bind_error)?
            .map(Value::Json),
        "TEXT[]" | "VARCHAR[]" => row
            .try_get::<Option<Vec<String>>, _>(col_idx)
            .map_err(bind_error)?
            .map(Value::Strings),
        // TEXT, VARCHAR, CHAR (BPCHAR) and anything else textual
        _ => row
            .try_get::<Option<String>, _>(col_idx)
            .map_err(bind_error)?
            .map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}
