//! Table and index DDL for model schemas.

use checksumed_storage::{FieldConstraint, FieldDefinition, FieldKind, ModelSchema};

/// PostgreSQL column type for a field kind.
pub fn column_type(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Serial => "BIGSERIAL".to_string(),
        FieldKind::Text => "TEXT".to_string(),
        FieldKind::FixedString { length } => format!("CHAR({})", length),
        FieldKind::BigInt => "BIGINT".to_string(),
        FieldKind::Integer => "INTEGER".to_string(),
        FieldKind::Boolean => "BOOLEAN".to_string(),
        FieldKind::Float => "DOUBLE PRECISION".to_string(),
        FieldKind::Datetime => "TIMESTAMPTZ".to_string(),
        FieldKind::Json => "JSONB".to_string(),
    }
}

fn column_definition(schema: &ModelSchema, field: &FieldDefinition) -> String {
    let mut column = format!("{} {}", field.name, column_type(&field.kind));
    if field.name == schema.key() {
        column.push_str(" PRIMARY KEY");
        return column;
    }
    if field.required {
        column.push_str(" NOT NULL");
    }
    if field.constraint == FieldConstraint::Unique {
        column.push_str(" UNIQUE");
    }
    column
}

/// Statements that create the schema's table and its indexes.
///
/// All statements are idempotent.
pub fn create_statements(schema: &ModelSchema) -> Vec<String> {
    let columns: Vec<String> = schema
        .fields()
        .iter()
        .map(|field| column_definition(schema, field))
        .collect();

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        schema.table(),
        columns.join(", ")
    )];

    statements.extend(
        schema
            .fields()
            .iter()
            .filter(|field| field.constraint == FieldConstraint::Index)
            .map(|field| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {table}_{field}_idx ON {table} ({field})",
                    table = schema.table(),
                    field = field.name
                )
            }),
    );

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use checksumed_storage::{ChecksumOptions, SchemaBuilder};

    fn schema() -> ModelSchema {
        SchemaBuilder::new("media")
            .key("id")
            .field(FieldDefinition::new("url", FieldKind::Text).required())
            .unwrap()
            .field(FieldDefinition::new("body", FieldKind::Json))
            .unwrap()
            .field(FieldDefinition::new("captured_at", FieldKind::Datetime))
            .unwrap()
            .checksum("url", ChecksumOptions::unique())
            .unwrap()
            .checksum("body", ChecksumOptions::indexed())
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn create_table_declares_checksum_columns() {
        let statements = create_statements(&schema());

        assert_eq!(
            statements[0],
            "CREATE TABLE IF NOT EXISTS media (\
             id BIGSERIAL PRIMARY KEY, \
             url TEXT NOT NULL, \
             body JSONB, \
             captured_at TIMESTAMPTZ, \
             url_checksum CHAR(64) NOT NULL UNIQUE, \
             body_checksum CHAR(64) NOT NULL)"
        );
    }

    #[test]
    fn indexed_checksums_get_an_index() {
        let statements = create_statements(&schema());

        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[1],
            "CREATE INDEX IF NOT EXISTS media_body_checksum_idx ON media (body_checksum)"
        );
    }

    #[test]
    fn column_types() {
        assert_eq!(column_type(&FieldKind::FixedString { length: 64 }), "CHAR(64)");
        assert_eq!(column_type(&FieldKind::Float), "DOUBLE PRECISION");
        assert_eq!(column_type(&FieldKind::Integer), "INTEGER");
    }
}
