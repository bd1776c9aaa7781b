//! Model schemas and the declaration API for checksumed attributes.
//!
//! A [`ModelSchema`] is assembled with a [`SchemaBuilder`] during model
//! definition and is immutable afterwards:
//!
//! ```text
//! let schema = SchemaBuilder::new("urls")
//!     .key("id")
//!     .field(FieldDefinition::new("url", FieldKind::Text).required())?
//!     .checksum("url", ChecksumOptions::default())?
//!     .build()?;
//! ```

use std::sync::Arc;

use crate::{
    CHECKSUM_LENGTH, ChecksumOptions, ChecksumRegistry, ChecksumSpec, StorageError, Value, digest,
};

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Auto-incrementing integer key assigned by the engine.
    Serial,
    Text,
    FixedString { length: usize },
    BigInt,
    Integer,
    Boolean,
    Float,
    Datetime,
    Json,
}

/// Uniqueness or indexing requested for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldConstraint {
    #[default]
    None,
    Unique,
    Index,
}

/// Rule for computing a field's value when a record has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldDefault {
    /// Checksum of the current value of the named base attribute.
    ChecksumOf(String),
}

impl FieldDefault {
    /// Evaluate the rule against a record's attribute reader.
    pub fn evaluate<'a>(
        &self,
        get: impl Fn(&str) -> Option<&'a Value>,
    ) -> Result<Value, StorageError> {
        match self {
            FieldDefault::ChecksumOf(base) => {
                let checksum = match get(base) {
                    Some(current) => digest(current),
                    None => digest(&Value::Null),
                }
                .map_err(|e| StorageError::conversion(base.as_str(), e))?;
                Ok(Value::String(checksum))
            }
        }
    }
}

/// A declared field of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub constraint: FieldConstraint,
    pub default: Option<FieldDefault>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            constraint: FieldConstraint::None,
            default: None,
        }
    }

    pub fn serial(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Serial)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.constraint = FieldConstraint::Unique;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.constraint = FieldConstraint::Index;
        self
    }

    pub fn with_default(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }

    /// The sibling field holding the checksum of `spec.base_attribute`.
    pub fn checksum(spec: &ChecksumSpec) -> Self {
        let field = Self::new(
            spec.checksum_field.clone(),
            FieldKind::FixedString {
                length: CHECKSUM_LENGTH,
            },
        )
        .required()
        .with_default(FieldDefault::ChecksumOf(spec.base_attribute.clone()));

        if spec.unique {
            field.unique()
        } else {
            field.indexed()
        }
    }
}

/// Immutable description of a model: its table, key, fields and checksum registry.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    table: String,
    key: String,
    fields: Vec<FieldDefinition>,
    registry: ChecksumRegistry,
}

impl ModelSchema {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name of the key field.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn registry(&self) -> &ChecksumRegistry {
        &self.registry
    }

    pub fn is_checksumed(&self, name: &str) -> bool {
        self.registry.is_checksumed(name)
    }

    pub fn into_shared(self) -> Arc<ModelSchema> {
        Arc::new(self)
    }
}

/// Builder used while a model is being defined.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    table: String,
    key: Option<String>,
    fields: Vec<FieldDefinition>,
    registry: ChecksumRegistry,
}

impl SchemaBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: None,
            fields: Vec::new(),
            registry: ChecksumRegistry::default(),
        }
    }

    /// Declare a serial key field.
    pub fn key(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.fields.retain(|field| field.name != name);
        self.fields.insert(0, FieldDefinition::serial(name.clone()));
        self.key = Some(name);
        self
    }

    /// Declare a field. Field names must be unique within the model.
    pub fn field(mut self, field: FieldDefinition) -> Result<Self, StorageError> {
        if self.fields.iter().any(|existing| existing.name == field.name) {
            return Err(StorageError::DuplicateField(field.name));
        }
        self.fields.push(field);
        Ok(self)
    }

    /// Declare `base_attribute` checksumed.
    ///
    /// Adds the `{base_attribute}_checksum` field (64 characters, required,
    /// defaulting to the checksum of the base attribute) with either a
    /// uniqueness constraint or a plain index, and registers the spec.
    pub fn checksum(
        mut self,
        base_attribute: impl Into<String>,
        options: ChecksumOptions,
    ) -> Result<Self, StorageError> {
        let spec = ChecksumSpec::new(base_attribute, options);

        if self.registry.is_checksumed(&spec.base_attribute) {
            return Err(StorageError::DuplicateChecksumDeclaration(
                spec.base_attribute,
            ));
        }
        if !self
            .fields
            .iter()
            .any(|field| field.name == spec.base_attribute)
        {
            return Err(StorageError::UnknownAttribute(spec.base_attribute));
        }

        self = self.field(FieldDefinition::checksum(&spec))?;
        self.registry.register(spec)?;
        Ok(self)
    }

    pub fn build(self) -> Result<ModelSchema, StorageError> {
        let key = self
            .key
            .ok_or_else(|| StorageError::MissingKey(self.table.clone()))?;

        tracing::debug!(
            table = %self.table,
            fields = self.fields.len(),
            checksumed = self.registry.len(),
            "Defined model schema"
        );

        Ok(ModelSchema {
            table: self.table,
            key,
            fields: self.fields,
            registry: self.registry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_builder() -> SchemaBuilder {
        SchemaBuilder::new("urls")
            .key("id")
            .field(FieldDefinition::new("url", FieldKind::Text).required())
            .unwrap()
    }

    #[test]
    fn checksum_adds_unique_sibling_field() {
        let schema = url_builder()
            .checksum("url", ChecksumOptions::default())
            .unwrap()
            .build()
            .unwrap();

        assert!(schema.is_checksumed("url"));
        let field = schema.field("url_checksum").unwrap();
        assert_eq!(field.kind, FieldKind::FixedString { length: 64 });
        assert!(field.required);
        assert_eq!(field.constraint, FieldConstraint::Unique);
        assert_eq!(
            field.default,
            Some(FieldDefault::ChecksumOf("url".to_string()))
        );
    }

    #[test]
    fn non_unique_checksum_is_indexed() {
        let schema = url_builder()
            .checksum("url", ChecksumOptions::indexed())
            .unwrap()
            .build()
            .unwrap();

        let field = schema.field("url_checksum").unwrap();
        assert_eq!(field.constraint, FieldConstraint::Index);
        assert!(!schema.registry().spec("url").unwrap().unique);
    }

    #[test]
    fn duplicate_checksum_is_rejected() {
        let err = url_builder()
            .checksum("url", ChecksumOptions::default())
            .unwrap()
            .checksum("url", ChecksumOptions::indexed())
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateChecksumDeclaration(name) if name == "url"));
    }

    #[test]
    fn checksum_field_may_not_collide() {
        let err = url_builder()
            .field(FieldDefinition::new("url_checksum", FieldKind::Text))
            .unwrap()
            .checksum("url", ChecksumOptions::default())
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateField(name) if name == "url_checksum"));
    }

    #[test]
    fn checksum_requires_declared_base() {
        let err = url_builder()
            .checksum("title", ChecksumOptions::default())
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownAttribute(name) if name == "title"));
    }

    #[test]
    fn build_requires_key() {
        let err = SchemaBuilder::new("urls").build().unwrap_err();
        assert!(matches!(err, StorageError::MissingKey(table) if table == "urls"));
    }

    #[test]
    fn key_is_first_field() {
        let schema = url_builder().build().unwrap();
        assert_eq!(schema.key(), "id");
        assert_eq!(schema.fields()[0].kind, FieldKind::Serial);
    }

    #[test]
    fn default_rule_checksums_base_value() {
        let rule = FieldDefault::ChecksumOf("url".to_string());
        let url = Value::from("hello");
        let value = rule
            .evaluate(|name| if name == "url" { Some(&url) } else { None })
            .unwrap();
        assert_eq!(
            value,
            Value::from("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }
}
