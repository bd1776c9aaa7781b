use thiserror::Error;

/// A value that has no canonical textual representation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ConversionError(pub String);

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Attribute already checksumed: {0}")]
    DuplicateChecksumDeclaration(String),

    #[error("Field already declared: {0}")]
    DuplicateField(String),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Model {0} has no key field")]
    MissingKey(String),

    #[error("Cannot convert attribute {attribute} to text: {source}")]
    AttributeConversion {
        attribute: String,
        #[source]
        source: ConversionError,
    },

    #[error("Unique constraint violated on {table}.{field}")]
    UniqueViolation { table: String, field: String },

    #[error("Required attribute missing: {0}")]
    MissingAttribute(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl StorageError {
    pub(crate) fn conversion(attribute: impl Into<String>, source: ConversionError) -> Self {
        StorageError::AttributeConversion {
            attribute: attribute.into(),
            source,
        }
    }
}
