//! Records, their dirty state, and write-time checksum synchronization.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::{ChecksumRegistry, ModelSchema, Row, StorageError, Value, digest};

/// Minimal attribute capability a record must offer to host checksum sync.
pub trait Attributes {
    /// Current in-memory value, if one is assigned.
    fn get(&self, name: &str) -> Option<&Value>;

    fn set(&mut self, name: &str, value: Value) -> Result<(), StorageError>;

    /// Whether `name` changed since the record was last loaded or saved.
    fn is_dirty(&self, name: &str) -> bool;
}

/// Recompute the checksum of every dirty checksumed attribute.
///
/// Runs before a record is written. A checksum field that was itself assigned
/// or cleared is recomputed from its base attribute too. All checksums are
/// computed before any is assigned, so a conversion failure leaves the record
/// unchanged. Clean attributes keep their stored checksum. Returns the number
/// of checksum fields refreshed.
pub fn sync_checksums<A>(registry: &ChecksumRegistry, record: &mut A) -> Result<usize, StorageError>
where
    A: Attributes + ?Sized,
{
    let mut pending = Vec::new();

    for spec in registry.specs() {
        if !record.is_dirty(&spec.base_attribute) && !record.is_dirty(&spec.checksum_field) {
            continue;
        }

        let checksum = match record.get(&spec.base_attribute) {
            Some(value) => digest(value),
            None => digest(&Value::Null),
        }
        .map_err(|e| StorageError::conversion(spec.base_attribute.as_str(), e))?;

        pending.push((spec.checksum_field.as_str(), checksum));
    }

    let refreshed = pending.len();
    for (field, checksum) in pending {
        tracing::debug!(field, checksum = %checksum, "Refreshing checksum");
        record.set(field, Value::String(checksum))?;
    }

    Ok(refreshed)
}

/// An in-memory record bound to its model schema.
///
/// Holds the current attribute values and, once loaded or saved, a snapshot
/// of the last persisted values. An attribute is dirty when its current value
/// differs from the snapshot; on a record that was never persisted every
/// assigned attribute is dirty.
#[derive(Debug, Clone)]
pub struct Resource {
    schema: Arc<ModelSchema>,
    values: Row,
    persisted: Option<Row>,
}

impl Resource {
    /// A new, never persisted record.
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        Self {
            schema,
            values: Row::new(),
            persisted: None,
        }
    }

    /// A new record with the given attributes assigned.
    pub fn with_attributes<K, V>(
        schema: Arc<ModelSchema>,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self, StorageError>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut resource = Self::new(schema);
        for (name, value) in attributes {
            resource.set(name.as_ref(), value)?;
        }
        Ok(resource)
    }

    /// A record read back from storage. Nothing is dirty.
    pub fn loaded(schema: Arc<ModelSchema>, values: Row) -> Self {
        Self {
            schema,
            persisted: Some(values.clone()),
            values,
        }
    }

    /// A new record built from a serializable model.
    ///
    /// Null members (such as an unassigned `Option` key) are left unassigned.
    pub fn from_model<M: Serialize>(schema: Arc<ModelSchema>, model: &M) -> Result<Self, StorageError> {
        let json = serde_json::to_value(model)?;
        let serde_json::Value::Object(members) = json else {
            return Err(StorageError::StorageError(
                "Expected JSON object for model".to_string(),
            ));
        };

        let mut resource = Self::new(schema);
        for (name, member) in members {
            if member.is_null() {
                continue;
            }
            resource.set(&name, Value::from_json(member))?;
        }
        Ok(resource)
    }

    /// Deserialize the current values into a typed model.
    pub fn to_model<M: DeserializeOwned>(&self) -> Result<M, StorageError> {
        let members: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        Ok(serde_json::from_value(serde_json::Value::Object(members))?)
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    pub fn is_new(&self) -> bool {
        self.persisted.is_none()
    }

    /// Value of the key field, once assigned by the engine.
    pub fn key(&self) -> Option<&Value> {
        self.values.get(self.schema.key())
    }

    /// Read an attribute, evaluating the field's default rule when no value
    /// is assigned. The computed default is not stored.
    pub fn value(&self, name: &str) -> Result<Option<Value>, StorageError> {
        if let Some(value) = self.values.get(name) {
            return Ok(Some(value.clone()));
        }

        let field = self
            .schema
            .field(name)
            .ok_or_else(|| StorageError::UnknownAttribute(name.to_string()))?;

        match &field.default {
            Some(rule) => rule.evaluate(|attr| self.values.get(attr)).map(Some),
            None => Ok(None),
        }
    }

    /// Shorthand for [`Resource::value`] on string attributes.
    pub fn string(&self, name: &str) -> Result<Option<String>, StorageError> {
        Ok(self.value(name)?.and_then(|value| match value {
            Value::String(s) => Some(s),
            _ => None,
        }))
    }

    /// Assign an attribute declared by the schema.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), StorageError> {
        Attributes::set(self, name, value.into())
    }

    pub fn values(&self) -> &Row {
        &self.values
    }

    /// Names of attributes changed since the last load or save.
    pub fn dirty_attributes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .values
            .keys()
            .map(String::as_str)
            .filter(|name| self.is_dirty(name))
            .collect();

        if let Some(snapshot) = &self.persisted {
            names.extend(
                snapshot
                    .keys()
                    .map(String::as_str)
                    .filter(|name| !self.values.contains_key(*name)),
            );
            names.sort_unstable();
        }
        names
    }

    /// Current values of the dirty attributes. Cleared attributes map to
    /// [`Value::Null`].
    pub fn changes(&self) -> Row {
        self.dirty_attributes()
            .into_iter()
            .map(|name| {
                let value = self.values.get(name).cloned().unwrap_or(Value::Null);
                (name.to_string(), value)
            })
            .collect()
    }

    /// Remove an attribute's value.
    pub fn clear(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn is_clean(&self) -> bool {
        self.dirty_attributes().is_empty()
    }

    /// Assign every missing field that has a default rule.
    pub fn apply_defaults(&mut self) -> Result<(), StorageError> {
        let mut defaults = Vec::new();
        for field in self.schema.fields() {
            if self.values.contains_key(&field.name) {
                continue;
            }
            if let Some(rule) = &field.default {
                defaults.push((
                    field.name.clone(),
                    rule.evaluate(|attr| self.values.get(attr))?,
                ));
            }
        }

        self.values.extend(defaults);
        Ok(())
    }

    /// Record the current values as the persisted state.
    pub fn mark_persisted(&mut self) {
        self.persisted = Some(self.values.clone());
    }

    pub(crate) fn assign_key(&mut self, key: Value) {
        let name = self.schema.key().to_string();
        self.values.insert(name, key);
    }
}

impl Attributes for Resource {
    fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    fn set(&mut self, name: &str, value: Value) -> Result<(), StorageError> {
        if !self.schema.has_field(name) {
            return Err(StorageError::UnknownAttribute(name.to_string()));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    fn is_dirty(&self, name: &str) -> bool {
        match &self.persisted {
            None => self.values.contains_key(name),
            Some(snapshot) => self.values.get(name) != snapshot.get(name),
        }
    }
}
