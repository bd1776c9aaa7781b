//! Per-model table of checksumed attributes.
//!
//! A [`ChecksumRegistry`] is built once, alongside its [`ModelSchema`](crate::ModelSchema),
//! and never mutated afterwards. It is shared behind an `Arc` and read from any
//! number of threads without locking.

use std::collections::BTreeMap;

use crate::{Lookup, StorageError, Value, digest};

/// Suffix appended to a base attribute to name its checksum field.
pub const CHECKSUM_SUFFIX: &str = "_checksum";

/// Name of the checksum field for `base_attribute`.
pub fn checksum_field_name(base_attribute: &str) -> String {
    format!("{}{}", base_attribute, CHECKSUM_SUFFIX)
}

/// Options accepted when declaring a checksumed attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumOptions {
    /// Enforce uniqueness on the checksum field. When false the field is
    /// indexed without a uniqueness constraint.
    pub unique: bool,
}

impl ChecksumOptions {
    pub fn unique() -> Self {
        Self { unique: true }
    }

    pub fn indexed() -> Self {
        Self { unique: false }
    }
}

impl Default for ChecksumOptions {
    fn default() -> Self {
        Self::unique()
    }
}

/// One checksumed attribute and the policy of its checksum field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumSpec {
    pub base_attribute: String,
    pub checksum_field: String,
    pub unique: bool,
    pub required: bool,
}

impl ChecksumSpec {
    pub fn new(base_attribute: impl Into<String>, options: ChecksumOptions) -> Self {
        let base_attribute = base_attribute.into();
        Self {
            checksum_field: checksum_field_name(&base_attribute),
            base_attribute,
            unique: options.unique,
            required: true,
        }
    }
}

/// Mapping from base attribute name to its [`ChecksumSpec`].
#[derive(Debug, Clone, Default)]
pub struct ChecksumRegistry {
    specs: BTreeMap<String, ChecksumSpec>,
}

impl ChecksumRegistry {
    /// Register a spec. Declaring the same attribute twice is an error.
    pub(crate) fn register(&mut self, spec: ChecksumSpec) -> Result<(), StorageError> {
        if self.specs.contains_key(&spec.base_attribute) {
            return Err(StorageError::DuplicateChecksumDeclaration(
                spec.base_attribute,
            ));
        }
        self.specs.insert(spec.base_attribute.clone(), spec);
        Ok(())
    }

    pub fn is_checksumed(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Option<&ChecksumSpec> {
        self.specs.get(name)
    }

    pub fn checksum_field(&self, name: &str) -> Option<&str> {
        self.specs.get(name).map(|spec| spec.checksum_field.as_str())
    }

    /// The base attribute whose checksum is stored in `field`, if any.
    pub fn base_of(&self, field: &str) -> Option<&str> {
        self.specs
            .values()
            .find(|spec| spec.checksum_field == field)
            .map(|spec| spec.base_attribute.as_str())
    }

    pub fn specs(&self) -> impl Iterator<Item = &ChecksumSpec> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Substitute equality predicates on checksumed attributes with predicates
    /// on their checksum fields.
    ///
    /// Only [`Lookup::Equals`] maps are rewritten, in a single pass. Other keys,
    /// including names of checksum fields themselves, pass through untouched.
    /// When a checksum field is named directly and also produced by a
    /// substitution with a different value, both predicates are kept as a
    /// [`Lookup::Conjunction`].
    pub fn rewrite(&self, lookup: Lookup) -> Result<Lookup, StorageError> {
        let predicates = match lookup {
            Lookup::Equals(predicates) => predicates,
            other => return Ok(other),
        };

        let mut rewritten: Vec<(String, Value)> = Vec::with_capacity(predicates.len());
        for (name, value) in predicates {
            match self.specs.get(&name) {
                Some(spec) => {
                    let checksum = digest(&value)
                        .map_err(|e| StorageError::conversion(name.as_str(), e))?;
                    tracing::debug!(
                        attribute = %name,
                        field = %spec.checksum_field,
                        "Substituting checksum predicate"
                    );
                    rewritten.push((spec.checksum_field.clone(), Value::String(checksum)));
                }
                None => rewritten.push((name, value)),
            }
        }

        let mut merged = BTreeMap::new();
        let mut conflicting = false;
        for (name, value) in &rewritten {
            match merged.get(name) {
                Some(existing) if existing != value => conflicting = true,
                Some(_) => {}
                None => {
                    merged.insert(name.clone(), value.clone());
                }
            }
        }

        if conflicting {
            tracing::debug!(
                predicates = rewritten.len(),
                "Checksum predicate conflicts with a direct checksum field predicate"
            );
            return Ok(Lookup::Conjunction(rewritten));
        }
        Ok(Lookup::Equals(merged))
    }
}
