//! The checksum function and the canonical text rule it hashes.
//!
//! Every checksum in this crate is the SHA-256 of the UTF-8 bytes of a value's
//! canonical text, rendered as 64 lowercase hex characters. Canonical text is
//! defined per type by [`Canonical`]:
//!
//! | Type | Canonical text |
//! |---|---|
//! | `str`, `String`, [`Value::String`] | the string itself |
//! | integers, [`Value::Int`], [`Value::UInt`] | base-10 digits |
//! | `bool`, [`Value::Bool`] | `true` / `false` |
//! | `f64`, [`Value::Float`] | shortest round-trip decimal; NaN and infinities fail |
//! | [`StorageDatetime`], [`Value::Datetime`] | RFC 3339, microseconds, `Z` |
//! | [`Value::Strings`] | compact JSON |
//! | [`Value::Json`] | compact JSON, object keys sorted at every depth |
//! | [`Value::Bytes`] | the bytes as UTF-8; invalid UTF-8 fails |
//! | `None`, [`Value::Null`] | the empty string |

use std::borrow::Cow;

use serde::ser::{Serialize, SerializeMap, Serializer};
use sha2::{Digest, Sha256};

use crate::{ConversionError, StorageDatetime, Value};

/// Width of every checksum field, in characters.
pub const CHECKSUM_LENGTH: usize = 64;

/// Conversion of a value to the text that gets checksumed.
pub trait Canonical {
    fn canonical_text(&self) -> Result<Cow<'_, str>, ConversionError>;
}

/// Compute the checksum of any value with a canonical text form.
///
/// `digest(&5_i64)`, `digest("5")` and `digest(&Value::Int(5))` all agree.
pub fn digest<T: Canonical + ?Sized>(value: &T) -> Result<String, ConversionError> {
    let text = value.canonical_text()?;
    Ok(digest_text(&text))
}

/// SHA-256 of `text`, hex encoded.
pub fn digest_text(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

impl Canonical for str {
    fn canonical_text(&self) -> Result<Cow<'_, str>, ConversionError> {
        Ok(Cow::Borrowed(self))
    }
}

impl Canonical for String {
    fn canonical_text(&self) -> Result<Cow<'_, str>, ConversionError> {
        Ok(Cow::Borrowed(self.as_str()))
    }
}

impl Canonical for char {
    fn canonical_text(&self) -> Result<Cow<'_, str>, ConversionError> {
        Ok(Cow::Owned(self.to_string()))
    }
}

impl Canonical for bool {
    fn canonical_text(&self) -> Result<Cow<'_, str>, ConversionError> {
        Ok(Cow::Borrowed(if *self { "true" } else { "false" }))
    }
}

macro_rules! canonical_integer {
    ($($ty:ty),*) => {
        $(
            impl Canonical for $ty {
                fn canonical_text(&self) -> Result<Cow<'_, str>, ConversionError> {
                    Ok(Cow::Owned(self.to_string()))
                }
            }
        )*
    };
}

canonical_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl Canonical for f64 {
    fn canonical_text(&self) -> Result<Cow<'_, str>, ConversionError> {
        if self.is_finite() {
            Ok(Cow::Owned(self.to_string()))
        } else {
            Err(ConversionError(format!("non-finite float {}", self)))
        }
    }
}

impl Canonical for StorageDatetime {
    fn canonical_text(&self) -> Result<Cow<'_, str>, ConversionError> {
        Ok(Cow::Owned(self.to_rfc3339()))
    }
}

impl Canonical for Value {
    fn canonical_text(&self) -> Result<Cow<'_, str>, ConversionError> {
        match self {
            Value::String(s) => s.canonical_text(),
            Value::Int(n) => n.canonical_text(),
            Value::UInt(n) => n.canonical_text(),
            Value::Float(n) => n.canonical_text(),
            Value::Bool(b) => b.canonical_text(),
            Value::Datetime(dt) => dt.canonical_text(),
            Value::Strings(v) => serde_json::to_string(v)
                .map(Cow::Owned)
                .map_err(|e| ConversionError(e.to_string())),
            Value::Json(json) => serde_json::to_string(&SortedKeys(json))
                .map(Cow::Owned)
                .map_err(|e| ConversionError(e.to_string())),
            Value::Bytes(b) => std::str::from_utf8(b)
                .map(Cow::Borrowed)
                .map_err(|e| ConversionError(format!("bytes are not UTF-8: {}", e))),
            Value::Null => Ok(Cow::Borrowed("")),
        }
    }
}

/// Serializes JSON with object keys in lexicographic order, so the text does
/// not depend on insertion order or on how an engine stored the object.
struct SortedKeys<'a>(&'a serde_json::Value);

impl Serialize for SortedKeys<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            serde_json::Value::Object(members) => {
                let mut entries: Vec<_> = members.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));

                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, &SortedKeys(value))?;
                }
                map.end()
            }
            serde_json::Value::Array(items) => serializer.collect_seq(items.iter().map(SortedKeys)),
            other => other.serialize(serializer),
        }
    }
}

impl<T: Canonical> Canonical for Option<T> {
    fn canonical_text(&self) -> Result<Cow<'_, str>, ConversionError> {
        match self {
            Some(value) => value.canonical_text(),
            None => Ok(Cow::Borrowed("")),
        }
    }
}

impl<T: Canonical + ?Sized> Canonical for &T {
    fn canonical_text(&self) -> Result<Cow<'_, str>, ConversionError> {
        (**self).canonical_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn computes_sha256_hex() {
        assert_eq!(digest("hello").unwrap(), HELLO);
        assert_eq!(digest_text("hello"), HELLO);
    }

    #[test]
    fn non_string_forms_agree_with_their_text() {
        assert_eq!(digest(&Value::from("hello")).unwrap(), HELLO);
        assert_eq!(digest(&Some("hello")).unwrap(), HELLO);
        assert_eq!(digest(&5_i64).unwrap(), digest("5").unwrap());
        assert_eq!(digest(&Value::UInt(5)).unwrap(), digest("5").unwrap());
        assert_eq!(digest(&true).unwrap(), digest("true").unwrap());
        assert_eq!(digest(&'x').unwrap(), digest("x").unwrap());
        assert_eq!(digest(&1.5_f64).unwrap(), digest("1.5").unwrap());
    }

    #[test]
    fn is_fixed_width_lowercase_and_deterministic() {
        for input in ["", "a", "http://AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"] {
            let first = digest(input).unwrap();
            assert_eq!(first.len(), CHECKSUM_LENGTH);
            assert!(first.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
            assert_eq!(first, digest(input).unwrap());
        }
    }

    #[test]
    fn null_and_none_checksum_the_empty_string() {
        let empty = digest("").unwrap();
        assert_eq!(digest(&Value::Null).unwrap(), empty);
        assert_eq!(digest(&None::<String>).unwrap(), empty);
    }

    #[test]
    fn structured_values_use_compact_json() {
        let strings = Value::from(vec!["a", "b"]);
        assert_eq!(digest(&strings).unwrap(), digest(r#"["a","b"]"#).unwrap());

        let object = Value::Json(json!({"k": [1, 2]}));
        assert_eq!(digest(&object).unwrap(), digest(r#"{"k":[1,2]}"#).unwrap());
    }

    #[test]
    fn json_objects_ignore_key_order() {
        let inserted: serde_json::Value =
            serde_json::from_str(r#"{"b":1,"a":{"y":[{"d":0,"c":1}],"x":null}}"#).unwrap();
        let stored: serde_json::Value =
            serde_json::from_str(r#"{"a":{"x":null,"y":[{"c":1,"d":0}]},"b":1}"#).unwrap();

        assert_eq!(
            digest(&Value::Json(inserted)).unwrap(),
            digest(&Value::Json(stored)).unwrap()
        );
        assert_eq!(
            Value::Json(json!({"b": 1, "a": 2})).canonical_text().unwrap(),
            r#"{"a":2,"b":1}"#
        );
    }

    #[test]
    fn datetimes_use_microsecond_rfc3339() {
        let dt = StorageDatetime::parse("2024-01-02T03:04:05Z").unwrap();
        assert_eq!(
            digest(&Value::Datetime(dt)).unwrap(),
            digest("2024-01-02T03:04:05.000000Z").unwrap()
        );
    }

    #[test]
    fn values_without_text_fail() {
        assert!(digest(&Value::Bytes(vec![0xff, 0xfe])).is_err());
        assert!(digest(&f64::NAN).is_err());
        assert!(digest(&Value::Float(f64::INFINITY)).is_err());
        assert_eq!(
            digest(&Value::Bytes(b"hello".to_vec())).unwrap(),
            HELLO
        );
    }
}
