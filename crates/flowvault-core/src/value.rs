//! Canonical structured values.
//!
//! Payloads and tokens are arbitrary structured data. They cross two
//! boundaries that need a byte representation: the envelope cipher (context
//! payloads are encrypted at rest) and the token ledger (set membership is
//! decided by serialized bytes). The encoding therefore has to be canonical:
//! structurally equal values MUST encode to identical bytes, or token
//! deduplication silently breaks.
//!
//! Canonicity comes from two choices: mappings are `BTreeMap` (iteration is
//! always key-sorted, insertion order cannot leak into the encoding) and the
//! wire format is CBOR via `ciborium` (definite-length, deterministic for a
//! fixed value tree).

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from canonical encoding and decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// Value could not be encoded to canonical bytes
    #[error("value encoding failed: {0}")]
    Encode(String),

    /// Bytes could not be decoded back into a value
    #[error("value decoding failed: {0}")]
    Decode(String),
}

/// A dynamically structured value: the payload/token data model.
///
/// Mirrors the JSON-ish shape workflow engines pass around. Integers and
/// floats are distinct variants so round-trips are lossless (`5` and `5.0`
/// stay different values).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent / explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// IEEE-754 double
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Ordered sequence of values
    Sequence(Vec<Value>),
    /// String-keyed mapping; key-sorted, so insertion order never affects
    /// the canonical encoding
    Mapping(BTreeMap<String, Value>),
}

impl Value {
    /// True if this is `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Mapping entry lookup; `None` for non-mappings and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Mapping(map) => map.get(key),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Sequence(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Mapping(v)
    }
}

impl FromIterator<(String, Value)> for Value {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Value::Mapping(iter.into_iter().collect())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Sequence(items) => serializer.collect_seq(items),
            Value::Mapping(map) => serializer.collect_map(map),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a structured value (null, bool, number, string, sequence or mapping)")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        i64::try_from(v).map(Value::Int).map_err(|_| {
            de::Error::invalid_value(de::Unexpected::Unsigned(v), &"an integer within i64 range")
        })
    }

    fn visit_i128<E: de::Error>(self, v: i128) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| de::Error::custom("integer outside i64 range"))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| de::Error::custom("integer outside i64 range"))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Sequence(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            entries.insert(key, value);
        }
        Ok(Value::Mapping(entries))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Encode a value to its canonical byte representation.
///
/// Structurally equal values always yield identical bytes. The token ledger
/// relies on this for set membership; the context store relies on it for a
/// stable plaintext under encryption.
pub fn to_canonical_bytes(value: &Value) -> Result<Vec<u8>, ValueError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| ValueError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decode canonical bytes back into a value.
pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Value, ValueError> {
    ciborium::from_reader(bytes).map_err(|e| ValueError::Decode(e.to_string()))
}
