//! Document values
//!
//! A [`Value`] is decided once at ingestion: primitives, timestamps,
//! sequences or nested [`Record`]s. Merge, diff and clone are total
//! functions over this closed set, so no operation has to probe the
//! shape of a value at runtime.
//!
//! # JSON mapping
//!
//! JSON has no timestamp type. Timestamps use the EJSON convention
//! `{"$date": <milliseconds since epoch>}` in both directions, so their
//! resolution is the millisecond: constructors truncate, and equality
//! compares whole milliseconds.
//!
//! `$date` is therefore a reserved key. An object whose only key is `$date`
//! with an integer value is always read as a timestamp, never as a record.
//!
//! ```
//! use pubsync_core::value::Value;
//! use serde_json::json;
//!
//! let value = Value::from(json!({ "createdAt": { "$date": 0 }, "tags": ["a"] }));
//! let record = value.as_record().unwrap();
//!
//! assert!(matches!(record["createdAt"], Value::Timestamp(_)));
//! assert!(record["tags"].is_nested());
//! ```

pub mod ops;

use crate::error::Result;
use chrono::{DateTime, SubsecRound, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number};
use std::collections::BTreeMap;

pub use ops::{changes, deep_clone, deep_clone_record, deep_merge, deep_omit, deep_pick, Selector};

/// Key used to encode timestamps in JSON
pub const DATE_KEY: &str = "$date";

/// String-keyed mapping of values; key order carries no meaning
pub type Record = BTreeMap<String, Value>;

/// A single document value
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Compared by the millisecond it falls in
    Timestamp(DateTime<Utc>),
    /// Compared and replaced as a whole, never merged element by element
    Sequence(Vec<Value>),
    Record(Record),
}

impl Value {
    /// Build a timestamp value, truncated to the millisecond
    pub fn timestamp(instant: DateTime<Utc>) -> Self {
        Value::Timestamp(instant.trunc_subsecs(3))
    }

    /// True for `null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for records and sequences
    ///
    /// Attribute stores only detect changes to values that are not nested;
    /// the model re-notifies nested ones itself.
    pub fn is_nested(&self) -> bool {
        matches!(self, Value::Record(_) | Value::Sequence(_))
    }

    pub fn is_record(&self) -> bool {
        matches!(self, Value::Record(_))
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Export as plain JSON
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as JsonValue;

        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => JsonValue::Number(n.clone()),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Timestamp(instant) => {
                let mut map = Map::new();
                map.insert(DATE_KEY.to_string(), instant.timestamp_millis().into());
                JsonValue::Object(map)
            }
            Value::Sequence(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(record) => record_to_json(record),
        }
    }
}

/// Export a record as a JSON object
pub fn record_to_json(record: &Record) -> serde_json::Value {
    serde_json::Value::Object(
        record
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect(),
    )
}

/// Ingest a JSON object as a record
///
/// Returns `None` for anything that is not an object (timestamps included).
pub fn record_from_json(json: serde_json::Value) -> Option<Record> {
    Value::from(json).into_record()
}

/// Parse JSON text into a record; `None` when the text is not an object.
pub fn parse_record(text: &str) -> Result<Option<Record>> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    Ok(record_from_json(json))
}

fn integer_of(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// An integer equals a float only if the float is integral and converts back
/// to the same integer.
fn integer_equals_float(int: i128, float: Option<f64>) -> bool {
    match float {
        Some(f) if f.is_finite() && f.fract() == 0.0 => {
            let truncated = f as i128;
            truncated == int && truncated as f64 == f
        }
        _ => false,
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    match (integer_of(a), integer_of(b)) {
        (Some(x), Some(y)) => x == y,
        (Some(x), None) => integer_equals_float(x, b.as_f64()),
        (None, Some(y)) => integer_equals_float(y, a.as_f64()),
        (None, None) => matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y)) if x == y),
    }
}

/// Deep structural equality
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a.timestamp_millis() == b.timestamp_millis(),
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as JsonValue;

        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => Value::Number(n),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Sequence(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => {
                if map.len() == 1 {
                    let instant = map
                        .get(DATE_KEY)
                        .and_then(JsonValue::as_i64)
                        .and_then(DateTime::from_timestamp_millis);
                    if let Some(instant) = instant {
                        return Value::Timestamp(instant);
                    }
                }
                Value::Record(
                    map.into_iter()
                        .map(|(key, value)| (key, Value::from(value)))
                        .collect(),
                )
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

/// Non-finite floats have no JSON representation and become `null`
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(instant: DateTime<Utc>) -> Self {
        Value::timestamp(instant)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Timestamp(instant) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(DATE_KEY, &instant.timestamp_millis())?;
                map.end()
            }
            Value::Sequence(items) => items.serialize(serializer),
            Value::Record(record) => record.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}
