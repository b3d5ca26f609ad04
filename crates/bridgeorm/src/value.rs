//! Backend-neutral values and records.
//!
//! Every backend speaks the same value vocabulary: a [`Value`] is a
//! `serde_json::Value`, and a [`Record`] is an insertion-ordered map of field
//! name to value. Builders accept records for WHERE / INSERT / UPDATE payloads,
//! and executors return rows and documents normalized into records.

use crate::error::{OrmError, OrmResult};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use serde_json::Value;

/// An ordered field → value mapping (a row or a document).
pub type Record = serde_json::Map<String, Value>;

/// Build a [`Record`] from `key => value` pairs.
///
/// Any `Serialize` expression is accepted as a value. Use `serde_json::json!`
/// for heterogeneous arrays or nested objects.
///
/// ```ignore
/// let r = bridgeorm::record! { "name" => "bob", "age" => 42, "tags" => ["a", "b"] };
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::Record::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::Record::new();
        $(
            record.insert(::std::string::String::from($key), $crate::__serde_json::json!($value));
        )+
        record
    }};
}

/// Deserialize a record into any `serde` type.
pub fn decode_record<T: DeserializeOwned>(record: Record) -> OrmResult<T> {
    serde_json::from_value(Value::Object(record))
        .map_err(|e| OrmError::decode("<record>", e.to_string()))
}

/// Serialize a struct (or map) into a record.
///
/// Fails with `InvalidArgument` when the value does not serialize to an object.
pub fn to_record<T: Serialize>(value: &T) -> OrmResult<Record> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(OrmError::invalid_argument(format!(
            "expected a mapping, got {}",
            kind_name(&other)
        ))),
        Err(e) => Err(OrmError::invalid_argument(e.to_string())),
    }
}

/// Short human name of a JSON value's kind, for error messages.
pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
