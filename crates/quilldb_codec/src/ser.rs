//! Line-oriented document serialization.
//!
//! Each persisted document is one line of JSON terminated by `\n` in the
//! datafile. Type preservation uses an escape for dates:
//!
//! ```text
//! {"_id":"...","at":{"$$date":1404107055500}}
//! ```
//!
//! On deserialization a single-key `{"$$date": <epoch-ms>}` object
//! reconstructs a [`Value::Date`]. The escape is recognized only here;
//! in-memory documents never contain a `$$date` key.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::collections::BTreeMap;

/// Key used to encode dates in the line format.
const DATE_KEY: &str = "$$date";

/// Serialize a document to its single-line form.
///
/// The output contains no embedded newlines: strings are JSON-escaped and
/// the encoder emits no whitespace.
pub fn serialize(doc: &Value) -> String {
    to_json(doc).to_string()
}

/// Deserialize one datafile line into a document.
///
/// # Errors
///
/// Returns [`CodecError::MalformedLine`] when the line is not valid JSON or
/// contains a value outside the document model (for example a fractional
/// number).
pub fn deserialize(line: &str) -> CodecResult<Value> {
    let json: serde_json::Value =
        serde_json::from_str(line).map_err(|e| CodecError::malformed_line(e.to_string()))?;
    from_json(json)
}

/// Convert a document value to its JSON representation.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Value::from(*n),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(ms) => {
            let mut map = serde_json::Map::new();
            map.insert(DATE_KEY.to_string(), serde_json::Value::from(*ms));
            serde_json::Value::Object(map)
        }
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Map(map) => {
            let object: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect();
            serde_json::Value::Object(object)
        }
    }
}

/// Convert a JSON value into a document value.
///
/// # Errors
///
/// Returns [`CodecError::MalformedLine`] for numbers that are not
/// representable as `i64`.
pub fn from_json(json: serde_json::Value) -> CodecResult<Value> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Number)
            .ok_or_else(|| CodecError::malformed_line(format!("unsupported number: {n}"))),
        serde_json::Value::String(s) => Ok(Value::String(s)),
        serde_json::Value::Array(items) => {
            let values: CodecResult<Vec<Value>> = items.into_iter().map(from_json).collect();
            Ok(Value::Array(values?))
        }
        serde_json::Value::Object(object) => {
            // The date escape is a single-key object.
            if object.len() == 1 {
                if let Some(ms) = object.get(DATE_KEY) {
                    let ms = ms.as_i64().ok_or_else(|| {
                        CodecError::malformed_line("date payload is not an integer")
                    })?;
                    return Ok(Value::Date(ms));
                }
            }
            let mut map = BTreeMap::new();
            for (k, v) in object {
                map.insert(k, from_json(v)?);
            }
            Ok(Value::Map(map))
        }
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = CodecError;

    fn try_from(json: serde_json::Value) -> CodecResult<Self> {
        from_json(json)
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        to_json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrip_flat_document() {
        let doc = from_json(json!({"_id": "abc", "age": 5, "ok": true, "x": null})).unwrap();
        let line = serialize(&doc);
        assert!(!line.contains('\n'));
        assert_eq!(deserialize(&line).unwrap(), doc);
    }

    #[test]
    fn roundtrip_nested() {
        let doc = from_json(json!({
            "_id": "abc",
            "a": {"b": [{"c": 1}, {"c": 2}]},
            "tags": ["x", "y"]
        }))
        .unwrap();
        assert_eq!(deserialize(&serialize(&doc)).unwrap(), doc);
    }

    #[test]
    fn date_escape_roundtrip() {
        let doc = Value::object([("at", Value::Date(1404107055500))]);
        let line = serialize(&doc);
        assert!(line.contains("$$date"));
        let decoded = deserialize(&line).unwrap();
        assert_eq!(decoded.get("at"), Some(&Value::Date(1404107055500)));
        assert_eq!(decoded, doc);
    }

    #[test]
    fn nested_date_roundtrip() {
        let doc = Value::object([(
            "meta",
            Value::object([("created", Value::Date(42)), ("n", Value::Number(1))]),
        )]);
        assert_eq!(deserialize(&serialize(&doc)).unwrap(), doc);
    }

    #[test]
    fn newline_in_string_is_escaped() {
        let doc = Value::object([("text", Value::from("line one\nline two"))]);
        let line = serialize(&doc);
        assert!(!line.contains('\n'));
        assert_eq!(deserialize(&line).unwrap(), doc);
    }

    #[test]
    fn garbage_line_is_malformed() {
        let err = deserialize("not json at all").unwrap_err();
        assert!(matches!(err, CodecError::MalformedLine { .. }));
    }

    #[test]
    fn float_is_malformed() {
        let err = deserialize(r#"{"x": 1.5}"#).unwrap_err();
        assert!(matches!(err, CodecError::MalformedLine { .. }));
    }

    #[test]
    fn date_with_extra_keys_is_plain_map() {
        let decoded = deserialize(r#"{"x": {"$$date": 5, "other": 1}}"#).unwrap();
        let inner = decoded.get("x").unwrap();
        assert!(inner.as_map().is_some());
    }
}
