//! Document-level validation, copying and id generation.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::BTreeMap;

/// Length of generated document ids.
const ID_LENGTH: usize = 16;

/// Generate a new document id: 16 alphanumeric characters drawn from a
/// cryptographically strong source.
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Return the `_id` of a document, if present and a string.
pub fn doc_id(doc: &Value) -> Option<&str> {
    doc.get("_id").and_then(Value::as_str)
}

/// Check whether a field name is usable in a stored document.
///
/// Names starting with `$` are reserved for operators; names containing `.`
/// are reserved for path notation.
fn check_key(key: &str) -> CodecResult<()> {
    if key.starts_with('$') || key.contains('.') {
        return Err(CodecError::invalid_field(key));
    }
    Ok(())
}

/// Validate every field name in a document tree.
///
/// # Errors
///
/// Returns [`CodecError::InvalidField`] for the first reserved key found.
pub fn check_object(doc: &Value) -> CodecResult<()> {
    match doc {
        Value::Map(map) => {
            for (key, child) in map {
                check_key(key)?;
                check_object(child)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                check_object(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Deep-copy a value.
///
/// Maps and arrays are copied recursively; primitives and dates are returned
/// as-is. With `strict_keys`, map entries whose key starts with `$` or
/// contains `.` are dropped from the copy (used when a query is materialized
/// as a replacement document during upsert).
pub fn deep_copy(value: &Value, strict_keys: bool) -> Value {
    match value {
        Value::Map(map) => {
            let mut copy = BTreeMap::new();
            for (key, child) in map {
                if strict_keys && (key.starts_with('$') || key.contains('.')) {
                    continue;
                }
                copy.insert(key.clone(), deep_copy(child, strict_keys));
            }
            Value::Map(copy)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| deep_copy(v, strict_keys)).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_well_formed() {
        let id = generate_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(generate_id(), generate_id());
    }

    #[test]
    fn check_object_accepts_plain_documents() {
        let doc = Value::object([
            ("name", Value::from("quill")),
            ("nested", Value::object([("ok", Value::Bool(true))])),
        ]);
        assert!(check_object(&doc).is_ok());
    }

    #[test]
    fn check_object_rejects_dollar_keys() {
        let doc = Value::object([("$set", Value::from(1))]);
        assert!(matches!(
            check_object(&doc),
            Err(CodecError::InvalidField { .. })
        ));
    }

    #[test]
    fn check_object_rejects_dotted_keys_in_nested_maps() {
        let doc = Value::object([(
            "outer",
            Value::object([("a.b", Value::from(1))]),
        )]);
        assert!(check_object(&doc).is_err());
    }

    #[test]
    fn check_object_descends_into_arrays() {
        let doc = Value::object([(
            "items",
            Value::Array(vec![Value::object([("$bad", Value::Null)])]),
        )]);
        assert!(check_object(&doc).is_err());
    }

    #[test]
    fn deep_copy_is_detached() {
        let original = Value::object([("a", Value::Array(vec![Value::from(1)]))]);
        let mut copy = deep_copy(&original, false);
        copy.as_map_mut()
            .unwrap()
            .get_mut("a")
            .unwrap()
            .as_array_mut()
            .unwrap()
            .push(Value::from(2));
        assert_eq!(original.get("a").unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn strict_copy_drops_reserved_keys() {
        let original = Value::object([
            ("keep", Value::from(1)),
            ("$gt", Value::from(2)),
            ("a.b", Value::from(3)),
        ]);
        let copy = deep_copy(&original, true);
        let map = copy.as_map().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("keep"));
    }

    #[test]
    fn doc_id_lookup() {
        let doc = Value::object([("_id", Value::from("abcdefghij012345"))]);
        assert_eq!(doc_id(&doc), Some("abcdefghij012345"));
        assert_eq!(doc_id(&Value::Null), None);
    }
}
