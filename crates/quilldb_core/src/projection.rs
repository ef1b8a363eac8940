//! Result projections.
//!
//! A projection spec maps dotted paths to `1` (include mode) or `0` (exclude
//! mode); the two modes cannot be mixed. The `_id` entry is independent and
//! only controls whether `_id` is kept. Include mode synthesizes a new
//! document by structural merge of the picked paths, propagating
//! element-wise through arrays, then prunes empty intermediate maps left by
//! unresolved paths.

use crate::error::{DbError, DbResult};
use quilldb_codec::{deep_copy, Value};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

enum Mode {
    Include,
    Exclude,
}

/// Applies a projection spec to a document.
///
/// An empty spec returns the document unchanged (as a deep copy).
///
/// # Errors
///
/// Returns [`DbError::InvalidProjection`] when include and exclude entries
/// are mixed or an entry is not `0` or `1`.
pub fn project(doc: &Value, spec: &Value) -> DbResult<Value> {
    let Value::Map(entries) = spec else {
        return Err(DbError::invalid_projection("projection must be a document"));
    };
    if entries.is_empty() {
        return Ok(deep_copy(doc, false));
    }

    let mut keep_id = true;
    let mut mode = None;
    let mut paths: Vec<&str> = Vec::new();

    for (path, action) in entries {
        let include = match action {
            Value::Number(0) => false,
            Value::Number(1) => true,
            _ => {
                return Err(DbError::invalid_projection(format!(
                    "projection for {path} must be 0 or 1"
                )));
            }
        };
        if path == "_id" {
            keep_id = include;
            continue;
        }
        match mode {
            None => {
                mode = Some(if include { Mode::Include } else { Mode::Exclude });
            }
            Some(Mode::Include) if !include => {
                return Err(DbError::invalid_projection(
                    "cannot mix include and exclude projections",
                ));
            }
            Some(Mode::Exclude) if include => {
                return Err(DbError::invalid_projection(
                    "cannot mix include and exclude projections",
                ));
            }
            Some(_) => {}
        }
        paths.push(path);
    }

    let mut result = match mode {
        // Only an `_id` entry: start from the whole document.
        None => deep_copy(doc, false),
        Some(Mode::Include) => {
            let mut acc = Value::Map(BTreeMap::new());
            for path in &paths {
                let parts: Vec<&str> = path.split('.').collect();
                if let Some(picked) = pick(doc, &parts) {
                    merge(&mut acc, picked);
                }
            }
            prune(&mut acc);
            // `_id` rides along in include mode unless excluded below.
            if let (Value::Map(acc), Some(id)) = (&mut acc, doc.get("_id")) {
                acc.insert("_id".to_string(), id.clone());
            }
            acc
        }
        Some(Mode::Exclude) => {
            let mut copy = deep_copy(doc, false);
            for path in &paths {
                let parts: Vec<&str> = path.split('.').collect();
                remove_path(&mut copy, &parts);
            }
            copy
        }
    };

    if !keep_id {
        if let Some(map) = result.as_map_mut() {
            map.remove("_id");
        }
    }
    Ok(result)
}

/// Extracts the subdocument containing `parts` from `value`. Arrays along
/// the path propagate element-wise; elements where the path does not resolve
/// become empty maps so that merged paths stay index-aligned (pruned later).
fn pick(value: &Value, parts: &[&str]) -> Option<Value> {
    if parts.is_empty() {
        return Some(deep_copy(value, false));
    }
    match value {
        Value::Map(map) => {
            let child = map.get(parts[0])?;
            let picked = pick(child, &parts[1..])?;
            let mut wrapper = BTreeMap::new();
            wrapper.insert(parts[0].to_string(), picked);
            Some(Value::Map(wrapper))
        }
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .map(|el| pick(el, parts).unwrap_or_else(|| Value::Map(BTreeMap::new())))
                .collect(),
        )),
        _ => None,
    }
}

/// Recursive structural merge of two picked subtrees.
fn merge(into: &mut Value, from: Value) {
    match (into, from) {
        (Value::Map(a), Value::Map(b)) => {
            for (key, value) in b {
                match a.entry(key) {
                    Entry::Occupied(entry) => merge(entry.into_mut(), value),
                    Entry::Vacant(entry) => {
                        entry.insert(value);
                    }
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for (i, value) in b.into_iter().enumerate() {
                match a.get_mut(i) {
                    Some(slot) => merge(slot, value),
                    None => a.push(value),
                }
            }
        }
        _ => {}
    }
}

/// Removes empty intermediate maps left behind by paths that resolved
/// through some array elements but not others.
fn prune(value: &mut Value) {
    match value {
        Value::Map(map) => {
            for child in map.values_mut() {
                prune(child);
            }
            map.retain(|_, child| !is_empty_map(child));
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                prune(child);
            }
            items.retain(|child| !is_empty_map(child));
        }
        _ => {}
    }
}

fn is_empty_map(value: &Value) -> bool {
    matches!(value, Value::Map(map) if map.is_empty())
}

fn remove_path(value: &mut Value, parts: &[&str]) {
    match value {
        Value::Map(map) => {
            if parts.len() == 1 {
                map.remove(parts[0]);
            } else if let Some(child) = map.get_mut(parts[0]) {
                remove_path(child, &parts[1..]);
            }
        }
        Value::Array(items) => {
            for el in items {
                remove_path(el, parts);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(j: serde_json::Value) -> Value {
        quilldb_codec::from_json(j).unwrap()
    }

    #[test]
    fn empty_projection_is_identity() {
        let d = doc(json!({"_id": "x", "a": 1}));
        assert_eq!(project(&d, &doc(json!({}))).unwrap(), d);
    }

    #[test]
    fn include_mode_keeps_id_by_default() {
        let d = doc(json!({"_id": "x", "age": 5, "name": "Jo", "planet": "B"}));
        let out = project(&d, &doc(json!({"age": 1, "name": 1}))).unwrap();
        assert_eq!(out, doc(json!({"_id": "x", "age": 5, "name": "Jo"})));
    }

    #[test]
    fn include_mode_can_drop_id() {
        let d = doc(json!({"_id": "x", "age": 5, "name": "Jo", "planet": "B"}));
        let out = project(&d, &doc(json!({"age": 1, "name": 1, "_id": 0}))).unwrap();
        assert_eq!(out, doc(json!({"age": 5, "name": "Jo"})));
    }

    #[test]
    fn mixed_modes_rejected() {
        let d = doc(json!({"_id": "x", "age": 5, "name": "Jo"}));
        let err = project(&d, &doc(json!({"age": 1, "name": 0}))).unwrap_err();
        assert!(matches!(err, DbError::InvalidProjection { .. }));
    }

    #[test]
    fn bad_action_rejected() {
        let d = doc(json!({"_id": "x"}));
        assert!(project(&d, &doc(json!({"a": 2}))).is_err());
        assert!(project(&d, &doc(json!({"a": "yes"}))).is_err());
    }

    #[test]
    fn exclude_mode_removes_paths() {
        let d = doc(json!({"_id": "x", "age": 5, "name": "Jo", "planet": "B"}));
        let out = project(&d, &doc(json!({"planet": 0}))).unwrap();
        assert_eq!(out, doc(json!({"_id": "x", "age": 5, "name": "Jo"})));
    }

    #[test]
    fn id_only_projection() {
        let d = doc(json!({"_id": "x", "a": 1}));
        let out = project(&d, &doc(json!({"_id": 0}))).unwrap();
        assert_eq!(out, doc(json!({"a": 1})));
    }

    #[test]
    fn include_nested_paths_merge() {
        let d = doc(json!({"_id": "x", "a": {"p": 1, "q": 2, "r": 3}, "b": 4}));
        let out = project(&d, &doc(json!({"a.p": 1, "a.q": 1, "_id": 0}))).unwrap();
        assert_eq!(out, doc(json!({"a": {"p": 1, "q": 2}})));
    }

    #[test]
    fn include_propagates_through_arrays() {
        let d = doc(json!({"_id": "x", "a": [{"b": 1, "z": 9}, {"c": 2, "z": 8}]}));
        let out = project(&d, &doc(json!({"a.b": 1, "a.c": 1, "_id": 0}))).unwrap();
        assert_eq!(out, doc(json!({"a": [{"b": 1}, {"c": 2}]})));
    }

    #[test]
    fn unresolved_include_paths_are_pruned() {
        let d = doc(json!({"_id": "x", "a": 1}));
        let out = project(&d, &doc(json!({"nope.deep": 1, "_id": 0}))).unwrap();
        assert_eq!(out, doc(json!({})));
    }

    #[test]
    fn exclude_descends_into_arrays() {
        let d = doc(json!({"_id": "x", "a": [{"b": 1, "c": 2}, {"b": 3}]}));
        let out = project(&d, &doc(json!({"a.b": 0}))).unwrap();
        assert_eq!(out, doc(json!({"_id": "x", "a": [{"c": 2}, {}]})));
    }
}
