//! Update engine.
//!
//! [`modify`] produces a new document from a stored document and an update
//! expression. Two shapes are accepted: a **replacement** document (no
//! top-level `$` keys) or a **modifier** map where every top-level key is a
//! modifier. Modifiers dispatch through [`modifier`], the registry of
//! built-ins; each applies last-step semantics at the end of a dotted path,
//! creating intermediate maps along the way (except `$unset`).
//!
//! A path component equal to `$` resolves against the triggering query to
//! the indexes of array elements that individually satisfy it; the modifier
//! applies to exactly those indexes. At most one `$` per path, never first.

use crate::error::{DbError, DbResult};
use crate::matcher::Matcher;
use quilldb_codec::{deep_copy, doc_id, Value, ValueComparator};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A registered modifier: applies `arg` to `parent[key]`.
pub type Modifier = fn(&ModifyCtx<'_>, &mut Value, &str, &Value) -> DbResult<()>;

/// Looks up a modifier by its `$`-name.
pub fn modifier(name: &str) -> Option<Modifier> {
    Some(match name {
        "$set" => mods::set,
        "$unset" => mods::unset,
        "$inc" => mods::inc,
        "$min" => mods::min,
        "$max" => mods::max,
        "$push" => mods::push,
        "$pushAll" => mods::push_all,
        "$addToSet" => mods::add_to_set,
        "$pop" => mods::pop,
        "$pull" => mods::pull,
        "$pullAll" => mods::pull_all,
        _ => return None,
    })
}

/// Context threaded through modifier application.
pub struct ModifyCtx<'a> {
    query: &'a Value,
    cmp: &'a ValueComparator,
}

/// Applies an update expression to a document, returning the new document.
///
/// The stored document is never mutated. `query` is the query that selected
/// `doc`; positional `$` paths resolve against it.
///
/// # Errors
///
/// Returns [`DbError::InvalidUpdate`] for unknown modifiers, operand shape
/// or type mismatches, and any change to `_id`.
pub fn modify(
    doc: &Value,
    update: &Value,
    query: &Value,
    cmp: &ValueComparator,
) -> DbResult<Value> {
    let Value::Map(entries) = update else {
        return Err(DbError::invalid_update("update must be a document"));
    };

    let dollar = entries.keys().filter(|k| k.starts_with('$')).count();
    if dollar != 0 && dollar != entries.len() {
        return Err(DbError::invalid_update(
            "cannot mix replacement fields and modifiers",
        ));
    }

    let new_doc = if dollar == 0 {
        replace(doc, update)?
    } else {
        apply_modifiers(doc, entries, query, cmp)?
    };

    if doc_id(&new_doc) != doc_id(doc) {
        return Err(DbError::invalid_update("cannot change a document's _id"));
    }
    Ok(new_doc)
}

fn replace(doc: &Value, update: &Value) -> DbResult<Value> {
    if let Some(new_id) = update.get("_id") {
        if doc.get("_id").is_some_and(|old| old != new_id) {
            return Err(DbError::invalid_update("cannot change a document's _id"));
        }
    }
    let mut new_doc = deep_copy(update, false);
    if let Some(old_id) = doc.get("_id") {
        if let Some(map) = new_doc.as_map_mut() {
            map.insert("_id".to_string(), old_id.clone());
        }
    }
    Ok(new_doc)
}

fn apply_modifiers(
    doc: &Value,
    entries: &BTreeMap<String, Value>,
    query: &Value,
    cmp: &ValueComparator,
) -> DbResult<Value> {
    let ctx = ModifyCtx { query, cmp };
    let mut new_doc = deep_copy(doc, false);

    for (name, arg) in entries {
        let op = modifier(name)
            .ok_or_else(|| DbError::invalid_update(format!("unknown modifier {name}")))?;
        let Value::Map(fields) = arg else {
            return Err(DbError::invalid_update(format!(
                "{name} takes a map of field paths"
            )));
        };
        for (path, value) in fields {
            apply_at_path(&ctx, op, name, &mut new_doc, path, value)?;
        }
    }
    Ok(new_doc)
}

fn apply_at_path(
    ctx: &ModifyCtx<'_>,
    op: Modifier,
    name: &str,
    root: &mut Value,
    path: &str,
    arg: &Value,
) -> DbResult<()> {
    let parts: Vec<&str> = path.split('.').collect();
    let positionals = parts.iter().filter(|p| **p == "$").count();
    if positionals > 1 {
        return Err(DbError::invalid_update(
            "at most one positional $ per path",
        ));
    }
    if positionals == 1 && parts[0] == "$" {
        return Err(DbError::invalid_update(
            "positional $ cannot be the first path component",
        ));
    }
    let create = name != "$unset";
    descend(ctx, op, create, root, &parts, String::new(), arg)
}

fn descend(
    ctx: &ModifyCtx<'_>,
    op: Modifier,
    create: bool,
    current: &mut Value,
    parts: &[&str],
    prefix: String,
    arg: &Value,
) -> DbResult<()> {
    let part = parts[0];

    if part == "$" {
        let indexes = {
            let Value::Array(items) = &*current else {
                return Err(DbError::invalid_update(format!(
                    "positional $ requires an array at {prefix}"
                )));
            };
            matching_indexes(ctx, items, &prefix)?
        };
        for i in indexes {
            let key = i.to_string();
            if parts.len() == 1 {
                op(ctx, current, &key, arg)?;
            } else {
                let child = current
                    .as_array_mut()
                    .and_then(|a| a.get_mut(i))
                    .ok_or_else(|| DbError::invalid_update("positional index out of range"))?;
                descend(ctx, op, create, child, &parts[1..], join(&prefix, &key), arg)?;
            }
        }
        return Ok(());
    }

    if parts.len() == 1 {
        return op(ctx, current, part, arg);
    }

    match current {
        Value::Map(map) => {
            let child = match map.entry(part.to_string()) {
                std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::btree_map::Entry::Vacant(_) if !create => return Ok(()),
                std::collections::btree_map::Entry::Vacant(entry) => {
                    entry.insert(Value::Map(BTreeMap::new()))
                }
            };
            descend(ctx, op, create, child, &parts[1..], join(&prefix, part), arg)
        }
        Value::Array(items) => {
            let Ok(i) = part.parse::<usize>() else {
                return Err(DbError::invalid_update(format!(
                    "cannot traverse an array with key {part}"
                )));
            };
            match items.get_mut(i) {
                Some(child) => {
                    descend(ctx, op, create, child, &parts[1..], join(&prefix, part), arg)
                }
                None if !create => Ok(()),
                None => Err(DbError::invalid_update(format!(
                    "array index {i} out of range at {prefix}"
                ))),
            }
        }
        _ if !create => Ok(()),
        _ => Err(DbError::invalid_update(format!(
            "cannot traverse a primitive value at {prefix}"
        ))),
    }
}

fn join(prefix: &str, part: &str) -> String {
    if prefix.is_empty() {
        part.to_string()
    } else {
        format!("{prefix}.{part}")
    }
}

/// Indexes of the array elements that individually satisfy every query
/// predicate scoped under `array_path`. With no scoped predicate, no
/// element qualifies.
fn matching_indexes(
    ctx: &ModifyCtx<'_>,
    items: &[Value],
    array_path: &str,
) -> DbResult<Vec<usize>> {
    let Value::Map(query) = ctx.query else {
        return Ok(Vec::new());
    };
    let matcher = Matcher::new(ctx.cmp);

    let mut predicates: Vec<(Option<&str>, &Value)> = Vec::new();
    for (qpath, qexpr) in query {
        if qpath.starts_with('$') {
            continue;
        }
        if qpath == array_path {
            predicates.push((None, qexpr));
        } else if let Some(rest) = qpath
            .strip_prefix(array_path)
            .and_then(|r| r.strip_prefix('.'))
        {
            predicates.push((Some(rest), qexpr));
        }
    }
    if predicates.is_empty() {
        return Ok(Vec::new());
    }

    let mut indexes = Vec::new();
    'elements: for (i, element) in items.iter().enumerate() {
        for (rest, qexpr) in &predicates {
            let holds = match rest {
                None => matcher.match_value(element, qexpr)?,
                Some(rest) => {
                    let sub = Value::object([(rest.to_string(), (*qexpr).clone())]);
                    matcher.matches(element, &sub)?
                }
            };
            if !holds {
                continue 'elements;
            }
        }
        indexes.push(i);
    }
    Ok(indexes)
}

mod mods {
    use super::*;

    fn child_mut<'v>(parent: &'v mut Value, key: &str) -> Option<&'v mut Value> {
        match parent {
            Value::Map(map) => map.get_mut(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            _ => None,
        }
    }

    fn assign(parent: &mut Value, key: &str, value: Value) -> DbResult<()> {
        match parent {
            Value::Map(map) => {
                map.insert(key.to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                let i: usize = key
                    .parse()
                    .map_err(|_| DbError::invalid_update("array fields need numeric keys"))?;
                match items.get_mut(i) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(DbError::invalid_update(format!(
                        "array index {i} out of range"
                    ))),
                }
            }
            _ => Err(DbError::invalid_update(
                "cannot set a field on a primitive value",
            )),
        }
    }

    /// Resolves the target array for the array modifiers, creating it when
    /// `create` is set and the field is missing.
    fn target_array<'v>(
        parent: &'v mut Value,
        key: &str,
        name: &str,
        create: bool,
    ) -> DbResult<&'v mut Vec<Value>> {
        if create && child_mut(parent, key).is_none() {
            assign(parent, key, Value::Array(Vec::new()))?;
        }
        match child_mut(parent, key) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(DbError::invalid_update(format!(
                "{name} requires an array target"
            ))),
        }
    }

    pub(super) fn set(
        _: &ModifyCtx<'_>,
        parent: &mut Value,
        key: &str,
        arg: &Value,
    ) -> DbResult<()> {
        assign(parent, key, arg.clone())
    }

    pub(super) fn unset(
        _: &ModifyCtx<'_>,
        parent: &mut Value,
        key: &str,
        _arg: &Value,
    ) -> DbResult<()> {
        match parent {
            Value::Map(map) => {
                map.remove(key);
            }
            Value::Array(items) => {
                // Unsetting an array slot nulls it; length is unchanged.
                if let Some(slot) = key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                    *slot = Value::Null;
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(super) fn inc(
        _: &ModifyCtx<'_>,
        parent: &mut Value,
        key: &str,
        arg: &Value,
    ) -> DbResult<()> {
        let Value::Number(delta) = arg else {
            return Err(DbError::invalid_update("$inc takes a number"));
        };
        match child_mut(parent, key) {
            Some(Value::Number(n)) => {
                *n = n
                    .checked_add(*delta)
                    .ok_or_else(|| DbError::invalid_update("$inc overflowed"))?;
                Ok(())
            }
            Some(_) => Err(DbError::invalid_update("$inc target is not a number")),
            None => assign(parent, key, arg.clone()),
        }
    }

    pub(super) fn min(
        ctx: &ModifyCtx<'_>,
        parent: &mut Value,
        key: &str,
        arg: &Value,
    ) -> DbResult<()> {
        match child_mut(parent, key) {
            Some(existing) => {
                if ctx.cmp.compare(arg, existing) == Ordering::Less {
                    *existing = arg.clone();
                }
                Ok(())
            }
            None => assign(parent, key, arg.clone()),
        }
    }

    pub(super) fn max(
        ctx: &ModifyCtx<'_>,
        parent: &mut Value,
        key: &str,
        arg: &Value,
    ) -> DbResult<()> {
        match child_mut(parent, key) {
            Some(existing) => {
                if ctx.cmp.compare(arg, existing) == Ordering::Greater {
                    *existing = arg.clone();
                }
                Ok(())
            }
            None => assign(parent, key, arg.clone()),
        }
    }

    pub(super) fn push(
        _: &ModifyCtx<'_>,
        parent: &mut Value,
        key: &str,
        arg: &Value,
    ) -> DbResult<()> {
        let (additions, slice) = parse_each(arg, "$push", true)?;
        let items = target_array(parent, key, "$push", true)?;
        match additions {
            Some(each) => items.extend(each.iter().cloned()),
            None => items.push(arg.clone()),
        }
        if let Some(n) = slice {
            apply_slice(items, n);
        }
        Ok(())
    }

    pub(super) fn push_all(
        _: &ModifyCtx<'_>,
        parent: &mut Value,
        key: &str,
        arg: &Value,
    ) -> DbResult<()> {
        let Value::Array(additions) = arg else {
            return Err(DbError::invalid_update("$pushAll takes an array"));
        };
        let items = target_array(parent, key, "$pushAll", true)?;
        items.extend(additions.iter().cloned());
        Ok(())
    }

    pub(super) fn add_to_set(
        _: &ModifyCtx<'_>,
        parent: &mut Value,
        key: &str,
        arg: &Value,
    ) -> DbResult<()> {
        let (additions, _) = parse_each(arg, "$addToSet", false)?;
        let items = target_array(parent, key, "$addToSet", true)?;
        let single = [arg.clone()];
        let candidates: &[Value] = match &additions {
            Some(each) => each.as_slice(),
            None => single.as_slice(),
        };
        for candidate in candidates {
            if !items.contains(candidate) {
                items.push(candidate.clone());
            }
        }
        Ok(())
    }

    pub(super) fn pop(
        _: &ModifyCtx<'_>,
        parent: &mut Value,
        key: &str,
        arg: &Value,
    ) -> DbResult<()> {
        let Value::Number(direction) = arg else {
            return Err(DbError::invalid_update("$pop takes a number"));
        };
        let items = target_array(parent, key, "$pop", false)?;
        match direction.cmp(&0) {
            Ordering::Greater => {
                items.pop();
            }
            Ordering::Less => {
                if !items.is_empty() {
                    items.remove(0);
                }
            }
            Ordering::Equal => {}
        }
        Ok(())
    }

    pub(super) fn pull(
        ctx: &ModifyCtx<'_>,
        parent: &mut Value,
        key: &str,
        arg: &Value,
    ) -> DbResult<()> {
        let matcher = Matcher::new(ctx.cmp);
        let items = target_array(parent, key, "$pull", false)?;
        let mut kept = Vec::with_capacity(items.len());
        for item in items.drain(..) {
            if !matcher.match_value(&item, arg)? {
                kept.push(item);
            }
        }
        *items = kept;
        Ok(())
    }

    pub(super) fn pull_all(
        _: &ModifyCtx<'_>,
        parent: &mut Value,
        key: &str,
        arg: &Value,
    ) -> DbResult<()> {
        let Value::Array(victims) = arg else {
            return Err(DbError::invalid_update("$pullAll takes an array"));
        };
        let items = target_array(parent, key, "$pullAll", false)?;
        items.retain(|item| !victims.contains(item));
        Ok(())
    }

    /// Parses the `$each` form of `$push`/`$addToSet`. Returns the element
    /// list (when present) and the `$slice` bound (for `$push` only).
    fn parse_each<'v>(
        arg: &'v Value,
        name: &str,
        allow_slice: bool,
    ) -> DbResult<(Option<&'v Vec<Value>>, Option<i64>)> {
        let Value::Map(map) = arg else {
            return Ok((None, None));
        };
        if !map.contains_key("$each") {
            if map.contains_key("$slice") {
                return Err(DbError::invalid_update("$slice requires $each"));
            }
            return Ok((None, None));
        }

        let mut each = None;
        let mut slice = None;
        for (k, v) in map {
            match k.as_str() {
                "$each" => match v {
                    Value::Array(items) => each = Some(items),
                    _ => return Err(DbError::invalid_update("$each takes an array")),
                },
                "$slice" if allow_slice => match v {
                    Value::Number(n) => slice = Some(*n),
                    _ => return Err(DbError::invalid_update("$slice takes an integer")),
                },
                _ => {
                    return Err(DbError::invalid_update(format!(
                        "unexpected key {k} alongside $each in {name}"
                    )));
                }
            }
        }
        Ok((each, slice))
    }

    fn apply_slice(items: &mut Vec<Value>, n: i64) {
        if n == 0 {
            items.clear();
        } else if n > 0 {
            items.truncate(n as usize);
        } else {
            let keep = n.unsigned_abs() as usize;
            if items.len() > keep {
                let drop = items.len() - keep;
                items.drain(..drop);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(j: serde_json::Value) -> Value {
        quilldb_codec::from_json(j).unwrap()
    }

    fn run(d: serde_json::Value, u: serde_json::Value) -> DbResult<Value> {
        let cmp = ValueComparator::new();
        modify(&doc(d), &doc(u), &doc(json!({})), &cmp)
    }

    fn run_with_query(
        d: serde_json::Value,
        u: serde_json::Value,
        q: serde_json::Value,
    ) -> DbResult<Value> {
        let cmp = ValueComparator::new();
        modify(&doc(d), &doc(u), &doc(q), &cmp)
    }

    #[test]
    fn replacement_restores_id() {
        let out = run(json!({"_id": "x1", "a": 1}), json!({"b": 2})).unwrap();
        assert_eq!(out, doc(json!({"_id": "x1", "b": 2})));
    }

    #[test]
    fn replacement_with_differing_id_fails() {
        let err = run(json!({"_id": "x1", "a": 1}), json!({"_id": "x2", "b": 2})).unwrap_err();
        assert!(matches!(err, DbError::InvalidUpdate { .. }));
    }

    #[test]
    fn mixed_forms_rejected() {
        let err = run(json!({"_id": "x1"}), json!({"a": 1, "$set": {"b": 2}})).unwrap_err();
        assert!(matches!(err, DbError::InvalidUpdate { .. }));
    }

    #[test]
    fn unknown_modifier_rejected() {
        let err = run(json!({"_id": "x1"}), json!({"$rename": {"a": "b"}})).unwrap_err();
        assert!(matches!(err, DbError::InvalidUpdate { .. }));
    }

    #[test]
    fn set_creates_intermediate_maps() {
        let out = run(json!({"_id": "x1"}), json!({"$set": {"a.b.c": 7}})).unwrap();
        assert_eq!(out, doc(json!({"_id": "x1", "a": {"b": {"c": 7}}})));
    }

    #[test]
    fn set_cannot_change_id() {
        let err = run(json!({"_id": "x1"}), json!({"$set": {"_id": "x2"}})).unwrap_err();
        assert!(matches!(err, DbError::InvalidUpdate { .. }));
    }

    #[test]
    fn unset_removes_and_ignores_missing() {
        let out = run(json!({"_id": "x1", "a": 1}), json!({"$unset": {"a": true}})).unwrap();
        assert_eq!(out, doc(json!({"_id": "x1"})));

        let out = run(json!({"_id": "x1"}), json!({"$unset": {"nope.deep": true}})).unwrap();
        assert_eq!(out, doc(json!({"_id": "x1"})));
    }

    #[test]
    fn inc_adds_and_initializes() {
        let out = run(json!({"_id": "x1", "n": 4}), json!({"$inc": {"n": 3}})).unwrap();
        assert_eq!(out.get("n"), Some(&Value::Number(7)));

        let out = run(json!({"_id": "x1"}), json!({"$inc": {"n": 3}})).unwrap();
        assert_eq!(out.get("n"), Some(&Value::Number(3)));
    }

    #[test]
    fn inc_type_errors() {
        assert!(run(json!({"_id": "x", "n": "s"}), json!({"$inc": {"n": 1}})).is_err());
        assert!(run(json!({"_id": "x", "n": 1}), json!({"$inc": {"n": "s"}})).is_err());
    }

    #[test]
    fn min_max() {
        let out = run(json!({"_id": "x", "n": 5}), json!({"$min": {"n": 3}})).unwrap();
        assert_eq!(out.get("n"), Some(&Value::Number(3)));
        let out = run(json!({"_id": "x", "n": 5}), json!({"$min": {"n": 9}})).unwrap();
        assert_eq!(out.get("n"), Some(&Value::Number(5)));
        let out = run(json!({"_id": "x", "n": 5}), json!({"$max": {"n": 9}})).unwrap();
        assert_eq!(out.get("n"), Some(&Value::Number(9)));
        let out = run(json!({"_id": "x"}), json!({"$max": {"n": 9}})).unwrap();
        assert_eq!(out.get("n"), Some(&Value::Number(9)));
    }

    #[test]
    fn push_appends_and_creates() {
        let out = run(json!({"_id": "x", "a": [1]}), json!({"$push": {"a": 2}})).unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([1, 2]))));

        let out = run(json!({"_id": "x"}), json!({"$push": {"a": 1}})).unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([1]))));
    }

    #[test]
    fn push_rejects_non_array_target() {
        assert!(run(json!({"_id": "x", "a": 3}), json!({"$push": {"a": 1}})).is_err());
    }

    #[test]
    fn push_each_and_slice() {
        let out = run(
            json!({"_id": "x", "a": [1]}),
            json!({"$push": {"a": {"$each": [2, 3]}}}),
        )
        .unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([1, 2, 3]))));

        let out = run(
            json!({"_id": "x", "a": [1, 2]}),
            json!({"$push": {"a": {"$each": [3, 4], "$slice": 3}}}),
        )
        .unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([1, 2, 3]))));

        let out = run(
            json!({"_id": "x", "a": [1, 2]}),
            json!({"$push": {"a": {"$each": [3, 4], "$slice": -2}}}),
        )
        .unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([3, 4]))));

        let out = run(
            json!({"_id": "x", "a": [1, 2]}),
            json!({"$push": {"a": {"$each": [], "$slice": 0}}}),
        )
        .unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([]))));

        assert!(run(
            json!({"_id": "x", "a": []}),
            json!({"$push": {"a": {"$each": [1], "$extra": 1}}}),
        )
        .is_err());
        assert!(run(
            json!({"_id": "x", "a": []}),
            json!({"$push": {"a": {"$slice": 1}}}),
        )
        .is_err());
    }

    #[test]
    fn push_all_extends() {
        let out = run(
            json!({"_id": "x", "a": [1]}),
            json!({"$pushAll": {"a": [2, 3]}}),
        )
        .unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([1, 2, 3]))));
        assert!(run(json!({"_id": "x"}), json!({"$pushAll": {"a": 5}})).is_err());
    }

    #[test]
    fn add_to_set_deduplicates() {
        let out = run(
            json!({"_id": "x", "a": [1, 2]}),
            json!({"$addToSet": {"a": 2}}),
        )
        .unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([1, 2]))));

        let out = run(
            json!({"_id": "x", "a": [1]}),
            json!({"$addToSet": {"a": {"$each": [1, 3, 3]}}}),
        )
        .unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([1, 3]))));
    }

    #[test]
    fn add_to_set_compares_subdocuments_structurally() {
        // Key order never matters: maps are canonically ordered.
        let out = run(
            json!({"_id": "x", "a": [{"p": 1, "q": 2}]}),
            json!({"$addToSet": {"a": {"q": 2, "p": 1}}}),
        )
        .unwrap();
        assert_eq!(out.get("a").unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn pop_both_ends() {
        let out = run(json!({"_id": "x", "a": [1, 2, 3]}), json!({"$pop": {"a": 1}})).unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([1, 2]))));

        let out = run(json!({"_id": "x", "a": [1, 2, 3]}), json!({"$pop": {"a": -1}})).unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([2, 3]))));

        let out = run(json!({"_id": "x", "a": [1]}), json!({"$pop": {"a": 0}})).unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([1]))));

        assert!(run(json!({"_id": "x", "a": 1}), json!({"$pop": {"a": 1}})).is_err());
    }

    #[test]
    fn pull_matches_subqueries_and_literals() {
        let out = run(
            json!({"_id": "x", "a": [4, 5, 4]}),
            json!({"$pull": {"a": 4}}),
        )
        .unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([5]))));

        let out = run(
            json!({"_id": "x", "a": [{"n": 1}, {"n": 9}]}),
            json!({"$pull": {"a": {"n": {"$gt": 5}}}}),
        )
        .unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([{"n": 1}]))));
    }

    #[test]
    fn pull_all_removes_every_listed_value() {
        let out = run(
            json!({"_id": "x", "a": [1, 2, 3, 2]}),
            json!({"$pullAll": {"a": [2, 3]}}),
        )
        .unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([1]))));
    }

    #[test]
    fn positional_updates_matching_elements() {
        let out = run_with_query(
            json!({"_id": "x", "a": {"b": [{"c": 1}, {"c": 2}, {"c": 3}]}}),
            json!({"$inc": {"a.b.$.c": 10}}),
            json!({"a.b.c": 2}),
        )
        .unwrap();
        assert_eq!(
            out,
            doc(json!({"_id": "x", "a": {"b": [{"c": 1}, {"c": 12}, {"c": 3}]}}))
        );
    }

    #[test]
    fn positional_on_scalar_array() {
        let out = run_with_query(
            json!({"_id": "x", "a": [5, 7, 5]}),
            json!({"$set": {"a.$": 9}}),
            json!({"a": 5}),
        )
        .unwrap();
        assert_eq!(out.get("a"), Some(&doc(json!([9, 7, 9]))));
    }

    #[test]
    fn positional_placement_rules() {
        let err = run_with_query(
            json!({"_id": "x", "a": [1]}),
            json!({"$set": {"$.b": 1}}),
            json!({"a": 1}),
        )
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidUpdate { .. }));

        let err = run_with_query(
            json!({"_id": "x", "a": [[1]]}),
            json!({"$set": {"a.$.$": 1}}),
            json!({"a": 1}),
        )
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidUpdate { .. }));
    }
}
