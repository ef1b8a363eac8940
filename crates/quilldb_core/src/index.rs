//! Ordered document indexes.
//!
//! An index maps extracted keys to the `_id` handles of the documents that
//! share them, in key-ascending order. The datastore's id-map owns every
//! document body; indexes never hold one. Keys are vectors of
//! `Option<Value>` slots so that compound indexes and the `undefined`
//! sentinel share one representation (`None` sorts before every value).
//!
//! Batch mutations are all-or-nothing: any failure rolls back the
//! mutations already performed in the same call before the error returns.

use crate::error::{DbError, DbResult};
use quilldb_codec::{doc_id, get_dotted, serialize, Value, ValueComparator};
use std::cmp::Ordering;

/// Specification of an index: its field paths and behavior flags.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Dotted field paths; more than one makes the index compound.
    pub fields: Vec<String>,
    /// Reject two documents sharing a key.
    pub unique: bool,
    /// Skip documents whose extracted key is undefined.
    pub sparse: bool,
    /// Expire documents whose (date) field is older than this many seconds.
    pub expire_after_seconds: Option<i64>,
}

impl IndexSpec {
    /// Creates a spec for a single-field index.
    pub fn field(path: impl Into<String>) -> Self {
        Self {
            fields: vec![path.into()],
            unique: false,
            sparse: false,
            expire_after_seconds: None,
        }
    }

    /// Creates a spec for a compound index over the given paths.
    pub fn compound(paths: Vec<String>) -> Self {
        Self {
            fields: paths,
            unique: false,
            sparse: false,
            expire_after_seconds: None,
        }
    }

    /// Makes this index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Makes this index sparse.
    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// The index name: its field paths joined with commas.
    #[must_use]
    pub fn name(&self) -> String {
        self.fields.join(",")
    }
}

/// An extracted index key: one slot per indexed field.
pub type Key = Vec<Option<Value>>;

/// An ordered index from extracted keys to document id handles.
///
/// The backing container is a sorted vector searched through the datastore's
/// [`ValueComparator`]; any ordered container with duplicate-key support
/// would do.
pub struct DocIndex {
    spec: IndexSpec,
    cmp: ValueComparator,
    entries: Vec<(Key, Vec<String>)>,
}

impl DocIndex {
    /// Creates an empty index.
    pub fn new(spec: IndexSpec, cmp: ValueComparator) -> Self {
        Self {
            spec,
            cmp,
            entries: Vec::new(),
        }
    }

    /// Returns the index specification.
    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// Returns the number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the index holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Extracts the keys a document is indexed under.
    ///
    /// Single-field indexes expand array values into one key per distinct
    /// element; compound indexes never expand. Returns an empty list when a
    /// sparse index skips the document.
    fn extract_keys(&self, doc: &Value) -> Vec<Key> {
        if self.spec.fields.len() == 1 {
            let resolved = get_dotted(doc, &self.spec.fields[0]);
            match resolved {
                Some(Value::Array(items)) if !items.is_empty() => {
                    let mut distinct: Vec<Value> = Vec::new();
                    for item in items {
                        if !distinct
                            .iter()
                            .any(|seen| self.cmp.compare(seen, &item) == Ordering::Equal)
                        {
                            distinct.push(item);
                        }
                    }
                    distinct.into_iter().map(|v| vec![Some(v)]).collect()
                }
                Some(Value::Array(_)) | None => {
                    if self.spec.sparse {
                        Vec::new()
                    } else {
                        vec![vec![None]]
                    }
                }
                Some(value) => vec![vec![Some(value)]],
            }
        } else {
            let slots: Key = self
                .spec
                .fields
                .iter()
                .map(|path| get_dotted(doc, path))
                .collect();
            if self.spec.sparse && slots.iter().all(Option::is_none) {
                Vec::new()
            } else {
                vec![slots]
            }
        }
    }

    fn find(&self, key: &Key) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(probe, _)| self.cmp.compare_keys(probe, key))
    }

    fn insert_key(&mut self, key: Key, id: &str) -> DbResult<()> {
        match self.find(&key) {
            Ok(pos) => {
                let ids = &mut self.entries[pos].1;
                if self.spec.unique && !ids.is_empty() {
                    return Err(DbError::unique_violated(
                        render_key(&key),
                        self.spec.name(),
                    ));
                }
                ids.push(id.to_string());
                Ok(())
            }
            Err(pos) => {
                self.entries.insert(pos, (key, vec![id.to_string()]));
                Ok(())
            }
        }
    }

    fn remove_key(&mut self, key: &Key, id: &str) {
        if let Ok(pos) = self.find(key) {
            let ids = &mut self.entries[pos].1;
            if let Some(at) = ids.iter().position(|existing| existing == id) {
                ids.remove(at);
            }
            if ids.is_empty() {
                self.entries.remove(pos);
            }
        }
    }

    /// Inserts one document.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UniqueViolated`] when a unique key is taken; no
    /// key of this document remains inserted afterwards.
    pub fn insert(&mut self, doc: &Value) -> DbResult<()> {
        let id = require_id(doc)?;
        let keys = self.extract_keys(doc);

        let mut done = 0;
        for key in &keys {
            if let Err(e) = self.insert_key(key.clone(), id) {
                for key in &keys[..done] {
                    self.remove_key(key, id);
                }
                return Err(e);
            }
            done += 1;
        }
        Ok(())
    }

    /// Inserts documents all-or-nothing.
    ///
    /// # Errors
    ///
    /// On failure every insertion performed by this call is reverted.
    pub fn insert_many(&mut self, docs: &[Value]) -> DbResult<()> {
        for (i, doc) in docs.iter().enumerate() {
            if let Err(e) = self.insert(doc) {
                for inserted in &docs[..i] {
                    self.remove(inserted);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Removes one document. Removing a document that is not indexed is a
    /// no-op.
    pub fn remove(&mut self, doc: &Value) {
        let Ok(id) = require_id(doc) else { return };
        for key in self.extract_keys(doc) {
            self.remove_key(&key, id);
        }
    }

    /// Removes several documents.
    pub fn remove_many(&mut self, docs: &[Value]) {
        for doc in docs {
            self.remove(doc);
        }
    }

    /// Replaces `old` with `new`.
    ///
    /// # Errors
    ///
    /// On failure the change is reverted: `old` stays indexed.
    pub fn update(&mut self, old: &Value, new: &Value) -> DbResult<()> {
        self.remove(old);
        if let Err(e) = self.insert(new) {
            // Restoring a document that was just removed cannot violate
            // uniqueness again.
            let _ = self.insert(old);
            return Err(e);
        }
        Ok(())
    }

    /// Applies a batch of `(old, new)` replacements all-or-nothing.
    ///
    /// # Errors
    ///
    /// On failure every replacement performed by this call is reverted.
    pub fn update_many(&mut self, pairs: &[(Value, Value)]) -> DbResult<()> {
        for (i, (old, new)) in pairs.iter().enumerate() {
            if let Err(e) = self.update(old, new) {
                for (old, new) in pairs[..i].iter().rev() {
                    let _ = self.update(new, old);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Exact inverse of [`DocIndex::update`], used when an update staged
    /// here must be undone because a later index rejected it.
    pub fn revert_update(&mut self, old: &Value, new: &Value) -> DbResult<()> {
        self.update(new, old)
    }

    /// Exact inverse of [`DocIndex::update_many`].
    pub fn revert_update_many(&mut self, pairs: &[(Value, Value)]) -> DbResult<()> {
        for (old, new) in pairs.iter().rev() {
            self.update(new, old)?;
        }
        Ok(())
    }

    /// Ids of the documents whose key equals `value` (single-field form).
    pub fn get_matching(&self, value: &Value) -> Vec<String> {
        self.get_matching_key(&vec![Some(value.clone())])
    }

    /// Ids matching any of the given values, deduplicated, in value order.
    pub fn get_matching_many(&self, values: &[Value]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for value in values {
            for id in self.get_matching(value) {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
        out
    }

    /// Ids of the documents indexed under exactly `key`.
    pub fn get_matching_key(&self, key: &Key) -> Vec<String> {
        match self.find(key) {
            Ok(pos) => self.entries[pos].1.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Range scan in ascending key order.
    ///
    /// Bounds apply to the first key component. The operand is a map using
    /// any of `$lt`, `$lte`, `$gt`, `$gte`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidQuery`] for unknown bound operators.
    pub fn get_between_bounds(&self, bounds: &Value) -> DbResult<Vec<String>> {
        let Value::Map(entries) = bounds else {
            return Err(DbError::invalid_query("bounds must be a map of operators"));
        };

        let mut lower: Option<(&Value, bool)> = None; // (value, inclusive)
        let mut upper: Option<(&Value, bool)> = None;
        for (op, value) in entries {
            match op.as_str() {
                "$gt" => lower = Some((value, false)),
                "$gte" => lower = Some((value, true)),
                "$lt" => upper = Some((value, false)),
                "$lte" => upper = Some((value, true)),
                _ => {
                    return Err(DbError::invalid_query(format!(
                        "unknown bound operator {op}"
                    )));
                }
            }
        }

        let start = match lower {
            None => 0,
            Some((value, inclusive)) => self.entries.partition_point(|(key, _)| {
                let ord = self.cmp.compare_opt(key[0].as_ref(), Some(value));
                ord == Ordering::Less || (!inclusive && ord == Ordering::Equal)
            }),
        };
        let end = match upper {
            None => self.entries.len(),
            Some((value, inclusive)) => self.entries.partition_point(|(key, _)| {
                let ord = self.cmp.compare_opt(key[0].as_ref(), Some(value));
                ord == Ordering::Less || (inclusive && ord == Ordering::Equal)
            }),
        };

        let mut out = Vec::new();
        for (_, ids) in &self.entries[start..end.max(start)] {
            out.extend(ids.iter().cloned());
        }
        Ok(out)
    }

    /// All ids in key-ascending order.
    pub fn get_all(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (_, ids) in &self.entries {
            out.extend(ids.iter().cloned());
        }
        out
    }

    /// Clears the index and optionally re-populates it.
    ///
    /// # Errors
    ///
    /// Propagates insertion errors from the new documents.
    pub fn reset(&mut self, docs: &[Value]) -> DbResult<()> {
        self.entries.clear();
        self.insert_many(docs)
    }
}

impl std::fmt::Debug for DocIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocIndex")
            .field("spec", &self.spec)
            .field("keys", &self.entries.len())
            .finish()
    }
}

fn require_id(doc: &Value) -> DbResult<&str> {
    doc_id(doc).ok_or_else(|| DbError::invalid_update("document is missing its _id"))
}

/// Renders a key for the `UniqueViolated` error.
fn render_key(key: &Key) -> String {
    key.iter()
        .map(|slot| match slot {
            Some(value) => serialize(value),
            None => "undefined".to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(j: serde_json::Value) -> Value {
        quilldb_codec::from_json(j).unwrap()
    }

    fn index(spec: IndexSpec) -> DocIndex {
        DocIndex::new(spec, ValueComparator::new())
    }

    #[test]
    fn insert_and_get_matching() {
        let mut idx = index(IndexSpec::field("age"));
        idx.insert(&doc(json!({"_id": "a", "age": 5}))).unwrap();
        idx.insert(&doc(json!({"_id": "b", "age": 7}))).unwrap();
        idx.insert(&doc(json!({"_id": "c", "age": 5}))).unwrap();

        assert_eq!(idx.get_matching(&Value::Number(5)), vec!["a", "c"]);
        assert_eq!(idx.get_matching(&Value::Number(9)), Vec::<String>::new());
    }

    #[test]
    fn get_all_in_key_order() {
        let mut idx = index(IndexSpec::field("age"));
        for (id, age) in [("a", 57), ("b", 5), ("c", 23)] {
            idx.insert(&doc(json!({"_id": id, "age": age}))).unwrap();
        }
        assert_eq!(idx.get_all(), vec!["b", "c", "a"]);
    }

    #[test]
    fn missing_field_uses_undefined_sentinel() {
        let mut idx = index(IndexSpec::field("age"));
        idx.insert(&doc(json!({"_id": "a"}))).unwrap();
        idx.insert(&doc(json!({"_id": "b", "age": 1}))).unwrap();

        assert_eq!(idx.get_matching_key(&vec![None]), vec!["a"]);
        // Undefined sorts before every defined key.
        assert_eq!(idx.get_all(), vec!["a", "b"]);
    }

    #[test]
    fn sparse_skips_missing_fields() {
        let mut idx = index(IndexSpec::field("age").sparse());
        idx.insert(&doc(json!({"_id": "a"}))).unwrap();
        idx.insert(&doc(json!({"_id": "b", "age": 1}))).unwrap();

        assert!(idx.get_matching_key(&vec![None]).is_empty());
        assert_eq!(idx.get_all(), vec!["b"]);
    }

    #[test]
    fn sparse_unique_allows_many_absent() {
        let mut idx = index(IndexSpec::field("tf").unique().sparse());
        idx.insert(&doc(json!({"_id": "a"}))).unwrap();
        idx.insert(&doc(json!({"_id": "b"}))).unwrap();
        assert!(idx.is_empty());
    }

    #[test]
    fn unique_violation_reports_key_and_index() {
        let mut idx = index(IndexSpec::field("tf").unique());
        idx.insert(&doc(json!({"_id": "a", "tf": "hello"}))).unwrap();

        let err = idx.insert(&doc(json!({"_id": "b", "tf": "hello"}))).unwrap_err();
        match err {
            DbError::UniqueViolated { key, index } => {
                assert!(key.contains("hello"));
                assert_eq!(index, "tf");
            }
            other => panic!("expected UniqueViolated, got {other:?}"),
        }
        assert_eq!(idx.get_matching(&Value::from("hello")).len(), 1);
    }

    #[test]
    fn unique_non_sparse_collides_on_missing_fields() {
        let mut idx = index(IndexSpec::field("tf").unique());
        idx.insert(&doc(json!({"_id": "a"}))).unwrap();
        assert!(idx.insert(&doc(json!({"_id": "b"}))).is_err());
    }

    #[test]
    fn array_fields_index_each_distinct_element() {
        let mut idx = index(IndexSpec::field("tags"));
        idx.insert(&doc(json!({"_id": "a", "tags": ["x", "y", "x"]})))
            .unwrap();

        assert_eq!(idx.get_matching(&Value::from("x")), vec!["a"]);
        assert_eq!(idx.get_matching(&Value::from("y")), vec!["a"]);
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn array_unique_checked_across_documents_only() {
        let mut idx = index(IndexSpec::field("tags").unique());
        // Duplicates inside one document collapse.
        idx.insert(&doc(json!({"_id": "a", "tags": ["x", "x"]})))
            .unwrap();
        // A second document reusing the element collides, and its partial
        // insertion is rolled back.
        let err = idx
            .insert(&doc(json!({"_id": "b", "tags": ["z", "x"]})))
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolated { .. }));
        assert!(idx.get_matching(&Value::from("z")).is_empty());
    }

    #[test]
    fn insert_many_is_atomic() {
        let mut idx = index(IndexSpec::field("n").unique());
        let docs = vec![
            doc(json!({"_id": "a", "n": 1})),
            doc(json!({"_id": "b", "n": 2})),
            doc(json!({"_id": "c", "n": 1})),
        ];
        assert!(idx.insert_many(&docs).is_err());
        assert!(idx.is_empty());
    }

    #[test]
    fn update_moves_document_between_keys() {
        let mut idx = index(IndexSpec::field("n"));
        let old = doc(json!({"_id": "a", "n": 1}));
        let new = doc(json!({"_id": "a", "n": 2}));
        idx.insert(&old).unwrap();
        idx.update(&old, &new).unwrap();

        assert!(idx.get_matching(&Value::Number(1)).is_empty());
        assert_eq!(idx.get_matching(&Value::Number(2)), vec!["a"]);
    }

    #[test]
    fn failed_update_restores_old_key() {
        let mut idx = index(IndexSpec::field("n").unique());
        let a = doc(json!({"_id": "a", "n": 1}));
        let b = doc(json!({"_id": "b", "n": 2}));
        idx.insert(&a).unwrap();
        idx.insert(&b).unwrap();

        let clash = doc(json!({"_id": "a", "n": 2}));
        assert!(idx.update(&a, &clash).is_err());
        assert_eq!(idx.get_matching(&Value::Number(1)), vec!["a"]);
        assert_eq!(idx.get_matching(&Value::Number(2)), vec!["b"]);
    }

    #[test]
    fn update_many_is_atomic() {
        let mut idx = index(IndexSpec::field("n").unique());
        let a = doc(json!({"_id": "a", "n": 1}));
        let b = doc(json!({"_id": "b", "n": 2}));
        idx.insert(&a).unwrap();
        idx.insert(&b).unwrap();

        let pairs = vec![
            (a.clone(), doc(json!({"_id": "a", "n": 10}))),
            (b.clone(), doc(json!({"_id": "b", "n": 10}))),
        ];
        assert!(idx.update_many(&pairs).is_err());
        assert_eq!(idx.get_matching(&Value::Number(1)), vec!["a"]);
        assert_eq!(idx.get_matching(&Value::Number(2)), vec!["b"]);
        assert!(idx.get_matching(&Value::Number(10)).is_empty());
    }

    #[test]
    fn revert_update_is_exact_inverse() {
        let mut idx = index(IndexSpec::field("n"));
        let old = doc(json!({"_id": "a", "n": 1}));
        let new = doc(json!({"_id": "a", "n": 2}));
        idx.insert(&old).unwrap();
        idx.update(&old, &new).unwrap();
        idx.revert_update(&old, &new).unwrap();

        assert_eq!(idx.get_matching(&Value::Number(1)), vec!["a"]);
        assert!(idx.get_matching(&Value::Number(2)).is_empty());
    }

    #[test]
    fn get_matching_many_unions() {
        let mut idx = index(IndexSpec::field("n"));
        for (id, n) in [("a", 1), ("b", 2), ("c", 3)] {
            idx.insert(&doc(json!({"_id": id, "n": n}))).unwrap();
        }
        assert_eq!(
            idx.get_matching_many(&[Value::Number(3), Value::Number(1), Value::Number(9)]),
            vec!["c", "a"]
        );
    }

    #[test]
    fn between_bounds_scans_ascending() {
        let mut idx = index(IndexSpec::field("age"));
        for (id, age) in [("a", 5), ("b", 57), ("c", 52), ("d", 23), ("e", 89)] {
            idx.insert(&doc(json!({"_id": id, "age": age}))).unwrap();
        }

        let gt23 = idx
            .get_between_bounds(&doc(json!({"$gt": 23})))
            .unwrap();
        assert_eq!(gt23, vec!["c", "b", "e"]);

        let range = idx
            .get_between_bounds(&doc(json!({"$gte": 23, "$lt": 57})))
            .unwrap();
        assert_eq!(range, vec!["d", "c"]);

        assert!(idx.get_between_bounds(&doc(json!({"$around": 5}))).is_err());
    }

    #[test]
    fn compound_keys_do_not_expand_arrays() {
        let mut idx = index(IndexSpec::compound(vec!["a".into(), "b".into()]));
        idx.insert(&doc(json!({"_id": "x", "a": [1, 2], "b": 3})))
            .unwrap();
        assert_eq!(idx.len(), 1);

        let key: Key = vec![
            Some(doc(json!([1, 2]))),
            Some(Value::Number(3)),
        ];
        assert_eq!(idx.get_matching_key(&key), vec!["x"]);
    }

    #[test]
    fn compound_ordering_is_component_wise() {
        let mut idx = index(IndexSpec::compound(vec!["a".into(), "b".into()]));
        for (id, a, b) in [("x", 1, 9), ("y", 1, 2), ("z", 0, 5)] {
            idx.insert(&doc(json!({"_id": id, "a": a, "b": b}))).unwrap();
        }
        assert_eq!(idx.get_all(), vec!["z", "y", "x"]);
    }

    #[test]
    fn reset_repopulates() {
        let mut idx = index(IndexSpec::field("n"));
        idx.insert(&doc(json!({"_id": "a", "n": 1}))).unwrap();
        idx.reset(&[doc(json!({"_id": "b", "n": 2}))]).unwrap();

        assert!(idx.get_matching(&Value::Number(1)).is_empty());
        assert_eq!(idx.get_matching(&Value::Number(2)), vec!["b"]);
    }
}
