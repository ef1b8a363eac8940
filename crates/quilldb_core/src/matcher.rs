//! Query matching.
//!
//! A query is a document whose entries are either logical operators
//! (`$and`, `$or`, `$not`) or field expressions. Field expressions compare
//! a dotted path against a literal, a regular-expression operator, or a map
//! of comparison operators. Comparison operators dispatch through
//! [`comparison_op`], the registry of built-ins.
//!
//! When a resolved path crosses an array, matching is element-wise
//! existential unless the right-hand side is array-specific (`$size`,
//! `$elemMatch`, `$ne`, `$eq` with an array operand, or a literal array).
//!
//! `$where` has no value-level representation: opaque predicates are
//! attached programmatically on the cursor, and a `$where` key inside a
//! query is rejected.

use crate::error::{DbError, DbResult};
use quilldb_codec::{get_dotted, Value, ValueComparator};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A registered comparison operator.
pub type ComparisonOp = fn(&Matcher<'_>, Option<&Value>, &Value) -> DbResult<bool>;

/// Looks up a comparison operator by its `$`-name.
pub fn comparison_op(name: &str) -> Option<ComparisonOp> {
    Some(match name {
        "$lt" => ops::lt,
        "$lte" => ops::lte,
        "$gt" => ops::gt,
        "$gte" => ops::gte,
        "$eq" => ops::eq,
        "$ne" => ops::ne,
        "$in" => ops::within,
        "$nin" => ops::not_within,
        "$exists" => ops::exists,
        "$size" => ops::size,
        "$elemMatch" => ops::elem_match,
        _ => return None,
    })
}

/// Operators that force whole-array semantics when the resolved value is an
/// array. `$eq` joins this set only when its operand is itself an array.
fn is_array_specific(name: &str, operand: &Value) -> bool {
    match name {
        "$size" | "$elemMatch" | "$ne" => true,
        "$eq" => matches!(operand, Value::Array(_)),
        _ => false,
    }
}

/// Evaluates queries against documents.
pub struct Matcher<'a> {
    cmp: &'a ValueComparator,
}

impl<'a> Matcher<'a> {
    /// Creates a matcher using the given value comparator for ordering
    /// operators.
    pub fn new(cmp: &'a ValueComparator) -> Self {
        Self { cmp }
    }

    /// Returns true when `doc` satisfies `query`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidQuery`] on unknown operators, malformed
    /// operands, or maps mixing operator and plain keys.
    pub fn matches(&self, doc: &Value, query: &Value) -> DbResult<bool> {
        // Primitive documents or predicates only occur on sub-matches
        // (array elements, $pull operands); compare them as a single value.
        let entries = match (doc, query) {
            (Value::Map(_), Value::Map(entries)) => entries,
            _ => return self.match_resolved(Some(doc), query, false),
        };
        for (key, operand) in entries {
            if let Some(op) = key.strip_prefix('$') {
                match op {
                    "and" => {
                        for sub in logical_operand(key, operand)? {
                            if !self.matches(doc, sub)? {
                                return Ok(false);
                            }
                        }
                    }
                    "or" => {
                        let mut any = false;
                        for sub in logical_operand(key, operand)? {
                            if self.matches(doc, sub)? {
                                any = true;
                                break;
                            }
                        }
                        if !any {
                            return Ok(false);
                        }
                    }
                    "not" => {
                        if self.matches(doc, operand)? {
                            return Ok(false);
                        }
                    }
                    "where" => {
                        return Err(DbError::invalid_query(
                            "$where takes a programmatic predicate, not a value",
                        ));
                    }
                    _ => {
                        return Err(DbError::invalid_query(format!(
                            "unknown logical operator {key}"
                        )));
                    }
                }
            } else if !self.match_field(doc, key, operand)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Matches a single value against a predicate, wrapping primitives the
    /// way array elements are matched.
    pub fn match_value(&self, value: &Value, predicate: &Value) -> DbResult<bool> {
        self.matches(value, predicate)
    }

    fn match_field(&self, doc: &Value, path: &str, operand: &Value) -> DbResult<bool> {
        let resolved = get_dotted(doc, path);
        self.match_resolved(resolved.as_ref(), operand, false)
    }

    fn match_resolved(
        &self,
        resolved: Option<&Value>,
        operand: &Value,
        whole_array: bool,
    ) -> DbResult<bool> {
        if let Some(Value::Array(items)) = resolved {
            if !whole_array {
                if matches!(operand, Value::Array(_)) {
                    return self.match_resolved(resolved, operand, true);
                }
                if let Value::Map(entries) = operand {
                    if operator_map(entries)?
                        && entries.iter().any(|(k, v)| is_array_specific(k, v))
                    {
                        return self.match_resolved(resolved, operand, true);
                    }
                }
                for item in items {
                    if self.match_resolved(Some(item), operand, false)? {
                        return Ok(true);
                    }
                }
                return Ok(false);
            }
        }

        if let Value::Map(entries) = operand {
            if operator_map(entries)? {
                return self.match_operators(resolved, entries);
            }
        }

        // Plain deep equality; an unresolved path equals nothing.
        Ok(resolved == Some(operand))
    }

    fn match_operators(
        &self,
        resolved: Option<&Value>,
        entries: &BTreeMap<String, Value>,
    ) -> DbResult<bool> {
        if entries.contains_key("$options") && !entries.contains_key("$regex") {
            return Err(DbError::invalid_query("$options requires $regex"));
        }

        for (name, arg) in entries {
            let holds = match name.as_str() {
                "$options" => continue,
                "$regex" => ops::regex_match(resolved, arg, entries.get("$options"))?,
                _ => match comparison_op(name) {
                    Some(op) => op(self, resolved, arg)?,
                    None => {
                        return Err(DbError::invalid_query(format!(
                            "unknown comparison operator {name}"
                        )));
                    }
                },
            };
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Orders two values when they are mutually comparable
    /// (string/number/date of the same type); `None` otherwise.
    fn comparable(&self, a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Date(_), Value::Date(_)) => Some(self.cmp.compare(a, b)),
            _ => None,
        }
    }
}

/// Checks that a map is entirely operator keys (`true`), entirely plain keys
/// (`false`), and rejects mixtures.
fn operator_map(entries: &BTreeMap<String, Value>) -> DbResult<bool> {
    let dollar = entries.keys().filter(|k| k.starts_with('$')).count();
    if dollar == 0 {
        Ok(false)
    } else if dollar == entries.len() {
        Ok(true)
    } else {
        Err(DbError::invalid_query(
            "cannot mix operator and plain keys in one expression",
        ))
    }
}

fn logical_operand<'q>(name: &str, operand: &'q Value) -> DbResult<&'q Vec<Value>> {
    match operand {
        Value::Array(subs) if !subs.is_empty() => Ok(subs),
        _ => Err(DbError::invalid_query(format!(
            "{name} takes a non-empty array of sub-queries"
        ))),
    }
}

/// JavaScript-style truthiness, used by `$exists`.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0,
        Value::String(s) => !s.is_empty(),
        Value::Date(_) | Value::Array(_) | Value::Map(_) => true,
    }
}

mod ops {
    use super::*;

    pub(super) fn lt(m: &Matcher<'_>, resolved: Option<&Value>, arg: &Value) -> DbResult<bool> {
        ordering(m, resolved, arg, |o| o == Ordering::Less)
    }

    pub(super) fn lte(m: &Matcher<'_>, resolved: Option<&Value>, arg: &Value) -> DbResult<bool> {
        ordering(m, resolved, arg, |o| o != Ordering::Greater)
    }

    pub(super) fn gt(m: &Matcher<'_>, resolved: Option<&Value>, arg: &Value) -> DbResult<bool> {
        ordering(m, resolved, arg, |o| o == Ordering::Greater)
    }

    pub(super) fn gte(m: &Matcher<'_>, resolved: Option<&Value>, arg: &Value) -> DbResult<bool> {
        ordering(m, resolved, arg, |o| o != Ordering::Less)
    }

    fn ordering(
        m: &Matcher<'_>,
        resolved: Option<&Value>,
        arg: &Value,
        accept: fn(Ordering) -> bool,
    ) -> DbResult<bool> {
        // Type mismatches are not matches, never errors.
        Ok(match resolved {
            Some(value) => m.comparable(value, arg).map(accept).unwrap_or(false),
            None => false,
        })
    }

    pub(super) fn eq(_: &Matcher<'_>, resolved: Option<&Value>, arg: &Value) -> DbResult<bool> {
        Ok(resolved == Some(arg))
    }

    pub(super) fn ne(m: &Matcher<'_>, resolved: Option<&Value>, arg: &Value) -> DbResult<bool> {
        Ok(!eq(m, resolved, arg)?)
    }

    pub(super) fn within(
        _: &Matcher<'_>,
        resolved: Option<&Value>,
        arg: &Value,
    ) -> DbResult<bool> {
        let Value::Array(candidates) = arg else {
            return Err(DbError::invalid_query("$in takes an array"));
        };
        Ok(resolved.is_some_and(|value| candidates.iter().any(|c| c == value)))
    }

    pub(super) fn not_within(
        m: &Matcher<'_>,
        resolved: Option<&Value>,
        arg: &Value,
    ) -> DbResult<bool> {
        if !matches!(arg, Value::Array(_)) {
            return Err(DbError::invalid_query("$nin takes an array"));
        }
        Ok(!within(m, resolved, arg)?)
    }

    pub(super) fn exists(
        _: &Matcher<'_>,
        resolved: Option<&Value>,
        arg: &Value,
    ) -> DbResult<bool> {
        Ok(resolved.is_some() == truthy(arg))
    }

    pub(super) fn size(_: &Matcher<'_>, resolved: Option<&Value>, arg: &Value) -> DbResult<bool> {
        let Value::Number(expected) = arg else {
            return Err(DbError::invalid_query("$size takes an integer"));
        };
        if *expected < 0 {
            return Err(DbError::invalid_query("$size takes a non-negative integer"));
        }
        Ok(match resolved {
            Some(Value::Array(items)) => items.len() as i64 == *expected,
            _ => false,
        })
    }

    pub(super) fn elem_match(
        m: &Matcher<'_>,
        resolved: Option<&Value>,
        arg: &Value,
    ) -> DbResult<bool> {
        if !matches!(arg, Value::Map(_)) {
            return Err(DbError::invalid_query("$elemMatch takes a sub-query"));
        }
        match resolved {
            Some(Value::Array(items)) => {
                for item in items {
                    if m.matches(item, arg)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    pub(super) fn regex_match(
        resolved: Option<&Value>,
        pattern: &Value,
        options: Option<&Value>,
    ) -> DbResult<bool> {
        let Value::String(pattern) = pattern else {
            return Err(DbError::invalid_query("$regex takes a string pattern"));
        };
        let flags = match options {
            None => String::new(),
            Some(Value::String(flags)) => {
                if let Some(bad) = flags.chars().find(|c| !"imsx".contains(*c)) {
                    return Err(DbError::invalid_query(format!(
                        "unsupported $options flag {bad}"
                    )));
                }
                flags.clone()
            }
            Some(_) => return Err(DbError::invalid_query("$options takes a string")),
        };

        let full = if flags.is_empty() {
            pattern.clone()
        } else {
            format!("(?{flags}){pattern}")
        };
        let re = regex::Regex::new(&full)
            .map_err(|e| DbError::invalid_query(format!("invalid $regex: {e}")))?;

        Ok(match resolved {
            Some(Value::String(s)) => re.is_match(s),
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(j: serde_json::Value) -> Value {
        quilldb_codec::from_json(j).unwrap()
    }

    fn matches(d: serde_json::Value, q: serde_json::Value) -> bool {
        let cmp = ValueComparator::new();
        Matcher::new(&cmp).matches(&doc(d), &doc(q)).unwrap()
    }

    fn match_err(d: serde_json::Value, q: serde_json::Value) -> DbError {
        let cmp = ValueComparator::new();
        Matcher::new(&cmp).matches(&doc(d), &doc(q)).unwrap_err()
    }

    #[test]
    fn equality_on_fields() {
        assert!(matches(json!({"a": 5}), json!({"a": 5})));
        assert!(!matches(json!({"a": 5}), json!({"a": 6})));
        assert!(!matches(json!({"b": 5}), json!({"a": 5})));
    }

    #[test]
    fn deep_equality_on_subdocuments() {
        assert!(matches(
            json!({"a": {"x": 1, "y": 2}}),
            json!({"a": {"y": 2, "x": 1}})
        ));
        assert!(!matches(json!({"a": {"x": 1}}), json!({"a": {"x": 2}})));
    }

    #[test]
    fn dotted_paths() {
        assert!(matches(json!({"a": {"b": {"c": 2}}}), json!({"a.b.c": 2})));
        assert!(matches(
            json!({"a": {"b": [{"c": 1}, {"c": 2}, {"c": 3}]}}),
            json!({"a.b.c": 2})
        ));
    }

    #[test]
    fn ordering_operators() {
        assert!(matches(json!({"age": 57}), json!({"age": {"$gt": 23}})));
        assert!(!matches(json!({"age": 23}), json!({"age": {"$gt": 23}})));
        assert!(matches(json!({"age": 23}), json!({"age": {"$gte": 23}})));
        assert!(matches(json!({"age": 5}), json!({"age": {"$lt": 23}})));
        assert!(matches(
            json!({"name": "jo"}),
            json!({"name": {"$lt": "zz"}})
        ));
    }

    #[test]
    fn ordering_type_mismatch_is_false() {
        assert!(!matches(json!({"age": "57"}), json!({"age": {"$gt": 23}})));
        assert!(!matches(json!({"age": null}), json!({"age": {"$lt": 23}})));
    }

    #[test]
    fn ne_is_true_when_absent() {
        assert!(matches(json!({"a": 1}), json!({"b": {"$ne": 3}})));
        assert!(matches(json!({"a": 1}), json!({"a": {"$ne": 3}})));
        assert!(!matches(json!({"a": 3}), json!({"a": {"$ne": 3}})));
    }

    #[test]
    fn in_and_nin() {
        assert!(matches(json!({"a": 2}), json!({"a": {"$in": [1, 2, 3]}})));
        assert!(!matches(json!({"a": 9}), json!({"a": {"$in": [1, 2, 3]}})));
        assert!(matches(json!({"a": 9}), json!({"a": {"$nin": [1, 2, 3]}})));
        assert!(matches(json!({"b": 9}), json!({"a": {"$nin": [1, 2, 3]}})));
        assert!(matches!(
            match_err(json!({"a": 1}), json!({"a": {"$in": 5}})),
            DbError::InvalidQuery { .. }
        ));
    }

    #[test]
    fn exists_operator() {
        assert!(matches(json!({"a": null}), json!({"a": {"$exists": true}})));
        assert!(matches(json!({"b": 1}), json!({"a": {"$exists": false}})));
        assert!(!matches(json!({"a": 1}), json!({"a": {"$exists": false}})));
    }

    #[test]
    fn size_operator() {
        assert!(matches(json!({"a": [1, 2, 3]}), json!({"a": {"$size": 3}})));
        assert!(!matches(json!({"a": [1, 2]}), json!({"a": {"$size": 3}})));
        assert!(!matches(json!({"a": 5}), json!({"a": {"$size": 1}})));
    }

    #[test]
    fn elem_match_operator() {
        let d = json!({"pts": [{"x": 1, "y": 1}, {"x": 2, "y": 5}]});
        assert!(matches(
            d.clone(),
            json!({"pts": {"$elemMatch": {"x": 2, "y": 5}}})
        ));
        assert!(!matches(d, json!({"pts": {"$elemMatch": {"x": 1, "y": 5}}})));
    }

    #[test]
    fn regex_operator() {
        assert!(matches(
            json!({"name": "quilldb"}),
            json!({"name": {"$regex": "^qui"}})
        ));
        assert!(matches(
            json!({"name": "QuillDB"}),
            json!({"name": {"$regex": "quilldb", "$options": "i"}})
        ));
        assert!(!matches(
            json!({"n": 5}),
            json!({"n": {"$regex": "5"}})
        ));
        assert!(matches!(
            match_err(json!({"a": "x"}), json!({"a": {"$options": "i"}})),
            DbError::InvalidQuery { .. }
        ));
    }

    #[test]
    fn array_existential_semantics() {
        assert!(matches(json!({"tags": ["a", "b"]}), json!({"tags": "b"})));
        assert!(matches(
            json!({"n": [3, 8]}),
            json!({"n": {"$gt": 5}})
        ));
        assert!(!matches(json!({"tags": ["a", "b"]}), json!({"tags": "c"})));
    }

    #[test]
    fn array_whole_value_semantics() {
        // Literal array operand compares whole arrays.
        assert!(matches(json!({"a": [1, 2]}), json!({"a": [1, 2]})));
        assert!(!matches(json!({"a": [1, 2, 3]}), json!({"a": [1, 2]})));
        // $ne applies to the whole array, not element-wise.
        assert!(!matches(json!({"a": [1, 2]}), json!({"a": {"$ne": [1, 2]}})));
        assert!(matches(json!({"a": [1, 2]}), json!({"a": {"$ne": 2}})));
    }

    #[test]
    fn nested_arrays_recurse() {
        assert!(matches(json!({"a": [[1, 2], [3]]}), json!({"a": 3})));
    }

    #[test]
    fn logical_operators() {
        let d = json!({"age": 30, "name": "jo"});
        assert!(matches(
            d.clone(),
            json!({"$or": [{"age": 99}, {"name": "jo"}]})
        ));
        assert!(matches(
            d.clone(),
            json!({"$and": [{"age": 30}, {"name": "jo"}]})
        ));
        assert!(matches(d.clone(), json!({"$not": {"age": 99}})));
        assert!(!matches(d.clone(), json!({"$not": {"age": 30}})));
        assert!(matches!(
            match_err(d, json!({"$or": {"age": 30}})),
            DbError::InvalidQuery { .. }
        ));
    }

    #[test]
    fn where_values_are_rejected() {
        assert!(matches!(
            match_err(json!({"a": 1}), json!({"$where": "this.a === 1"})),
            DbError::InvalidQuery { .. }
        ));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        assert!(matches!(
            match_err(json!({"a": 1}), json!({"a": {"$frobnicate": 1}})),
            DbError::InvalidQuery { .. }
        ));
        assert!(matches!(
            match_err(json!({"a": 1}), json!({"$xor": [{"a": 1}]})),
            DbError::InvalidQuery { .. }
        ));
    }

    #[test]
    fn mixed_operator_and_plain_keys_rejected() {
        assert!(matches!(
            match_err(json!({"a": 1}), json!({"a": {"$gt": 0, "b": 1}})),
            DbError::InvalidQuery { .. }
        ));
    }

    #[test]
    fn dates_compare_with_ordering_operators() {
        let cmp = ValueComparator::new();
        let m = Matcher::new(&cmp);
        let d = Value::object([("at", Value::Date(1000))]);
        let q = Value::object([(
            "at",
            Value::object([("$gt", Value::Date(500))]),
        )]);
        assert!(m.matches(&d, &q).unwrap());
        // Date vs number is a type mismatch.
        let q = Value::object([("at", Value::object([("$gt", Value::Number(500))]))]);
        assert!(!m.matches(&d, &q).unwrap());
    }
}
