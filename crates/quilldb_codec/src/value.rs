//! Dynamic document value type.

use std::collections::BTreeMap;

/// A dynamic document value.
///
/// This type represents any value a QuillDB document can hold. Numbers are
/// signed 64-bit integers; fractional literals are rejected at the codec
/// boundary. Map keys are kept in a canonically ordered container so that
/// equality and ordering never depend on insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Number(i64),
    /// Text string (UTF-8).
    String(String),
    /// Date as milliseconds since the Unix epoch.
    Date(i64),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of field name to value, canonically ordered by key.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Create a map value from an iterator of pairs.
    pub fn object<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as a number, if it is one.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as epoch milliseconds, if it is a date.
    pub fn as_date(&self) -> Option<i64> {
        match self {
            Value::Date(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a mutable array, if it is one.
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get this value as a mutable map, if it is one.
    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a field in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            _ => None,
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
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

/// Resolve a dotted path against a value.
///
/// Traversal follows the document dialect's rules: descending into a map
/// selects the named field; descending into an array with a numeric path
/// component selects that element, while a non-numeric component maps the
/// remaining path over every element and yields the synthesized array.
/// Returns `None` when the path does not resolve (the "undefined" case).
pub fn get_dotted(value: &Value, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    get_dotted_parts(value, &parts)
}

/// Resolve a pre-split dotted path against a value.
pub fn get_dotted_parts(value: &Value, parts: &[&str]) -> Option<Value> {
    if parts.is_empty() {
        return Some(value.clone());
    }

    match value {
        Value::Map(map) => {
            let child = map.get(parts[0])?;
            if parts.len() == 1 {
                Some(child.clone())
            } else if let Value::Array(items) = child {
                // Numeric component selects one element; otherwise the rest
                // of the path is applied to every element.
                if let Ok(i) = parts[1].parse::<usize>() {
                    let element = items.get(i)?;
                    get_dotted_parts(element, &parts[2..])
                } else {
                    let mapped: Vec<Value> = items
                        .iter()
                        .map(|el| get_dotted_parts(el, &parts[1..]).unwrap_or(Value::Null))
                        .collect();
                    Some(Value::Array(mapped))
                }
            } else {
                get_dotted_parts(child, &parts[1..])
            }
        }
        Value::Array(items) => {
            if let Ok(i) = parts[0].parse::<usize>() {
                let element = items.get(i)?;
                get_dotted_parts(element, &parts[1..])
            } else {
                let mapped: Vec<Value> = items
                    .iter()
                    .map(|el| get_dotted_parts(el, parts).unwrap_or(Value::Null))
                    .collect();
                Some(Value::Array(mapped))
            }
        }
        _ => None,
    }
}
