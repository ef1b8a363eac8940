//! Total ordering over document values.
//!
//! Cross-type rank: `undefined < null < number < string < boolean < date <
//! array < map`. The "undefined" rank belongs to the `None` arm of an
//! `Option<Value>` key slot; it never appears inside a document. Within a
//! type, numbers and dates compare numerically, strings through the
//! datastore's configured comparator, arrays lexicographically (shorter is
//! smaller on a common prefix) and maps by sorted-key element-wise
//! comparison, then by key count.

use crate::value::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Pluggable string comparison function.
pub type StringCmp = Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

/// Rank of a value in the cross-type order. Rank 0 is reserved for the
/// undefined slot.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Bool(_) => 4,
        Value::Date(_) => 5,
        Value::Array(_) => 6,
        Value::Map(_) => 7,
    }
}

/// Compares document values, with an optionally customized string order.
#[derive(Clone, Default)]
pub struct ValueComparator {
    string_cmp: Option<StringCmp>,
}

impl ValueComparator {
    /// Create a comparator using the default lexicographic string order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a comparator with a custom string comparison function.
    pub fn with_string_cmp(string_cmp: StringCmp) -> Self {
        Self {
            string_cmp: Some(string_cmp),
        }
    }

    fn compare_strings(&self, a: &str, b: &str) -> Ordering {
        match &self.string_cmp {
            Some(cmp) => cmp(a, b),
            None => a.cmp(b),
        }
    }

    /// Compare two values in the total order.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let rank_a = type_rank(a);
        let rank_b = type_rank(b);
        if rank_a != rank_b {
            return rank_a.cmp(&rank_b);
        }

        match (a, b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Number(x), Value::Number(y)) => x.cmp(y),
            (Value::String(x), Value::String(y)) => self.compare_strings(x, y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Date(x), Value::Date(y)) => x.cmp(y),
            (Value::Array(x), Value::Array(y)) => {
                for (ax, bx) in x.iter().zip(y.iter()) {
                    let ord = self.compare(ax, bx);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                x.len().cmp(&y.len())
            }
            (Value::Map(x), Value::Map(y)) => {
                for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                    let key_ord = self.compare_strings(ka, kb);
                    if key_ord != Ordering::Equal {
                        return key_ord;
                    }
                    let val_ord = self.compare(va, vb);
                    if val_ord != Ordering::Equal {
                        return val_ord;
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => Ordering::Equal,
        }
    }

    /// Compare two key slots, where `None` is the undefined sentinel and
    /// sorts before every defined value.
    pub fn compare_opt(&self, a: Option<&Value>, b: Option<&Value>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => self.compare(x, y),
        }
    }

    /// Compare two compound key vectors component-wise, returning at the
    /// first non-zero comparison.
    pub fn compare_keys(&self, a: &[Option<Value>], b: &[Option<Value>]) -> Ordering {
        for (ax, bx) in a.iter().zip(b.iter()) {
            let ord = self.compare_opt(ax.as_ref(), bx.as_ref());
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.len().cmp(&b.len())
    }
}

impl std::fmt::Debug for ValueComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueComparator")
            .field("custom_strings", &self.string_cmp.is_some())
            .finish()
    }
}
