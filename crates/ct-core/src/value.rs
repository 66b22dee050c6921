//! JSON value ordering shared by filters, sorting and the index.
//!
//! Numbers compare numerically (exactly when both fit `i64`), strings
//! lexicographically, booleans `false < true`. Any other pairing is
//! incomparable and never satisfies a predicate.

use serde_json::{Number, Value};
use std::cmp::Ordering;

pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return Some(a.cmp(&b));
    }
    x.as_f64()?.partial_cmp(&y.as_f64()?)
}

pub fn equals(a: &Value, b: &Value) -> bool {
    compare(a, b) == Some(Ordering::Equal)
}

/// Applies `pred` to a scalar, or to each element of an array value.
/// Multi-valued fields match when any element does.
pub fn any_scalar(value: &Value, pred: impl Fn(&Value) -> bool) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| !item.is_array() && pred(item)),
        other => pred(other),
    }
}

/// Total order used for sorting: incomparable pairs fall back to a type rank
/// so the comparator stays consistent.
pub fn sort_compare(a: &Value, b: &Value) -> Ordering {
    compare(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_and_float_compare_numerically() {
        assert_eq!(compare(&json!(48), &json!(47.5)), Some(Ordering::Greater));
        assert!(equals(&json!(1), &json!(1.0)));
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let a = json!(1_397_658_118_003_i64);
        let b = json!(1_397_658_118_004_i64);
        assert_eq!(compare(&a, &b), Some(Ordering::Less));
    }

    #[test]
    fn test_mixed_types_are_incomparable() {
        assert_eq!(compare(&json!("48"), &json!(48)), None);
        assert!(!equals(&json!(true), &json!(1)));
    }

    #[test]
    fn test_any_scalar_checks_array_elements() {
        let tags = json!(["red", "blue"]);
        assert!(any_scalar(&tags, |v| equals(v, &json!("blue"))));
        assert!(!any_scalar(&tags, |v| equals(v, &json!("green"))));
    }
}
