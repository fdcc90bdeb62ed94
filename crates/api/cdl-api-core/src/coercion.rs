//! Coercion helpers between Value kinds.
//!
//! These implement the documented rules applied at arithmetic/boolean
//! operator boundaries. They are total: every value coerces to something,
//! with lossy fallbacks for the degenerate cases.

use crate::Value;

/// Coerce a Value into a real number.
/// Rules:
/// - Real -> its value
/// - Integer -> converted
/// - Bool -> 1.0 / 0.0
/// - Text -> 0.0
/// - List -> first element or 0.0 if empty
pub fn to_real(v: &Value) -> f64 {
    match v {
        Value::Real(f) => *f,
        Value::Integer(i) => *i as f64,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Text(_) => 0.0,
        Value::List(items) => items.first().map(to_real).unwrap_or(0.0),
    }
}

/// Coerce a Value into an integer, truncating reals toward zero.
pub fn to_integer(v: &Value) -> i64 {
    match v {
        Value::Real(f) => f.trunc() as i64,
        Value::Integer(i) => *i,
        Value::Bool(b) => {
            if *b {
                1
            } else {
                0
            }
        }
        Value::Text(_) => 0,
        Value::List(items) => items.first().map(to_integer).unwrap_or(0),
    }
}

/// Coerce a Value into a boolean using truthiness:
/// non-zero numbers, non-empty text, and non-empty lists are true.
pub fn to_bool(v: &Value) -> bool {
    match v {
        Value::Real(f) => *f != 0.0,
        Value::Integer(i) => *i != 0,
        Value::Bool(b) => *b,
        Value::Text(s) => !s.is_empty(),
        Value::List(items) => !items.is_empty(),
    }
}

/// Render a Value as text.
pub fn to_text(v: &Value) -> String {
    match v {
        Value::Real(f) => f.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Text(s) => s.clone(),
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(to_text).collect();
            format!("[{}]", parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercions() {
        assert_eq!(to_real(&Value::Integer(3)), 3.0);
        assert_eq!(to_integer(&Value::Real(2.9)), 2);
        assert_eq!(to_real(&Value::Bool(true)), 1.0);
    }

    #[test]
    fn truthiness() {
        assert!(to_bool(&Value::Real(0.5)));
        assert!(!to_bool(&Value::Integer(0)));
        assert!(!to_bool(&Value::Text(String::new())));
        assert!(to_bool(&Value::Text("x".into())));
    }
}
