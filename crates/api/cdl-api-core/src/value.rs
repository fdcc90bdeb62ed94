//! Value: runtime instances of the CDL scalar types.
//!
//! Connector values are one of the four scalar kinds (`Real`, `Integer`,
//! `Bool`, `Text`). `List` exists for expression intermediates (`sum`,
//! `len`, `range` and friends); no connector type maps to it, so a list
//! can never cross a connection.

use serde::{Deserialize, Serialize};

/// Lightweight kind enum for pattern-matching and quick dispatch without
/// cloning the payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Real,
    Integer,
    Bool,
    Text,
    List,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    /// Boolean (true/false)
    Bool(bool),

    /// Integer. Must precede `Real` so untagged JSON integers stay integral.
    Integer(i64),

    /// Scalar real number
    Real(f64),

    /// Text / string
    Text(String),

    /// Variable-length list; expression-internal only
    List(Vec<Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Real(0.0)
    }
}

impl Value {
    /// Return the coarse kind of this value.
    #[inline]
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Real(_) => ValueKind::Real,
            Value::Integer(_) => ValueKind::Integer,
            Value::Bool(_) => ValueKind::Bool,
            Value::Text(_) => ValueKind::Text,
            Value::List(_) => ValueKind::List,
        }
    }

    /// Whether this value is numeric (`Real` or `Integer`).
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Real(_) | Value::Integer(_))
    }

    /// Convenience constructors
    pub fn real(v: f64) -> Self {
        Value::Real(v)
    }

    pub fn integer(v: i64) -> Self {
        Value::Integer(v)
    }

    pub fn text(v: impl Into<String>) -> Self {
        Value::Text(v.into())
    }
}
