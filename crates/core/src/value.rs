//! Typed attribute values carried by request contexts and targeting conditions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request context: attribute name -> value. A `BTreeMap` keeps keys sorted,
/// which makes its JSON encoding canonical.
pub type Context = BTreeMap<String, AttributeValue>;

/// A single non-list value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    String(String),
}

/// A context or condition value: a scalar or a flat list of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Scalar>),
}

impl AttributeValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Scalar]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// The scalar form of this value, `None` for lists.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Self::Bool(b) => Some(Scalar::Bool(*b)),
            Self::Number(n) => Some(Scalar::Number(*n)),
            Self::String(s) => Some(Scalar::String(s.clone())),
            Self::List(_) => None,
        }
    }
}

impl Scalar {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Scalar>> for AttributeValue {
    fn from(value: Vec<Scalar>) -> Self {
        Self::List(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Build a [`Context`] from `(name, value)` pairs.
pub fn context<K, V, I>(pairs: I) -> Context
where
    K: Into<String>,
    V: Into<AttributeValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
