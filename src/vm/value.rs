//! Runtime values crossing the sandbox boundary
//!
//! Contract storage, method arguments and return values all use this small
//! value domain. The JSON forms match the canonical serialization used for
//! content hashing: unsigned integers carry the explicit bigint tag so they
//! survive a generic JSON encoding without precision loss.

use crate::crypto::Amount;
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Uint(Amount),
    Str(String),
}

impl Value {
    /// Runtime type name, used to type interface attributes.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Uint(_) => "uint",
            Value::Str(_) => "string",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Uint(a) => !a.is_zero(),
            Value::Str(s) => !s.is_empty(),
        }
    }

    pub fn as_uint(&self) -> Result<Amount> {
        match self {
            Value::Uint(a) => Ok(*a),
            other => Err(ChainError::Execution(format!(
                "expected uint, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(ChainError::Execution(format!(
                "expected string, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Uint(a) => {
                // Reuse the tagged bigint form so storage and account
                // hashing agree on one encoding.
                serde_json::to_value(a).unwrap_or(serde_json::Value::Null)
            }
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Value> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
            serde_json::Value::Object(_) => {
                let amount: Amount = serde_json::from_value(json.clone())?;
                Ok(Value::Uint(amount))
            }
            other => Err(ChainError::SerializationError(format!(
                "unsupported storage value: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Uint(a) => write!(f, "{}", a),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(&json).map_err(serde::de::Error::custom)
    }
}
