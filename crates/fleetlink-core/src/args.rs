//! Typed access to the dynamic command body
//!
//! Fleet command bodies arrive as free-form JSON objects. [`CommandArgs`]
//! wraps one and applies the coercion rules the Fleet surface expects:
//! integers accept floats whose truncation equals them, and numeric strings
//! are accepted wherever the underlying verb demands a number.

use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};

/// Borrowed view over a command body
#[derive(Debug, Clone, Copy)]
pub struct CommandArgs<'a>(pub &'a Map<String, Value>);

impl<'a> CommandArgs<'a> {
    fn missing(key: &str) -> BridgeError {
        BridgeError::Validation(format!("missing '{key}' in request body"))
    }

    fn expected(key: &str, kind: &str) -> BridgeError {
        BridgeError::Validation(format!("expected '{key}' to be {kind}"))
    }

    /// Required string value
    pub fn require_str(&self, key: &str) -> Result<&'a str> {
        match self.0.get(key) {
            None => Err(Self::missing(key)),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(Self::expected(key, "a string")),
        }
    }

    /// Optional string value
    pub fn opt_str(&self, key: &str) -> Option<&'a str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Required boolean value; string forms of `true`/`false` are accepted
    pub fn require_bool(&self, key: &str) -> Result<bool> {
        match self.0.get(key) {
            None => Err(Self::missing(key)),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => s
                .parse::<bool>()
                .map_err(|_| Self::expected(key, "a boolean")),
            Some(_) => Err(Self::expected(key, "a boolean")),
        }
    }

    /// Optional boolean value with a default
    pub fn opt_bool(&self, key: &str, default: bool) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Required integer value.
    ///
    /// Accepts integers, floats whose truncation equals them (within i32
    /// bounds), and numeric strings.
    pub fn require_i64(&self, key: &str) -> Result<i64> {
        match self.0.get(key) {
            None => Err(Self::missing(key)),
            Some(value) => Self::coerce_i64(key, value),
        }
    }

    /// Optional integer value with a default
    pub fn opt_i64(&self, key: &str, default: i64) -> i64 {
        match self.0.get(key) {
            Some(value) => Self::coerce_i64(key, value).unwrap_or(default),
            None => default,
        }
    }

    /// Required floating-point value; integers and numeric strings coerce
    pub fn require_f64(&self, key: &str) -> Result<f64> {
        match self.0.get(key) {
            None => Err(Self::missing(key)),
            Some(value) => Self::coerce_f64(key, value),
        }
    }

    /// Optional floating-point value with a default
    pub fn opt_f64(&self, key: &str, default: f64) -> f64 {
        match self.0.get(key) {
            Some(value) => Self::coerce_f64(key, value).unwrap_or(default),
            None => default,
        }
    }

    /// Optional floating-point value that must be numeric when present
    pub fn opt_f64_checked(&self, key: &str) -> Result<Option<f64>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(value) => Self::coerce_f64(key, value).map(Some),
        }
    }

    fn coerce_i64(key: &str, value: &Value) -> Result<i64> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(i);
                }
                if let Some(f) = n.as_f64() {
                    if f.is_nan() || f != f.trunc() || f < i32::MIN as f64 || f > i32::MAX as f64 {
                        return Err(Self::expected(key, "an integer"));
                    }
                    return Ok(f as i64);
                }
                Err(Self::expected(key, "an integer"))
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| Self::expected(key, "an integer")),
            _ => Err(Self::expected(key, "an integer")),
        }
    }

    fn coerce_f64(key: &str, value: &Value) -> Result<f64> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| Self::expected(key, "a number")),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| Self::expected(key, "a number")),
            _ => Err(Self::expected(key, "a number")),
        }
    }
}
