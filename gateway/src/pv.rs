//! Process values: timestamped, typed, status-tagged data points.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Quality tag of a process value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    #[default]
    Good,
    Uncertain,
    Bad,
}

impl Status {
    /// Wire code of the status.
    pub fn code(self) -> i64 {
        match self {
            Status::Good => 0,
            Status::Uncertain => 100,
            Status::Bad => 200,
        }
    }

    /// Status for a wire code: below 100 is good, below 200 uncertain,
    /// anything else (including negative codes) bad.
    pub fn from_code(code: i64) -> Self {
        match code {
            0..=99 => Status::Good,
            100..=199 => Status::Uncertain,
            _ => Status::Bad,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Good => f.write_str("good"),
            Status::Uncertain => f.write_str("uncertain"),
            Status::Bad => f.write_str("bad"),
        }
    }
}

/// Dynamically typed value carried by a process value.
///
/// `Structured` holds arrays and objects accepted by the lenient decoder;
/// it cannot be encoded back into a wire message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Structured(serde_json::Value),
}

impl Value {
    /// Reports whether the value fits the wire scalar set.
    pub fn is_scalar(&self) -> bool {
        match self {
            Value::Float(f) => f.is_finite(),
            Value::Structured(_) => false,
            _ => true,
        }
    }

    /// JSON form of a scalar value, `None` if the value is not a scalar.
    pub fn to_scalar_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::Number(serde_json::Number::from_f64(*f)?),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Structured(_) => return None,
        })
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            other => Value::Structured(other),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Structured(s) => s,
            scalar => scalar.to_scalar_json().unwrap_or(serde_json::Value::Null),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => f.write_str(s),
            Value::Structured(v) => write!(f, "{}", v),
        }
    }
}

/// A timestamped, typed value with a quality tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessValue {
    pub timestamp: DateTime<Utc>,
    pub value: Value,
    pub status: Status,
}

impl ProcessValue {
    /// Good value stamped with the current time.
    pub fn now(value: impl Into<Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            value: value.into(),
            status: Status::Good,
        }
    }

    /// Set the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the timestamp from Unix milliseconds. Out of range values keep
    /// the current timestamp.
    pub fn with_millis(mut self, ms: i64) -> Self {
        if let Some(ts) = Utc.timestamp_millis_opt(ms).single() {
            self.timestamp = ts;
        }
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Timestamp as Unix milliseconds.
    pub fn millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::from_code(0), Status::Good);
        assert_eq!(Status::from_code(99), Status::Good);
        assert_eq!(Status::from_code(100), Status::Uncertain);
        assert_eq!(Status::from_code(199), Status::Uncertain);
        assert_eq!(Status::from_code(200), Status::Bad);
        assert_eq!(Status::from_code(-1), Status::Bad);
        for s in [Status::Good, Status::Uncertain, Status::Bad] {
            assert_eq!(Status::from_code(s.code()), s);
        }
    }

    #[test]
    fn test_value_from_json() {
        assert_eq!(Value::from(serde_json::json!(null)), Value::Null);
        assert_eq!(Value::from(serde_json::json!(true)), Value::Bool(true));
        assert_eq!(Value::from(serde_json::json!(7)), Value::Int(7));
        assert_eq!(Value::from(serde_json::json!(42.5)), Value::Float(42.5));
        assert_eq!(Value::from(serde_json::json!(u64::MAX)), Value::Float(u64::MAX as f64));
        assert_eq!(Value::from(serde_json::json!("on")), Value::String("on".into()));
        assert!(matches!(Value::from(serde_json::json!([1, 2])), Value::Structured(_)));
    }

    #[test]
    fn test_scalar_json() {
        assert_eq!(Value::Float(0.5).to_scalar_json(), Some(serde_json::json!(0.5)));
        assert_eq!(Value::Float(f64::NAN).to_scalar_json(), None);
        assert_eq!(Value::Structured(serde_json::json!({"a": 1})).to_scalar_json(), None);
        assert!(!Value::Float(f64::INFINITY).is_scalar());
        assert!(Value::Null.is_scalar());
    }

    #[test]
    fn test_with_millis() {
        let pv = ProcessValue::now(1i64).with_millis(1_483_228_800_000);
        assert_eq!(pv.millis(), 1_483_228_800_000);
        assert_eq!(pv.timestamp.to_rfc3339(), "2017-01-01T00:00:00+00:00");
    }
}
