// Log Record Value Model
//
// The value type stored in durable logs. Close to JSON but with explicit
// bytes and timestamp variants, and encodable to a compact binary form for
// the on-disk record format.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::error::{DomainError, Result};

/// A value that can be stored in a durable log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum LogValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Wall-clock instant, epoch ms.
    Time(i64),
    List(Vec<LogValue>),
    Map(BTreeMap<String, LogValue>),
}

impl LogValue {
    /// Convert a JSON value into a log value.
    ///
    /// Rejects anything the record encoding cannot represent faithfully
    /// (currently: integers above `i64::MAX`). Callers do this before any
    /// file is opened, so a bad value never leaves a partial write behind.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Null => Ok(LogValue::Null),
            serde_json::Value::Bool(b) => Ok(LogValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(LogValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    if f.is_finite() {
                        Ok(LogValue::Float(f))
                    } else {
                        Err(DomainError::UnsupportedValue(format!(
                            "non-finite number: {n}"
                        )))
                    }
                } else {
                    Err(DomainError::UnsupportedValue(format!(
                        "integer out of range: {n}"
                    )))
                }
            }
            serde_json::Value::String(s) => Ok(LogValue::Str(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(LogValue::from_json)
                .collect::<Result<Vec<_>>>()
                .map(LogValue::List),
            serde_json::Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), LogValue::from_json(v)?);
                }
                Ok(LogValue::Map(out))
            }
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, LogValue>> {
        match self {
            LogValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<BTreeMap<String, LogValue>> {
        match self {
            LogValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LogValue::Float(f) => Some(*f),
            LogValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LogValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for LogValue {
    fn from(s: &str) -> Self {
        LogValue::Str(s.to_string())
    }
}

impl From<String> for LogValue {
    fn from(s: String) -> Self {
        LogValue::Str(s)
    }
}

impl From<f64> for LogValue {
    fn from(f: f64) -> Self {
        LogValue::Float(f)
    }
}

impl From<i64> for LogValue {
    fn from(i: i64) -> Self {
        LogValue::Int(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_nested() {
        let v = json!({"scores": {"q1": 0.5}, "names": ["q1", "q2"], "n": 3});
        let lv = LogValue::from_json(&v).unwrap();

        let map = lv.as_map().unwrap();
        let scores = map.get("scores").unwrap().as_map().unwrap();
        assert_eq!(scores.get("q1").unwrap().as_f64(), Some(0.5));
        assert_eq!(map.get("n"), Some(&LogValue::Int(3)));
    }

    #[test]
    fn test_from_json_rejects_huge_integer() {
        let v = json!(u64::MAX);
        let err = LogValue::from_json(&v).unwrap_err();
        assert!(matches!(err, DomainError::UnsupportedValue(_)));
    }

    #[test]
    fn test_int_readable_as_f64() {
        assert_eq!(LogValue::Int(2).as_f64(), Some(2.0));
    }
}
