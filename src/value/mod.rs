//! 订阅值模型
//!
//! 后端把监听到的原始字节先尝试按 JSON 解码，失败时退回原始字符串，
//! 统一以 [`Value`] 投递给 [`ValueSetter`]。

pub mod setter;
pub mod sync;

pub use setter::{ValueSetter, ValueSetterFn, Valuer};
pub use sync::{SyncAtomicValue, SyncInt64Value, SyncUInt64Value, SyncValue};

use crate::error::{RegistryError, Result};
use std::fmt;

/// 投递给订阅方的值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    /// 数组或对象
    Structured(serde_json::Value),
}

impl Value {
    /// 解码原始载荷：先尝试 JSON，失败时退回原始字符串，永不返回错误
    pub fn decode(raw: &[u8]) -> Self {
        match serde_json::from_slice::<serde_json::Value>(raw) {
            Ok(json) => json.into(),
            Err(_) => Value::String(String::from_utf8_lossy(raw).into_owned()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Structured(_) => "structured",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Structured(v) => v.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            other => Value::Structured(other),
        }
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

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// 从 [`Value`] 转换为具体类型
///
/// 持有型订阅方（[`SyncValue`] 等）用它把投递值强制转换为自身类型
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn conversion_error<T>(value: &Value, to: &'static str) -> Result<T> {
    Err(RegistryError::Conversion {
        from: value.type_name(),
        to,
    })
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "y" | "on" => Some(true),
        "" | "0" | "f" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.to_json())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
            Value::String(s) => parse_bool(s).map_or_else(|| conversion_error(value, "bool"), Ok),
            Value::Structured(_) => conversion_error(value, "bool"),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(0.0),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => n.as_f64().map_or_else(|| conversion_error(value, "f64"), Ok),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .or_else(|_| conversion_error(value, "f64")),
            Value::Structured(_) => conversion_error(value, "f64"),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(i);
                }
                match n.as_f64() {
                    Some(f) if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                        Ok(f.trunc() as i64)
                    }
                    _ => conversion_error(value, "i64"),
                }
            }
            Value::String(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    return Ok(i);
                }
                i64::from_value(&Value::from(
                    s.parse::<f64>().or_else(|_| conversion_error(value, "i64"))?,
                ))
            }
            Value::Null => Ok(0),
            Value::Bool(b) => Ok(*b as i64),
            Value::Structured(_) => conversion_error(value, "i64"),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    return Ok(u);
                }
                match n.as_f64() {
                    Some(f) if f.is_finite() && f >= 0.0 && f <= u64::MAX as f64 => {
                        Ok(f.trunc() as u64)
                    }
                    _ => conversion_error(value, "u64"),
                }
            }
            Value::String(s) => {
                let s = s.trim();
                if let Ok(u) = s.parse::<u64>() {
                    return Ok(u);
                }
                let parsed = s.parse::<f64>().or_else(|_| conversion_error(value, "u64"))?;
                u64::from_value(&Value::from(parsed)).or_else(|_| conversion_error(value, "u64"))
            }
            Value::Null => Ok(0),
            Value::Bool(b) => Ok(*b as u64),
            Value::Structured(_) => conversion_error(value, "u64"),
        }
    }
}
