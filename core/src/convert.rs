//! Value conversions used by the generic translation pipeline.
//!
//! Two modes exist. A field with a declared target type is converted to that
//! type, and a null becomes the type's zero value. Any other field gets loose
//! coercion: numeric-looking and boolean-looking strings become native
//! numbers and booleans, mirroring the loosely typed wire format.

use std::fmt;

use serde_json::{Number, Value};

use crate::error::AdaptationFault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Int,
    Float,
    Bool,
    List,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::String => "string",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Bool => "bool",
            ValueType::List => "list",
        };
        f.write_str(name)
    }
}

/// Zero value substituted for a null of the given type.
pub fn default_for(target: ValueType) -> Value {
    match target {
        ValueType::String => Value::String(String::new()),
        ValueType::Int => Value::from(0i64),
        ValueType::Float => Value::from(0.0f64),
        ValueType::Bool => Value::Bool(false),
        ValueType::List => Value::Array(Vec::new()),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Convert `value` to `target`, failing rather than losing information.
pub fn convert(field: &str, value: Value, target: ValueType) -> Result<Value, AdaptationFault> {
    let fault = |value: &Value| AdaptationFault::Conversion {
        field: field.to_string(),
        expected: target,
        found: kind(value).to_string(),
    };

    if value.is_null() {
        return Ok(default_for(target));
    }

    match target {
        ValueType::String => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            Value::Array(ref items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => parts.push(s.clone()),
                        Value::Number(n) => parts.push(n.to_string()),
                        Value::Bool(b) => parts.push(b.to_string()),
                        _ => return Err(fault(&value)),
                    }
                }
                Ok(Value::String(parts.join(",")))
            }
            _ => Err(fault(&value)),
        },
        ValueType::Int => match &value {
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Ok(value)
                } else {
                    integral(n.as_f64()).ok_or_else(|| fault(&value))
                }
            }
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return Ok(default_for(target));
                }
                if let Ok(i) = s.parse::<i64>() {
                    return Ok(Value::from(i));
                }
                integral(s.parse::<f64>().ok()).ok_or_else(|| fault(&value))
            }
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            _ => Err(fault(&value)),
        },
        ValueType::Float => {
            let f = match &value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) if s.trim().is_empty() => Some(0.0),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                _ => None,
            };
            f.and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| fault(&value))
        }
        ValueType::Bool => match &value {
            Value::Bool(_) => Ok(value),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "n" | "off" | "" => Ok(Value::Bool(false)),
                _ => Err(fault(&value)),
            },
            _ => Err(fault(&value)),
        },
        ValueType::List => match value {
            Value::Array(_) => Ok(value),
            Value::String(s) => Ok(Value::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| coerce_loose(Value::String(p.to_string())))
                    .collect(),
            )),
            Value::Object(_) => Err(fault(&value)),
            scalar => Ok(Value::Array(vec![scalar])),
        },
    }
}

fn integral(f: Option<f64>) -> Option<Value> {
    let f = f?;
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

/// Turn a numeric- or boolean-looking plain string into a native value.
/// Lists and objects pass through untouched, as do strings with leading
/// zeros (`"007"`).
pub fn coerce_loose(value: Value) -> Value {
    match value {
        Value::String(s) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => numeric(&s).unwrap_or(Value::String(s)),
        },
        other => other,
    }
}

fn numeric(s: &str) -> Option<Value> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if int_part.len() > 1 && int_part.starts_with('0') {
        return None;
    }
    match frac_part {
        None => s.parse::<i64>().ok().map(Value::from),
        Some(f) if !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
        }
        Some(_) => None,
    }
}
