//! Method-specific override adapters.
//!
//! # Design
//! An override replaces the whole generic pipeline for one
//! `(method, from, to)` tuple. Overrides are a closed set of named variants
//! so a registry dump says exactly what each one does. Arbitrary logic is
//! still possible through [`CustomAdapter::Function`], but only behind a
//! plain function pointer with a fixed signature.

use std::fmt;

use serde_json::Value;

use crate::error::AdaptationFault;
use crate::types::{Direction, Payload};

/// Signature of a function-backed override. Errors are reported as text and
/// wrapped into an `AdaptationFault::Custom` by the caller.
pub type AdapterFn = fn(Direction, &Payload) -> Result<Payload, String>;

#[derive(Clone)]
pub enum CustomAdapter {
    /// Copy the payload unchanged, skipping renames, types and defaults.
    Passthrough,
    /// Requests pass through; responses have the object under `field`
    /// lifted to the top level next to the remaining keys.
    UnwrapResponse { field: String },
    /// Requests are nested under `field`; responses pass through.
    WrapRequest { field: String },
    /// Anything else.
    Function { name: String, apply: AdapterFn },
}

impl CustomAdapter {
    pub fn unwrap_response(field: &str) -> Self {
        CustomAdapter::UnwrapResponse {
            field: field.to_string(),
        }
    }

    pub fn wrap_request(field: &str) -> Self {
        CustomAdapter::WrapRequest {
            field: field.to_string(),
        }
    }

    pub fn function(name: &str, apply: AdapterFn) -> Self {
        CustomAdapter::Function {
            name: name.to_string(),
            apply,
        }
    }

    pub fn name(&self) -> String {
        match self {
            CustomAdapter::Passthrough => "passthrough".to_string(),
            CustomAdapter::UnwrapResponse { field } => format!("unwrap_response({field})"),
            CustomAdapter::WrapRequest { field } => format!("wrap_request({field})"),
            CustomAdapter::Function { name, .. } => format!("fn({name})"),
        }
    }

    pub fn apply(&self, direction: Direction, payload: &Payload) -> Result<Payload, AdaptationFault> {
        let fail = |reason: String| AdaptationFault::Custom {
            adapter: self.name(),
            reason,
        };
        match (self, direction) {
            (CustomAdapter::Passthrough, _)
            | (CustomAdapter::UnwrapResponse { .. }, Direction::Request)
            | (CustomAdapter::WrapRequest { .. }, Direction::Response) => Ok(payload.clone()),
            (CustomAdapter::UnwrapResponse { field }, Direction::Response) => {
                let inner = match payload.get(field) {
                    Some(Value::Object(inner)) => inner,
                    Some(_) => return Err(fail(format!("`{field}` is not an object"))),
                    None => return Err(fail(format!("`{field}` is missing"))),
                };
                let mut out: Payload = payload
                    .iter()
                    .filter(|(k, _)| *k != field)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (k, v) in inner {
                    if out.contains_key(k) {
                        return Err(fail(format!("`{k}` exists both inside and outside `{field}`")));
                    }
                    out.insert(k.clone(), v.clone());
                }
                Ok(out)
            }
            (CustomAdapter::WrapRequest { field }, Direction::Request) => {
                let mut out = Payload::new();
                out.insert(field.clone(), Value::Object(payload.clone()));
                Ok(out)
            }
            (CustomAdapter::Function { apply, .. }, _) => apply(direction, payload).map_err(fail),
        }
    }
}

impl fmt::Debug for CustomAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
