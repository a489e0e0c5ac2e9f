//! Request and response translation between API generations.
//!
//! # Design
//! Both directions run the same pipeline:
//!
//! 1. reject `auto` and malformed method names (`InvalidArgument`);
//! 2. consult the compatibility matrix and fail fast on a forbidden bridge;
//! 3. if an override is registered for `(method, from, to)`, return its
//!    output and skip everything else;
//! 4. otherwise rename fields, convert types, then fill defaults.
//!
//! A fault in any step surfaces as `BridgeError::Adaptation` carrying the
//! cause; no step returns partially translated data.

use std::collections::{BTreeMap, HashMap};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::convert::{coerce_loose, convert};
use crate::custom::CustomAdapter;
use crate::error::{AdaptationFault, BridgeError, Result};
use crate::tables::SchemaTables;
use crate::types::{ApiGeneration, Direction, Payload};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MethodStats {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdaptationStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Translations answered by an override adapter.
    pub custom: u64,
    pub per_method: BTreeMap<String, MethodStats>,
}

type CustomKey = (String, ApiGeneration, ApiGeneration);

pub struct SchemaAdapter {
    tables: SchemaTables,
    custom: RwLock<HashMap<CustomKey, CustomAdapter>>,
    stats: Mutex<AdaptationStats>,
}

impl Default for SchemaAdapter {
    fn default() -> Self {
        Self::new(SchemaTables::builtin())
    }
}

impl SchemaAdapter {
    pub fn new(tables: SchemaTables) -> Self {
        Self {
            tables,
            custom: RwLock::new(HashMap::new()),
            stats: Mutex::new(AdaptationStats::default()),
        }
    }

    pub fn tables(&self) -> &SchemaTables {
        &self.tables
    }

    /// Translate logical or wire request parameters from `from` to `to`.
    pub fn adapt_request(&self, params: &Payload, from: ApiGeneration, to: ApiGeneration, method: &str) -> Result<Payload> {
        self.adapt(params, from, to, method, Direction::Request)
    }

    /// Translate a response payload from `from` to `to`.
    pub fn adapt_response(&self, payload: &Payload, from: ApiGeneration, to: ApiGeneration, method: &str) -> Result<Payload> {
        self.adapt(payload, from, to, method, Direction::Response)
    }

    /// Later registrations for the same key replace earlier ones.
    pub fn register_custom_adapter(&self, method: &str, from: ApiGeneration, to: ApiGeneration, adapter: CustomAdapter) -> Result<()> {
        validate_method(method)?;
        let key = (method.to_string(), from.concrete()?, to.concrete()?);
        debug!(method, %from, %to, adapter = %adapter.name(), "registering custom adapter");
        if let Some(previous) = self.custom.write().insert(key, adapter) {
            debug!(method, previous = %previous.name(), "custom adapter replaced");
        }
        Ok(())
    }

    /// Names of the registered overrides, for auditing.
    pub fn custom_adapters(&self) -> Vec<(String, ApiGeneration, ApiGeneration, String)> {
        let mut out: Vec<_> = self
            .custom
            .read()
            .iter()
            .map(|((method, from, to), adapter)| (method.clone(), *from, *to, adapter.name()))
            .collect();
        out.sort();
        out
    }

    pub fn is_compatible(&self, from: ApiGeneration, to: ApiGeneration, method: &str) -> bool {
        self.tables.is_compatible(from, to, method)
    }

    pub fn stats(&self) -> AdaptationStats {
        self.stats.lock().clone()
    }

    fn adapt(
        &self,
        input: &Payload,
        from: ApiGeneration,
        to: ApiGeneration,
        method: &str,
        direction: Direction,
    ) -> Result<Payload> {
        validate_method(method)?;
        let from = from.concrete()?;
        let to = to.concrete()?;

        let outcome = self.translate(input, from, to, method, direction);

        let mut guard = self.stats.lock();
        let stats = &mut *guard;
        stats.total += 1;
        let per_method = stats.per_method.entry(method.to_string()).or_default();
        per_method.attempted += 1;
        match &outcome {
            Ok((_, via_custom)) => {
                per_method.succeeded += 1;
                stats.succeeded += 1;
                if *via_custom {
                    stats.custom += 1;
                }
            }
            Err(_) => {
                per_method.failed += 1;
                stats.failed += 1;
            }
        }
        drop(guard);

        outcome.map(|(payload, _)| payload)
    }

    /// Returns the translated payload and whether an override produced it.
    fn translate(
        &self,
        input: &Payload,
        from: ApiGeneration,
        to: ApiGeneration,
        method: &str,
        direction: Direction,
    ) -> Result<(Payload, bool)> {
        if !self.tables.is_compatible(from, to, method) {
            return Err(BridgeError::UnsupportedTranslation {
                method: method.to_string(),
                from,
                to,
            });
        }

        let custom = self.custom.read().get(&(method.to_string(), from, to)).cloned();
        if let Some(adapter) = custom {
            debug!(method, %direction, adapter = %adapter.name(), "custom adapter translation");
            let out = adapter
                .apply(direction, input)
                .map_err(|fault| BridgeError::adaptation(method, fault))?;
            return Ok((out, true));
        }

        let renamed = self.rename(input, from, to, method, direction)?;
        let typed = self.convert_types(renamed, to, method, direction)?;
        Ok((self.fill_defaults(typed, to, method, direction), false))
    }

    fn rename(
        &self,
        input: &Payload,
        from: ApiGeneration,
        to: ApiGeneration,
        method: &str,
        direction: Direction,
    ) -> Result<Payload> {
        let renames = self.tables.mapping(from, to, method, direction);
        let mut out = Payload::new();
        for (key, value) in input {
            let target = renames
                .iter()
                .find(|(src, _)| src == key)
                .map(|(_, dst)| dst)
                .unwrap_or(key);
            if out.contains_key(target) {
                return Err(BridgeError::adaptation(
                    method,
                    AdaptationFault::Collision {
                        from: key.clone(),
                        to: target.clone(),
                    },
                ));
            }
            out.insert(target.clone(), value.clone());
        }
        Ok(out)
    }

    fn convert_types(&self, input: Payload, to: ApiGeneration, method: &str, direction: Direction) -> Result<Payload> {
        let declared = self.tables.field_types(to, method, direction);
        let mut out = Payload::new();
        for (key, value) in input {
            let value = match declared.and_then(|types| types.get(&key)) {
                Some(target) => convert(&key, value, *target).map_err(|fault| BridgeError::adaptation(method, fault))?,
                None => coerce_loose(value),
            };
            out.insert(key, value);
        }
        Ok(out)
    }

    fn fill_defaults(&self, mut payload: Payload, to: ApiGeneration, method: &str, direction: Direction) -> Payload {
        if let Some(defaults) = self.tables.defaults(to, method, direction) {
            for (key, value) in defaults {
                let missing = payload.get(key).map_or(true, Value::is_null);
                if missing {
                    payload.insert(key.clone(), value.clone());
                }
            }
        }
        payload
    }
}

/// Dotted identifiers like `user.get` or `message.corp_conversation.send`.
pub(crate) fn validate_method(method: &str) -> Result<()> {
    let valid = !method.is_empty()
        && method.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(BridgeError::InvalidArgument(format!("malformed method name `{method}`")))
    }
}
