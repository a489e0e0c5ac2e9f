//! Configuration for the compatibility core.
//!
//! `Settings` is the read-only, dotted-path view of whatever configuration
//! the host loaded (TOML file, JSON blob, environment). `BridgeConfig` is the
//! typed projection the selector and call adapters consume; every field has
//! a default so an empty `Settings` yields a working configuration.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::types::ApiGeneration;

pub const DEFAULT_LEGACY_BASE_URL: &str = "https://oapi.dingtalk.com";
pub const DEFAULT_CURRENT_BASE_URL: &str = "https://api.dingtalk.com";

/// Read-only key lookup with dotted-path nesting.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    root: Value,
}

impl Settings {
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let parsed: toml::Value = toml::from_str(raw)
            .map_err(|e| BridgeError::Configuration(format!("invalid TOML: {e}")))?;
        let root = serde_json::to_value(parsed)
            .map_err(|e| BridgeError::Configuration(format!("unrepresentable TOML: {e}")))?;
        Ok(Self { root })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Configuration(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Overlay variables named `{prefix}__SECTION__KEY` onto `section.key`.
    ///
    /// Values that parse as JSON scalars (numbers, booleans) keep their type;
    /// everything else is stored as a string.
    pub fn with_env_overrides<I>(mut self, prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let marker = format!("{prefix}__");
        for (name, raw) in vars {
            let Some(rest) = name.strip_prefix(&marker) else {
                continue;
            };
            let segments: Vec<String> = rest
                .split("__")
                .filter(|s| !s.is_empty())
                .map(|s| s.to_ascii_lowercase())
                .collect();
            if segments.is_empty() {
                continue;
            }
            let value = match serde_json::from_str::<Value>(&raw) {
                Ok(v @ (Value::Bool(_) | Value::Number(_))) => v,
                _ => Value::String(raw),
            };
            tracing::debug!(key = %segments.join("."), "configuration override from environment");
            set_path(&mut self.root, &segments, value);
        }
        self
    }

    /// Same as [`with_env_overrides`](Self::with_env_overrides) over the
    /// process environment.
    pub fn with_process_env(self, prefix: &str) -> Self {
        self.with_env_overrides(prefix, std::env::vars())
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.root, |node, key| node.as_object()?.get(key))
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_str_or(&self, path: &str, default: &str) -> String {
        self.get_str(path).unwrap_or(default).to_string()
    }

    pub fn get_u64_or(&self, path: &str, default: u64) -> u64 {
        match self.get(path) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_bool_or(&self, path: &str, default: bool) -> bool {
        match self.get(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// A list of strings; a single comma-separated string is also accepted.
    pub fn get_str_list(&self, path: &str) -> Vec<String> {
        match self.get(path) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn set_path(root: &mut Value, segments: &[String], value: Value) {
    let mut node = root;
    for key in &segments[..segments.len() - 1] {
        if !node.is_object() {
            *node = Value::Object(serde_json::Map::new());
        }
        let Value::Object(map) = node else { return };
        node = map
            .entry(key.clone())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(serde_json::Map::new());
    }
    if let (Value::Object(map), Some(last)) = (node, segments.last()) {
        map.insert(last.clone(), value);
    }
}

/// `major.minor.patch` runtime version; missing components read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl RuntimeVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl FromStr for RuntimeVersion {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().trim_start_matches('v').split('.');
        let mut next = |name: &str| -> Result<u32> {
            match parts.next() {
                None | Some("") => Ok(0),
                Some(p) => p.parse().map_err(|_| {
                    BridgeError::InvalidArgument(format!("bad {name} component in version `{s}`"))
                }),
            }
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        Ok(Self { major, minor, patch })
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub base_url: String,
    pub timeout: Duration,
}

/// Prerequisites a host must meet to talk to the current generation.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentRequirements {
    pub min_runtime_version: RuntimeVersion,
    pub required_capabilities: BTreeSet<String>,
}

impl Default for EnvironmentRequirements {
    fn default() -> Self {
        Self {
            min_runtime_version: RuntimeVersion::new(1, 70, 0),
            required_capabilities: ["tls".to_string()].into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Preference read by the `ExplicitConfig` strategy. `Auto` defers.
    pub generation: ApiGeneration,
    /// Used when every strategy is indeterminate.
    pub fallback_generation: Option<ApiGeneration>,
    /// Resources created on or after this instant belong to the current generation.
    pub creation_cutoff: DateTime<Utc>,
    pub probe_timeout: Duration,
    pub default_retry_after: Duration,
    pub legacy: EndpointConfig,
    pub current: EndpointConfig,
    pub environment: EnvironmentRequirements,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            generation: ApiGeneration::Auto,
            fallback_generation: None,
            creation_cutoff: default_cutoff(),
            probe_timeout: Duration::from_millis(3_000),
            default_retry_after: Duration::from_millis(1_000),
            legacy: EndpointConfig {
                base_url: DEFAULT_LEGACY_BASE_URL.to_string(),
                timeout: Duration::from_millis(10_000),
            },
            current: EndpointConfig {
                base_url: DEFAULT_CURRENT_BASE_URL.to_string(),
                timeout: Duration::from_millis(10_000),
            },
            environment: EnvironmentRequirements::default(),
        }
    }
}

fn default_cutoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl BridgeConfig {
    /// Build from the `bridge.*` section of `settings`, defaulting every
    /// missing key.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let defaults = Self::default();

        let generation = match settings.get_str("bridge.generation") {
            Some(raw) => raw.parse()?,
            None => defaults.generation,
        };
        let fallback_generation = match settings.get_str("bridge.fallback_generation") {
            Some(raw) => Some(raw.parse::<ApiGeneration>()?.concrete()?),
            None => None,
        };
        let creation_cutoff = match settings.get_str("bridge.creation_cutoff") {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|e| BridgeError::Configuration(format!("bridge.creation_cutoff: {e}")))?
                .with_timezone(&Utc),
            None => defaults.creation_cutoff,
        };
        let min_runtime_version = match settings.get_str("bridge.environment.min_runtime_version") {
            Some(raw) => raw.parse()?,
            None => defaults.environment.min_runtime_version,
        };
        let required_capabilities = match settings.get("bridge.environment.required_capabilities") {
            Some(_) => settings
                .get_str_list("bridge.environment.required_capabilities")
                .into_iter()
                .collect(),
            None => defaults.environment.required_capabilities,
        };

        Ok(Self {
            generation,
            fallback_generation,
            creation_cutoff,
            probe_timeout: millis(settings, "bridge.probe_timeout_ms", defaults.probe_timeout),
            default_retry_after: millis(
                settings,
                "bridge.default_retry_after_ms",
                defaults.default_retry_after,
            ),
            legacy: endpoint(settings, "bridge.legacy", &defaults.legacy),
            current: endpoint(settings, "bridge.current", &defaults.current),
            environment: EnvironmentRequirements {
                min_runtime_version,
                required_capabilities,
            },
        })
    }

    /// Endpoint settings for a concrete generation.
    pub fn endpoint(&self, generation: ApiGeneration) -> Result<&EndpointConfig> {
        match generation.concrete()? {
            ApiGeneration::Legacy => Ok(&self.legacy),
            _ => Ok(&self.current),
        }
    }
}

fn millis(settings: &Settings, path: &str, default: Duration) -> Duration {
    Duration::from_millis(settings.get_u64_or(path, default.as_millis() as u64))
}

fn endpoint(settings: &Settings, section: &str, defaults: &EndpointConfig) -> EndpointConfig {
    EndpointConfig {
        base_url: settings
            .get_str_or(&format!("{section}.base_url"), &defaults.base_url)
            .trim_end_matches('/')
            .to_string(),
        timeout: millis(settings, &format!("{section}.timeout_ms"), defaults.timeout),
    }
}
