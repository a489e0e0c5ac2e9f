//! Inputs to generation detection: the strategy list, the option bag and
//! the host runtime description.
//!
//! # Design
//! `DetectionOptions` is plain data with a canonical serialisation, so its
//! fingerprint (SHA-256 of the normalised JSON form) is stable across calls
//! and processes. Feature sets are `BTreeSet`s to keep ordering out of the
//! fingerprint.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RuntimeVersion;
use crate::error::{BridgeError, Result};
use crate::types::ApiGeneration;

/// One way of deciding which generation should serve a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// The configured preference, unless it is `auto`.
    ExplicitConfig,
    /// Resource creation time against the configured cutoff.
    CreationTimeHeuristic,
    /// Reachability of the current generation; degrades to legacy.
    ConnectivityProbe,
    /// Lowest generation covering the required features.
    FeatureRequirement,
    /// Runtime version and capabilities the current generation needs.
    EnvironmentCompatibility,
}

impl DetectionStrategy {
    pub const DEFAULT_ORDER: [DetectionStrategy; 5] = [
        DetectionStrategy::ExplicitConfig,
        DetectionStrategy::CreationTimeHeuristic,
        DetectionStrategy::ConnectivityProbe,
        DetectionStrategy::FeatureRequirement,
        DetectionStrategy::EnvironmentCompatibility,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DetectionStrategy::ExplicitConfig => "explicit_config",
            DetectionStrategy::CreationTimeHeuristic => "creation_time_heuristic",
            DetectionStrategy::ConnectivityProbe => "connectivity_probe",
            DetectionStrategy::FeatureRequirement => "feature_requirement",
            DetectionStrategy::EnvironmentCompatibility => "environment_compatibility",
        }
    }
}

impl fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the host runtime offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEnvironment {
    pub version: RuntimeVersion,
    pub capabilities: BTreeSet<String>,
}

impl RuntimeEnvironment {
    pub fn new(version: RuntimeVersion, capabilities: &[&str]) -> Self {
        Self {
            version,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// The environment this crate was built for.
    pub fn host() -> Self {
        let version = option_env!("CARGO_PKG_RUST_VERSION")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        Self::new(version, &["tls", "json"])
    }
}

/// The option bag a caller hands to the selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionOptions {
    /// Pinned generation. Bypasses cache and strategies when concrete.
    pub generation: Option<ApiGeneration>,
    /// Strategies to run, in order. `None` means the default order.
    pub strategies: Option<Vec<DetectionStrategy>>,
    /// Creation time of the resource being addressed, if the host knows it.
    pub created_at: Option<DateTime<Utc>>,
    pub required_features: Option<BTreeSet<String>>,
    pub probe_timeout: Option<Duration>,
    /// Overrides the selector's host environment.
    pub environment: Option<RuntimeEnvironment>,
}

impl DetectionOptions {
    pub fn pinned(generation: ApiGeneration) -> Self {
        Self {
            generation: Some(generation),
            ..Self::default()
        }
    }

    pub fn with_strategies(mut self, strategies: &[DetectionStrategy]) -> Self {
        self.strategies = Some(strategies.to_vec());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn require_features(mut self, features: &[&str]) -> Self {
        self.required_features = Some(features.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    pub fn environment(mut self, environment: RuntimeEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// The pinned generation, if it is a concrete one.
    pub fn pinned_generation(&self) -> Option<ApiGeneration> {
        self.generation.filter(|g| g.is_concrete())
    }

    /// The same options with cosmetic differences removed: trimmed feature
    /// names, no empty names, and an `auto` pin treated as no pin.
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        if out.generation == Some(ApiGeneration::Auto) {
            out.generation = None;
        }
        if let Some(features) = &self.required_features {
            out.required_features = Some(
                features
                    .iter()
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect(),
            );
        }
        out
    }

    /// Hex SHA-256 of the normalised options.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(&self.normalized())
            .map_err(|e| BridgeError::InvalidArgument(format!("unfingerprintable options: {e}")))?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_feature_order_and_whitespace() {
        let a = DetectionOptions::default().require_features(&["batchOperations", "advancedSearch"]);
        let b = DetectionOptions::default().require_features(&[" advancedSearch", "batchOperations ", ""]);
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);
    }

    #[test]
    fn fingerprint_distinguishes_inputs() {
        let a = DetectionOptions::default().require_features(&["messageSend"]);
        let b = DetectionOptions::default().require_features(&["messageRecall"]);
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn auto_pin_normalises_to_no_pin() {
        let pinned_auto = DetectionOptions::pinned(ApiGeneration::Auto);
        assert_eq!(pinned_auto.pinned_generation(), None);
        assert_eq!(
            pinned_auto.fingerprint().unwrap(),
            DetectionOptions::default().fingerprint().unwrap()
        );
    }

    #[test]
    fn default_order_starts_with_explicit_config() {
        assert_eq!(DetectionStrategy::DEFAULT_ORDER[0], DetectionStrategy::ExplicitConfig);
        assert_eq!(DetectionStrategy::FeatureRequirement.to_string(), "feature_requirement");
    }
}
