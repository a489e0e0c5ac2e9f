//! Which generation supports which capability.
//!
//! # Design
//! The catalog is built once and only grows through [`FeatureCatalog::add_feature`],
//! which refuses any entry that would make the legacy generation support
//! something the current generation does not. Lookups on `Auto` are
//! rejected rather than answered.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{BridgeError, Result};
use crate::types::ApiGeneration;

/// Features both generations expose.
const SHARED_FEATURES: &[&str] = &[
    "userManagement",
    "departmentManagement",
    "messageSend",
    "mediaUpload",
    "attendance",
];

/// Features only the current generation exposes.
const CURRENT_ONLY_FEATURES: &[&str] = &[
    "advancedSearch",
    "batchOperations",
    "messageRecall",
    "webhookEvents",
    "fieldSelection",
];

#[derive(Debug, Clone)]
pub struct FeatureCatalog {
    entries: BTreeMap<String, BTreeSet<ApiGeneration>>,
}

impl Default for FeatureCatalog {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        for name in SHARED_FEATURES {
            entries.insert(
                name.to_string(),
                ApiGeneration::CONCRETE.into_iter().collect(),
            );
        }
        for name in CURRENT_ONLY_FEATURES {
            entries.insert(name.to_string(), [ApiGeneration::Current].into_iter().collect());
        }
        Self { entries }
    }
}

impl FeatureCatalog {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register (or widen) a feature. Any set naming `legacy` must also name
    /// `current`, and `auto` is never a valid member.
    pub fn add_feature(&mut self, name: &str, generations: &[ApiGeneration]) -> Result<()> {
        if name.trim().is_empty() {
            return Err(BridgeError::InvalidArgument("feature name is empty".to_string()));
        }
        let mut set = BTreeSet::new();
        for generation in generations {
            set.insert(generation.concrete()?);
        }
        if let Some(existing) = self.entries.get(name) {
            set.extend(existing.iter().copied());
        }
        if set.contains(&ApiGeneration::Legacy) && !set.contains(&ApiGeneration::Current) {
            return Err(BridgeError::InvalidArgument(format!(
                "feature `{name}` cannot be legacy-only: current must support every legacy feature"
            )));
        }
        self.entries.insert(name.to_string(), set);
        Ok(())
    }

    pub fn supports(&self, feature: &str, generation: ApiGeneration) -> Result<bool> {
        let generation = generation.concrete()?;
        Ok(self
            .entries
            .get(feature)
            .is_some_and(|gens| gens.contains(&generation)))
    }

    /// Feature names supported by `generation`, sorted.
    pub fn features_for(&self, generation: ApiGeneration) -> Result<Vec<String>> {
        let generation = generation.concrete()?;
        Ok(self
            .entries
            .iter()
            .filter(|(_, gens)| gens.contains(&generation))
            .map(|(name, _)| name.clone())
            .collect())
    }

    /// Whether every feature in `required` is available on `generation`.
    pub fn satisfies<'a, I>(&self, generation: ApiGeneration, required: I) -> Result<bool>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for feature in required {
            if !self.supports(feature, generation)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Features known to the catalog that `generation` lacks.
    pub fn gaps(&self, generation: ApiGeneration) -> Result<Vec<String>> {
        let generation = generation.concrete()?;
        Ok(self
            .entries
            .iter()
            .filter(|(_, gens)| !gens.contains(&generation))
            .map(|(name, _)| name.clone())
            .collect())
    }
}
