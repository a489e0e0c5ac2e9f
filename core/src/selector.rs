//! Per-call generation selection.
//!
//! # Design
//! Strategies form a priority cascade: the first one that answers wins and
//! later ones are never consulted. A concrete pin in the options skips the
//! cascade and the cache entirely. Everything else is memoised by option
//! fingerprint until [`VersionSelector::clear_cache`] is called; there is no
//! expiry at this layer.
//!
//! The cache and counters are owned by the selector instance, so two
//! selectors built for different applications never share results.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::detection::{DetectionOptions, DetectionStrategy, RuntimeEnvironment};
use crate::error::{BridgeError, Result};
use crate::features::FeatureCatalog;
use crate::http::{HttpMethod, HttpRequest, Transport};
use crate::types::ApiGeneration;

/// Counters kept by a [`VersionSelector`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectionStats {
    pub total: u64,
    pub pinned: u64,
    pub cache_hits: u64,
    pub resolved: u64,
    pub fallbacks: u64,
    pub failed: u64,
    /// How often each strategy was evaluated.
    pub strategy_runs: BTreeMap<String, u64>,
    /// How often each strategy produced the answer.
    pub strategy_wins: BTreeMap<String, u64>,
    pub by_generation: BTreeMap<String, u64>,
}

/// Result of [`VersionSelector::describe_compatibility`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilityReport {
    pub generation: ApiGeneration,
    pub compatible: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

pub struct VersionSelector {
    config: BridgeConfig,
    catalog: FeatureCatalog,
    probe: Option<Arc<dyn Transport>>,
    environment: RuntimeEnvironment,
    cache: Mutex<HashMap<String, ApiGeneration>>,
    stats: Mutex<DetectionStats>,
}

impl VersionSelector {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            catalog: FeatureCatalog::default(),
            probe: None,
            environment: RuntimeEnvironment::host(),
            cache: Mutex::new(HashMap::new()),
            stats: Mutex::new(DetectionStats::default()),
        }
    }

    pub fn with_catalog(mut self, catalog: FeatureCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Transport used by the connectivity probe. Without one the probe
    /// always reports the current generation unreachable.
    pub fn with_probe(mut self, transport: Arc<dyn Transport>) -> Self {
        self.probe = Some(transport);
        self
    }

    pub fn with_environment(mut self, environment: RuntimeEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }

    pub fn resolve(&self, options: &DetectionOptions) -> Result<ApiGeneration> {
        if let Some(generation) = options.pinned_generation() {
            let mut stats = self.stats.lock();
            stats.total += 1;
            stats.pinned += 1;
            debug!(%generation, "generation pinned by caller");
            return Ok(generation);
        }

        let fingerprint = options.fingerprint()?;
        if let Some(generation) = self.cache.lock().get(&fingerprint).copied() {
            let mut stats = self.stats.lock();
            stats.total += 1;
            stats.cache_hits += 1;
            stats.resolved += 1;
            *stats.by_generation.entry(generation.to_string()).or_default() += 1;
            debug!(%generation, "generation served from detection cache");
            return Ok(generation);
        }

        let strategies = options
            .strategies
            .clone()
            .unwrap_or_else(|| DetectionStrategy::DEFAULT_ORDER.to_vec());

        let mut winner = None;
        for strategy in strategies {
            *self
                .stats
                .lock()
                .strategy_runs
                .entry(strategy.name().to_string())
                .or_default() += 1;
            if let Some(generation) = self.run_strategy(strategy, options)? {
                debug!(%strategy, %generation, "strategy decided generation");
                winner = Some((strategy, generation));
                break;
            }
            debug!(%strategy, "strategy indeterminate");
        }

        let generation = match winner {
            Some((strategy, generation)) => {
                *self
                    .stats
                    .lock()
                    .strategy_wins
                    .entry(strategy.name().to_string())
                    .or_default() += 1;
                generation
            }
            None => match self.config.fallback_generation {
                Some(fallback) => {
                    self.stats.lock().fallbacks += 1;
                    debug!(generation = %fallback, "every strategy indeterminate, using fallback");
                    fallback
                }
                None => {
                    let mut stats = self.stats.lock();
                    stats.total += 1;
                    stats.failed += 1;
                    return Err(BridgeError::Configuration(
                        "no detection strategy resolved a generation and no fallback is configured"
                            .to_string(),
                    ));
                }
            },
        };

        self.cache.lock().insert(fingerprint, generation);
        let mut stats = self.stats.lock();
        stats.total += 1;
        stats.resolved += 1;
        *stats.by_generation.entry(generation.to_string()).or_default() += 1;
        info!(%generation, "API generation resolved");
        Ok(generation)
    }

    fn run_strategy(
        &self,
        strategy: DetectionStrategy,
        options: &DetectionOptions,
    ) -> Result<Option<ApiGeneration>> {
        match strategy {
            DetectionStrategy::ExplicitConfig => Ok(self
                .config
                .generation
                .is_concrete()
                .then_some(self.config.generation)),
            DetectionStrategy::CreationTimeHeuristic => Ok(options.created_at.map(|created| {
                if created >= self.config.creation_cutoff {
                    ApiGeneration::Current
                } else {
                    ApiGeneration::Legacy
                }
            })),
            DetectionStrategy::ConnectivityProbe => Ok(Some(self.probe_current(options))),
            DetectionStrategy::FeatureRequirement => match &options.required_features {
                Some(required) => self.lowest_generation_with(required).map(Some),
                None => Ok(None),
            },
            DetectionStrategy::EnvironmentCompatibility => {
                let environment = options.environment.as_ref().unwrap_or(&self.environment);
                if self.environment_issues(environment).is_empty() {
                    Ok(Some(ApiGeneration::Current))
                } else {
                    Ok(Some(ApiGeneration::Legacy))
                }
            }
        }
    }

    /// Never fails: any probe error means "use legacy".
    fn probe_current(&self, options: &DetectionOptions) -> ApiGeneration {
        let Some(transport) = &self.probe else {
            debug!("no probe transport configured, assuming legacy");
            return ApiGeneration::Legacy;
        };
        let request = HttpRequest {
            method: HttpMethod::Get,
            path: self.config.current.base_url.clone(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        };
        let timeout = options.probe_timeout.unwrap_or(self.config.probe_timeout);
        match transport.send(&request, Some(timeout)) {
            Ok(response) if response.status < 500 => ApiGeneration::Current,
            Ok(response) => {
                warn!(status = response.status, "current generation probe failed, degrading to legacy");
                ApiGeneration::Legacy
            }
            Err(e) => {
                warn!(error = %e, "current generation unreachable, degrading to legacy");
                ApiGeneration::Legacy
            }
        }
    }

    fn lowest_generation_with(&self, required: &BTreeSet<String>) -> Result<ApiGeneration> {
        for generation in ApiGeneration::CONCRETE {
            if self.catalog.satisfies(generation, required)? {
                return Ok(generation);
            }
        }
        Ok(ApiGeneration::Current)
    }

    fn environment_issues(&self, environment: &RuntimeEnvironment) -> Vec<String> {
        let requirements = &self.config.environment;
        let mut issues = Vec::new();
        if environment.version < requirements.min_runtime_version {
            issues.push(format!(
                "runtime {} is older than the required {}",
                environment.version, requirements.min_runtime_version
            ));
        }
        for capability in &requirements.required_capabilities {
            if !environment.capabilities.contains(capability) {
                issues.push(format!("missing runtime capability `{capability}`"));
            }
        }
        issues
    }

    pub fn is_feature_supported(&self, feature: &str, generation: ApiGeneration) -> Result<bool> {
        self.catalog.supports(feature, generation)
    }

    pub fn list_supported_features(&self, generation: ApiGeneration) -> Result<Vec<String>> {
        self.catalog.features_for(generation)
    }

    pub fn list_supported_generations(&self) -> Vec<ApiGeneration> {
        ApiGeneration::CONCRETE.to_vec()
    }

    /// Whether this host can use `generation`, and what it would gain by
    /// moving to the current one.
    pub fn describe_compatibility(&self, generation: ApiGeneration) -> Result<CompatibilityReport> {
        let generation = generation.concrete()?;
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        if generation == ApiGeneration::Current {
            issues = self.environment_issues(&self.environment);
            let requirements = &self.config.environment;
            if self.environment.version < requirements.min_runtime_version {
                recommendations.push(format!(
                    "upgrade the runtime to {} or newer",
                    requirements.min_runtime_version
                ));
            }
            for capability in requirements
                .required_capabilities
                .difference(&self.environment.capabilities)
            {
                recommendations.push(format!("enable the `{capability}` capability"));
            }
            if !issues.is_empty() {
                recommendations.push("use the legacy generation until the issues are resolved".to_string());
            }
        }

        let gaps = self.catalog.gaps(generation)?;
        if !gaps.is_empty() {
            recommendations.push(format!(
                "features unavailable on {generation}: {}; migrate to the current generation to use them",
                gaps.join(", ")
            ));
        }

        Ok(CompatibilityReport {
            generation,
            compatible: issues.is_empty(),
            issues,
            recommendations,
        })
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock();
        debug!(entries = cache.len(), "clearing detection cache");
        cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn stats(&self) -> DetectionStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeVersion;
    use crate::http::{HttpResponse, TransportError};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Probe transport that answers with a fixed status or fails.
    struct ProbeStub {
        status: Option<u16>,
        calls: AtomicUsize,
    }

    impl ProbeStub {
        fn new(status: Option<u16>) -> Arc<Self> {
            Arc::new(Self {
                status,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Transport for ProbeStub {
        fn send(&self, _request: &HttpRequest, timeout: Option<Duration>) -> std::result::Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.status {
                Some(status) => Ok(HttpResponse {
                    status,
                    headers: Vec::new(),
                    body: String::new(),
                }),
                None => Err(TransportError::Timeout(timeout.unwrap_or_default())),
            }
        }
    }

    fn selector() -> VersionSelector {
        VersionSelector::new(BridgeConfig::default())
    }

    #[test]
    fn pinned_generation_skips_cache_and_strategies() {
        let probe = ProbeStub::new(Some(200));
        let selector = selector().with_probe(probe.clone());
        let options = DetectionOptions::pinned(ApiGeneration::Legacy);
        assert_eq!(selector.resolve(&options).unwrap(), ApiGeneration::Legacy);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(selector.cache_len(), 0);
        let stats = selector.stats();
        assert_eq!(stats.pinned, 1);
        assert!(stats.strategy_runs.is_empty());
    }

    #[test]
    fn explicit_config_wins_over_later_strategies() {
        let mut config = BridgeConfig::default();
        config.generation = ApiGeneration::Legacy;
        let probe = ProbeStub::new(Some(200));
        let selector = VersionSelector::new(config).with_probe(probe.clone());
        assert_eq!(
            selector.resolve(&DetectionOptions::default()).unwrap(),
            ApiGeneration::Legacy
        );
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(selector.stats().strategy_wins["explicit_config"], 1);
    }

    #[test]
    fn creation_time_cutoff_is_inclusive() {
        let selector = selector();
        let cutoff = BridgeConfig::default().creation_cutoff;
        let only = [DetectionStrategy::CreationTimeHeuristic];
        let at_cutoff = DetectionOptions::default().with_strategies(&only).created_at(cutoff);
        let before = DetectionOptions::default()
            .with_strategies(&only)
            .created_at(cutoff - chrono::Duration::seconds(1));
        assert_eq!(selector.resolve(&at_cutoff).unwrap(), ApiGeneration::Current);
        assert_eq!(selector.resolve(&before).unwrap(), ApiGeneration::Legacy);
    }

    #[test]
    fn probe_failure_degrades_to_legacy() {
        let only = [DetectionStrategy::ConnectivityProbe];
        let options = DetectionOptions::default().with_strategies(&only);

        let down = selector().with_probe(ProbeStub::new(None));
        assert_eq!(down.resolve(&options).unwrap(), ApiGeneration::Legacy);

        let erroring = selector().with_probe(ProbeStub::new(Some(503)));
        assert_eq!(erroring.resolve(&options).unwrap(), ApiGeneration::Legacy);

        let up = selector().with_probe(ProbeStub::new(Some(404)));
        assert_eq!(up.resolve(&options).unwrap(), ApiGeneration::Current);

        assert_eq!(selector().resolve(&options).unwrap(), ApiGeneration::Legacy);
    }

    #[test]
    fn feature_requirement_picks_lowest_satisfying_generation() {
        let selector = selector();
        let only = [DetectionStrategy::FeatureRequirement];
        let current_only = DetectionOptions::default()
            .with_strategies(&only)
            .require_features(&["advancedSearch", "batchOperations"]);
        let shared = DetectionOptions::default()
            .with_strategies(&only)
            .require_features(&["userManagement", "messageSend"]);
        let unknown = DetectionOptions::default()
            .with_strategies(&only)
            .require_features(&["teleportation"]);
        assert_eq!(selector.resolve(&current_only).unwrap(), ApiGeneration::Current);
        assert_eq!(selector.resolve(&shared).unwrap(), ApiGeneration::Legacy);
        assert_eq!(selector.resolve(&unknown).unwrap(), ApiGeneration::Current);
    }

    #[test]
    fn environment_check_uses_option_override() {
        let selector = selector();
        let only = [DetectionStrategy::EnvironmentCompatibility];
        let old = DetectionOptions::default()
            .with_strategies(&only)
            .environment(RuntimeEnvironment::new(RuntimeVersion::new(1, 60, 0), &["tls"]));
        let modern = DetectionOptions::default()
            .with_strategies(&only)
            .environment(RuntimeEnvironment::new(RuntimeVersion::new(1, 80, 0), &["tls"]));
        let no_tls = DetectionOptions::default()
            .with_strategies(&only)
            .environment(RuntimeEnvironment::new(RuntimeVersion::new(1, 80, 0), &[]));
        assert_eq!(selector.resolve(&old).unwrap(), ApiGeneration::Legacy);
        assert_eq!(selector.resolve(&modern).unwrap(), ApiGeneration::Current);
        assert_eq!(selector.resolve(&no_tls).unwrap(), ApiGeneration::Legacy);
    }

    #[test]
    fn second_resolve_is_a_cache_hit_until_cleared() {
        let probe = ProbeStub::new(Some(200));
        let selector = selector().with_probe(probe.clone());
        let options = DetectionOptions::default();

        let first = selector.resolve(&options).unwrap();
        let second = selector.resolve(&options).unwrap();
        assert_eq!(first, second);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(selector.stats().cache_hits, 1);

        selector.clear_cache();
        assert_eq!(selector.cache_len(), 0);
        assert_eq!(selector.resolve(&options).unwrap(), first);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn exhaustion_without_fallback_is_a_configuration_error() {
        let selector = selector();
        let options = DetectionOptions::default()
            .with_strategies(&[DetectionStrategy::ExplicitConfig, DetectionStrategy::CreationTimeHeuristic]);
        let err = selector.resolve(&options).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert_eq!(selector.stats().failed, 1);
        assert_eq!(selector.cache_len(), 0);
    }

    #[test]
    fn exhaustion_with_fallback_uses_it() {
        let mut config = BridgeConfig::default();
        config.fallback_generation = Some(ApiGeneration::Current);
        let selector = VersionSelector::new(config);
        let options = DetectionOptions::default().with_strategies(&[DetectionStrategy::ExplicitConfig]);
        assert_eq!(selector.resolve(&options).unwrap(), ApiGeneration::Current);
        assert_eq!(selector.stats().fallbacks, 1);
    }

    #[test]
    fn compatibility_report_flags_environment_gaps() {
        let selector = selector().with_environment(RuntimeEnvironment::new(RuntimeVersion::new(1, 50, 0), &[]));
        let report = selector.describe_compatibility(ApiGeneration::Current).unwrap();
        assert!(!report.compatible);
        assert_eq!(report.issues.len(), 2);
        assert!(report.recommendations.iter().any(|r| r.contains("upgrade the runtime")));

        let legacy = selector.describe_compatibility(ApiGeneration::Legacy).unwrap();
        assert!(legacy.compatible);
        assert!(legacy.recommendations.iter().any(|r| r.contains("advancedSearch")));

        assert!(selector.describe_compatibility(ApiGeneration::Auto).is_err());
    }

    #[test]
    fn read_only_queries() {
        let selector = selector();
        assert_eq!(
            selector.list_supported_generations(),
            vec![ApiGeneration::Legacy, ApiGeneration::Current]
        );
        assert!(selector.is_feature_supported("messageRecall", ApiGeneration::Current).unwrap());
        assert!(!selector.is_feature_supported("messageRecall", ApiGeneration::Legacy).unwrap());
        let created = Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap();
        let options = DetectionOptions::default()
            .with_strategies(&[DetectionStrategy::CreationTimeHeuristic])
            .created_at(created);
        assert_eq!(selector.resolve(&options).unwrap(), ApiGeneration::Current);
        assert_eq!(selector.stats().by_generation["current"], 1);
    }
}
