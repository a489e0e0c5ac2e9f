//! The façade application code talks to.
//!
//! # Design
//! `BridgeClient` owns one [`VersionSelector`], one shared [`SchemaAdapter`]
//! and one [`CallAdapter`] per concrete generation. A logical call resolves
//! its generation (unless pinned), then hands off to that generation's
//! adapter. All state is instance-scoped: two clients built for different
//! applications share nothing.
//!
//! The client does no I/O of its own; both the connectivity probe and API
//! calls go through the one injected [`Transport`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::adapter::{CallAdapter, CallStats, ExecuteOptions};
use crate::clock::{Clock, NonceSource, SystemClock, UuidNonce};
use crate::config::{BridgeConfig, Settings};
use crate::credentials::CredentialProvider;
use crate::custom::CustomAdapter;
use crate::detection::{DetectionOptions, RuntimeEnvironment};
use crate::error::Result;
use crate::features::FeatureCatalog;
use crate::http::{HttpMethod, Transport};
use crate::schema::{AdaptationStats, SchemaAdapter};
use crate::selector::{CompatibilityReport, DetectionStats, VersionSelector};
use crate::tables::SchemaTables;
use crate::types::{ApiGeneration, Payload};

/// Options for one logical call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub detection: DetectionOptions,
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

impl CallOptions {
    pub fn pinned(generation: ApiGeneration) -> Self {
        Self {
            detection: DetectionOptions::pinned(generation),
            ..Self::default()
        }
    }

    pub fn with_detection(mut self, detection: DetectionOptions) -> Self {
        self.detection = detection;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Everything [`BridgeClient::stats`] reports.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub detection: DetectionStats,
    pub adaptation: AdaptationStats,
    /// Keyed by generation name.
    pub calls: BTreeMap<String, CallStats>,
}

pub struct BridgeClientBuilder {
    config: BridgeConfig,
    tables: SchemaTables,
    catalog: FeatureCatalog,
    environment: Option<RuntimeEnvironment>,
    clock: Arc<dyn Clock>,
    nonce: Arc<dyn NonceSource>,
}

impl BridgeClientBuilder {
    pub fn tables(mut self, tables: SchemaTables) -> Self {
        self.tables = tables;
        self
    }

    pub fn catalog(mut self, catalog: FeatureCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn environment(mut self, environment: RuntimeEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn nonce_source(mut self, nonce: Arc<dyn NonceSource>) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn build(self, transport: Arc<dyn Transport>, credentials: Arc<dyn CredentialProvider>) -> BridgeClient {
        let mut selector = VersionSelector::new(self.config.clone())
            .with_catalog(self.catalog)
            .with_probe(transport.clone());
        if let Some(environment) = self.environment {
            selector = selector.with_environment(environment);
        }
        let schema = Arc::new(SchemaAdapter::new(self.tables));
        let legacy = CallAdapter::legacy(&self.config, schema.clone(), transport.clone(), credentials.clone())
            .with_clock(self.clock.clone())
            .with_nonce_source(self.nonce.clone());
        let current = CallAdapter::current(&self.config, schema.clone(), transport, credentials)
            .with_clock(self.clock)
            .with_nonce_source(self.nonce);
        BridgeClient {
            config: self.config,
            selector,
            schema,
            legacy,
            current,
        }
    }
}

pub struct BridgeClient {
    config: BridgeConfig,
    selector: VersionSelector,
    schema: Arc<SchemaAdapter>,
    legacy: CallAdapter,
    current: CallAdapter,
}

impl BridgeClient {
    pub fn builder(config: BridgeConfig) -> BridgeClientBuilder {
        BridgeClientBuilder {
            config,
            tables: SchemaTables::builtin(),
            catalog: FeatureCatalog::default(),
            environment: None,
            clock: Arc::new(SystemClock),
            nonce: Arc::new(UuidNonce),
        }
    }

    pub fn new(config: BridgeConfig, transport: Arc<dyn Transport>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::builder(config).build(transport, credentials)
    }

    /// Build from the `bridge.*` section of `settings`.
    pub fn from_settings(
        settings: &Settings,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        Ok(Self::new(BridgeConfig::from_settings(settings)?, transport, credentials))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn selector(&self) -> &VersionSelector {
        &self.selector
    }

    pub fn schema(&self) -> &SchemaAdapter {
        &self.schema
    }

    /// The call adapter for a concrete generation.
    pub fn adapter(&self, generation: ApiGeneration) -> Result<&CallAdapter> {
        match generation.concrete()? {
            ApiGeneration::Legacy => Ok(&self.legacy),
            _ => Ok(&self.current),
        }
    }

    pub fn resolve_generation(&self, options: &DetectionOptions) -> Result<ApiGeneration> {
        self.selector.resolve(options)
    }

    /// Execute `method` with logical `params` against whichever generation
    /// `options` resolve to, returning the logical response.
    pub fn call(&self, method: &str, params: &Payload, verb: HttpMethod, options: &CallOptions) -> Result<Payload> {
        let generation = self.resolve_generation(&options.detection)?;
        debug!(method, %generation, %verb, "dispatching logical call");
        let execute = ExecuteOptions {
            timeout: options.timeout,
            headers: options.headers.clone(),
        };
        self.adapter(generation)?.execute(method, params, verb, &execute)
    }

    pub fn supported_generations(&self) -> Vec<ApiGeneration> {
        self.selector.list_supported_generations()
    }

    pub fn supported_features(&self, generation: ApiGeneration) -> Result<Vec<String>> {
        self.selector.list_supported_features(generation)
    }

    pub fn compatibility_report(&self, generation: ApiGeneration) -> Result<CompatibilityReport> {
        self.selector.describe_compatibility(generation)
    }

    pub fn register_custom_adapter(
        &self,
        method: &str,
        from: ApiGeneration,
        to: ApiGeneration,
        adapter: CustomAdapter,
    ) -> Result<()> {
        self.schema.register_custom_adapter(method, from, to, adapter)
    }

    pub fn clear_cache(&self) {
        self.selector.clear_cache();
    }

    pub fn stats(&self) -> BridgeStats {
        let calls = [&self.legacy, &self.current]
            .into_iter()
            .map(|adapter| (adapter.generation().to_string(), adapter.stats()))
            .collect();
        BridgeStats {
            detection: self.selector.stats(),
            adaptation: self.schema.stats(),
            calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedClock, SequenceNonce};
    use crate::config::RuntimeVersion;
    use crate::credentials::StaticCredentials;
    use crate::detection::DetectionStrategy;
    use crate::error::BridgeError;
    use crate::http::{HttpRequest, HttpResponse, TransportError};
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    /// Answers every request with `{"errcode": 0}` plus the request path.
    #[derive(Default)]
    struct Echo {
        paths: Mutex<Vec<String>>,
    }

    impl Transport for Echo {
        fn send(&self, request: &HttpRequest, _: Option<Duration>) -> std::result::Result<HttpResponse, TransportError> {
            self.paths.lock().push(request.path.clone());
            Ok(HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: json!({"errcode": 0, "path": request.path}).to_string(),
            })
        }
    }

    fn client(transport: Arc<Echo>) -> BridgeClient {
        BridgeClient::builder(BridgeConfig::default())
            .clock(Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())))
            .nonce_source(Arc::new(SequenceNonce::new("t")))
            .environment(RuntimeEnvironment::new(RuntimeVersion::new(1, 80, 0), &["tls", "json"]))
            .build(transport, Arc::new(StaticCredentials::new("app", "secret", "token")))
    }

    #[test]
    fn pinned_call_goes_to_that_generation() {
        let transport = Arc::new(Echo::default());
        let client = client(transport.clone());
        client
            .call("user.get", &Payload::new(), HttpMethod::Get, &CallOptions::pinned(ApiGeneration::Legacy))
            .unwrap();
        assert_eq!(transport.paths.lock()[0], "https://oapi.dingtalk.com/user/get");

        let stats = client.stats();
        assert_eq!(stats.calls["legacy"].successful, 1);
        assert_eq!(stats.calls["current"].total, 0);
        assert_eq!(stats.detection.pinned, 1);
    }

    #[test]
    fn feature_requirements_route_to_current() {
        let transport = Arc::new(Echo::default());
        let client = client(transport.clone());
        let detection = DetectionOptions::default()
            .with_strategies(&[DetectionStrategy::FeatureRequirement])
            .require_features(&["advancedSearch"]);
        let options = CallOptions::default().with_detection(detection);
        let out = client
            .call("department.list", &Payload::new(), HttpMethod::Get, &options)
            .unwrap();
        assert_eq!(out["path"], json!("https://api.dingtalk.com/v1.0/contact/departments"));
    }

    #[test]
    fn unresolvable_call_is_a_configuration_error() {
        let client = client(Arc::new(Echo::default()));
        let options = CallOptions::default().with_detection(
            DetectionOptions::default().with_strategies(&[DetectionStrategy::CreationTimeHeuristic]),
        );
        let err = client
            .call("user.get", &Payload::new(), HttpMethod::Get, &options)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn introspection_reflects_catalog() {
        let client = client(Arc::new(Echo::default()));
        assert_eq!(
            client.supported_generations(),
            vec![ApiGeneration::Legacy, ApiGeneration::Current]
        );
        let legacy = client.supported_features(ApiGeneration::Legacy).unwrap();
        let current = client.supported_features(ApiGeneration::Current).unwrap();
        assert!(legacy.iter().all(|f| current.contains(f)));
        assert!(client.supported_features(ApiGeneration::Auto).is_err());

        let report = client.compatibility_report(ApiGeneration::Legacy).unwrap();
        assert!(report.compatible);
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn custom_adapters_apply_to_calls() {
        let transport = Arc::new(Echo::default());
        let client = client(transport);
        client
            .register_custom_adapter(
                "user.get",
                ApiGeneration::Legacy,
                ApiGeneration::Current,
                CustomAdapter::Passthrough,
            )
            .unwrap();
        let out = client
            .call("user.get", &Payload::new(), HttpMethod::Get, &CallOptions::pinned(ApiGeneration::Legacy))
            .unwrap();
        // Passthrough keeps the wire types untouched.
        assert_eq!(out["errcode"], Value::from(0));
        assert_eq!(client.stats().adaptation.custom, 1);
    }
}
