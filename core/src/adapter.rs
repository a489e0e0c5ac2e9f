//! Generation-specific call execution.
//!
//! # Design
//! A [`CallAdapter`] is bound to one concrete generation. Application code
//! speaks the logical shape, which is the current generation's shape, so a
//! call translates `current -> generation` on the way out and
//! `generation -> current` on the way back. The legacy call adapter is
//! simply `CallAdapter::legacy`.
//!
//! Like the rest of the crate the adapter never performs I/O itself:
//! [`CallAdapter::build_request`] produces an [`HttpRequest`] and
//! [`CallAdapter::parse_response`] consumes an [`HttpResponse`]. `execute`
//! wires the two together through the injected [`Transport`].
//!
//! The vendor error code is read from the raw body before response
//! translation, so a vendor failure is reported as such even when the error
//! body would not translate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::classify::{ErrorClassification, FailureKind};
use crate::clock::{Clock, NonceSource, SystemClock, UuidNonce};
use crate::config::BridgeConfig;
use crate::credentials::CredentialProvider;
use crate::endpoints::{fill_path, AuthCategory, EndpointTable, TokenPlacement};
use crate::error::{AdaptationFault, BridgeError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::schema::{validate_method, SchemaAdapter};
use crate::signing::sign;
use crate::types::{ApiGeneration, Payload};

/// Read-only snapshot of the running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub rate_limited: u64,
    pub auth_failed: u64,
}

#[derive(Debug, Default)]
struct CallCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    rate_limited: AtomicU64,
    auth_failed: AtomicU64,
}

impl CallCounters {
    fn record(&self, outcome: &Result<Payload>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(_) => {
                self.successful.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                match err.failure_kind() {
                    Some(FailureKind::RateLimit) => {
                        self.rate_limited.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(FailureKind::Auth) => {
                        self.auth_failed.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
            }
        }
    }

    fn snapshot(&self) -> CallStats {
        CallStats {
            total: self.total.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            auth_failed: self.auth_failed.load(Ordering::Relaxed),
        }
    }
}

/// Per-call knobs.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Overrides the generation's configured timeout.
    pub timeout: Option<Duration>,
    /// Extra headers, appended after the ones the adapter sets.
    pub headers: Vec<(String, String)>,
}

pub struct CallAdapter {
    generation: ApiGeneration,
    base_url: String,
    timeout: Duration,
    default_retry_after: Duration,
    endpoints: EndpointTable,
    classification: ErrorClassification,
    schema: Arc<SchemaAdapter>,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    clock: Arc<dyn Clock>,
    nonce: Arc<dyn NonceSource>,
    counters: CallCounters,
}

impl CallAdapter {
    /// Adapter for the legacy (`errcode`) generation.
    pub fn legacy(
        config: &BridgeConfig,
        schema: Arc<SchemaAdapter>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self::build(ApiGeneration::Legacy, EndpointTable::legacy(), config, schema, transport, credentials)
    }

    /// Adapter for the current generation.
    pub fn current(
        config: &BridgeConfig,
        schema: Arc<SchemaAdapter>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self::build(ApiGeneration::Current, EndpointTable::current(), config, schema, transport, credentials)
    }

    /// Fails with `InvalidArgument` for `auto`.
    pub fn for_generation(
        generation: ApiGeneration,
        config: &BridgeConfig,
        schema: Arc<SchemaAdapter>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        match generation.concrete()? {
            ApiGeneration::Legacy => Ok(Self::legacy(config, schema, transport, credentials)),
            _ => Ok(Self::current(config, schema, transport, credentials)),
        }
    }

    fn build(
        generation: ApiGeneration,
        endpoints: EndpointTable,
        config: &BridgeConfig,
        schema: Arc<SchemaAdapter>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let endpoint = match generation {
            ApiGeneration::Legacy => &config.legacy,
            _ => &config.current,
        };
        Self {
            generation,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            timeout: endpoint.timeout,
            default_retry_after: config.default_retry_after,
            endpoints,
            classification: ErrorClassification::default(),
            schema,
            transport,
            credentials,
            clock: Arc::new(SystemClock),
            nonce: Arc::new(UuidNonce),
            counters: CallCounters::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_nonce_source(mut self, nonce: Arc<dyn NonceSource>) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_endpoints(mut self, endpoints: EndpointTable) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_classification(mut self, classification: ErrorClassification) -> Self {
        self.classification = classification;
        self
    }

    pub fn generation(&self) -> ApiGeneration {
        self.generation
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    pub fn classification(&self) -> &ErrorClassification {
        &self.classification
    }

    pub fn stats(&self) -> CallStats {
        self.counters.snapshot()
    }

    /// Run one logical call: translate, authenticate, send once, classify,
    /// translate back. Never retries.
    pub fn execute(&self, method: &str, params: &Payload, verb: HttpMethod, options: &ExecuteOptions) -> Result<Payload> {
        let outcome = self.round_trip(method, params, verb, options);
        self.counters.record(&outcome);
        if let Err(err) = &outcome {
            match err {
                BridgeError::Auth { code, message } => {
                    warn!(generation = %self.generation, method, code, %message, "authentication failure");
                }
                BridgeError::RateLimit { code, retry_after, .. } => {
                    warn!(generation = %self.generation, method, code, ?retry_after, "rate limited");
                }
                other => {
                    warn!(generation = %self.generation, method, error = %other, "call failed");
                }
            }
        }
        outcome
    }

    fn round_trip(&self, method: &str, params: &Payload, verb: HttpMethod, options: &ExecuteOptions) -> Result<Payload> {
        let request = self.build_request(method, params, verb, &options.headers)?;
        let timeout = options.timeout.unwrap_or(self.timeout);
        debug!(generation = %self.generation, method, verb = %request.method, path = %request.path, "sending request");
        let response = self.transport.send(&request, Some(timeout))?;
        debug!(generation = %self.generation, method, status = response.status, "received response");
        self.parse_response(method, &response)
    }

    /// Translate logical `params` and turn them into a signed or
    /// token-bearing [`HttpRequest`] for this generation.
    pub fn build_request(
        &self,
        method: &str,
        params: &Payload,
        verb: HttpMethod,
        extra_headers: &[(String, String)],
    ) -> Result<HttpRequest> {
        validate_method(method)?;
        let template = self.endpoints.path_for(method);
        let mut wire = self
            .schema
            .adapt_request(params, ApiGeneration::Current, self.generation, method)?;
        let path = fill_path(&template, &mut wire).map_err(|fault| BridgeError::adaptation(method, fault))?;

        if !wire.contains_key("timestamp") {
            wire.insert("timestamp".to_string(), Value::from(self.clock.timestamp_millis()));
        }
        if !wire.contains_key("nonce") {
            wire.insert("nonce".to_string(), Value::from(self.nonce.nonce()));
        }

        let mut query = Vec::new();
        let mut headers = Vec::new();
        match self.endpoints.auth_category(method) {
            AuthCategory::Bearer => {
                let token = self.credentials.access_token(self.generation, false)?;
                match self.endpoints.token_placement() {
                    TokenPlacement::Query(name) => query.push((name.clone(), token)),
                    TokenPlacement::Header(name) => headers.push((name.clone(), token)),
                }
            }
            AuthCategory::Signed => {
                let timestamp = wire.remove("timestamp").map(|v| scalar_text(&v)).unwrap_or_default();
                let nonce = wire.remove("nonce").map(|v| scalar_text(&v)).unwrap_or_default();
                let signature = sign(&self.credentials.signing_secret()?, &timestamp, &nonce)?;
                query.push(("appkey".to_string(), self.credentials.app_key()));
                query.push(("timestamp".to_string(), timestamp));
                query.push(("nonce".to_string(), nonce));
                query.push(("signature".to_string(), signature));
            }
        }

        let body = if verb.carries_body() {
            headers.push(("content-type".to_string(), "application/json".to_string()));
            let body = serde_json::to_string(&Value::Object(wire))
                .map_err(|e| BridgeError::InvalidArgument(format!("request body for `{method}`: {e}")))?;
            Some(body)
        } else {
            query.extend(wire.iter().map(|(k, v)| (k.clone(), scalar_text(v))));
            None
        };
        headers.extend(extra_headers.iter().cloned());

        Ok(HttpRequest {
            method: verb,
            path: format!("{}{path}", self.base_url),
            query,
            headers,
            body,
        })
    }

    /// Classify vendor failures, then translate the body to the logical shape.
    pub fn parse_response(&self, method: &str, response: &HttpResponse) -> Result<Payload> {
        let raw = match parse_body(&response.body) {
            Ok(raw) => raw,
            Err(reason) if response.is_success() => {
                return Err(BridgeError::adaptation(method, AdaptationFault::MalformedResponse(reason)));
            }
            Err(_) => return Err(self.status_failure(response, &Payload::new())),
        };

        if let Some(code) = vendor_code(&raw).filter(|code| *code != 0) {
            let vendor_message = raw.get("errmsg").and_then(Value::as_str);
            let message = self.classification.describe(code, vendor_message);
            return Err(match self.classification.classify(code) {
                FailureKind::Auth => BridgeError::Auth { code, message },
                FailureKind::RateLimit => BridgeError::RateLimit {
                    code,
                    message,
                    retry_after: self.retry_after(response, &raw),
                },
                FailureKind::Generic => BridgeError::Api { code, message },
            });
        }
        if !response.is_success() {
            return Err(self.status_failure(response, &raw));
        }

        self.schema
            .adapt_response(&raw, self.generation, ApiGeneration::Current, method)
    }

    fn status_failure(&self, response: &HttpResponse, raw: &Payload) -> BridgeError {
        let code = i64::from(response.status);
        let message = raw
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", response.status));
        match response.status {
            429 => BridgeError::RateLimit {
                code,
                message,
                retry_after: self.retry_after(response, raw),
            },
            401 | 403 => BridgeError::Auth { code, message },
            _ => BridgeError::Api { code, message },
        }
    }

    /// `Retry-After` header, then a `retry_after` body field, both in seconds.
    fn retry_after(&self, response: &HttpResponse, raw: &Payload) -> Duration {
        response
            .header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .or_else(|| raw.get("retry_after").and_then(as_u64))
            .map(Duration::from_secs)
            .unwrap_or(self.default_retry_after)
    }
}

fn parse_body(body: &str) -> std::result::Result<Payload, String> {
    if body.trim().is_empty() {
        return Ok(Payload::new());
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}

/// `errcode` as an integral number or a numeric string.
fn vendor_code(raw: &Payload) -> Option<i64> {
    match raw.get("errcode")? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Query-string rendering: strings bare, everything else as JSON text.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
