//! Behavioural scenarios through the public API, with an in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use dualapi_core::{
    ApiGeneration, BridgeClient, BridgeConfig, BridgeError, CallOptions, DetectionOptions, DetectionStrategy,
    ErrorClassification, FailureKind, FeatureCatalog, FixedClock, HttpMethod, HttpRequest, HttpResponse, Payload,
    SequenceNonce, StaticCredentials, Transport, TransportError,
};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Records every request and answers with a canned legacy or current body.
/// `GET` on a bare base URL is treated as the connectivity probe.
struct Recording {
    requests: Mutex<Vec<HttpRequest>>,
    probes: AtomicUsize,
    body: Value,
}

impl Recording {
    fn answering(body: Value) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
            body,
        })
    }

    fn last(&self) -> HttpRequest {
        self.requests.lock().unwrap().last().cloned().expect("nothing sent")
    }
}

impl Transport for Recording {
    fn send(&self, request: &HttpRequest, _timeout: Option<Duration>) -> Result<HttpResponse, TransportError> {
        if request.path == BridgeConfig::default().current.base_url {
            self.probes.fetch_add(1, Ordering::SeqCst);
            return Ok(HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: String::new(),
            });
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: self.body.to_string(),
        })
    }
}

fn client(transport: Arc<Recording>) -> BridgeClient {
    BridgeClient::builder(BridgeConfig::default())
        .clock(Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())))
        .nonce_source(Arc::new(SequenceNonce::new("nonce")))
        .build(transport, Arc::new(StaticCredentials::new("app", "secret", "token")))
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

#[test]
fn current_supports_every_legacy_feature() {
    let client = client(Recording::answering(json!({})));
    let legacy = client.supported_features(ApiGeneration::Legacy).unwrap();
    let current = client.supported_features(ApiGeneration::Current).unwrap();
    for feature in &legacy {
        assert!(current.contains(feature), "{feature} missing from current");
    }
    assert!(current.len() > legacy.len());
}

#[test]
fn pinned_legacy_ignores_strategies_and_cache() {
    let transport = Recording::answering(json!({}));
    let client = client(transport.clone());
    let options = DetectionOptions::pinned(ApiGeneration::Legacy)
        .with_strategies(&[DetectionStrategy::ConnectivityProbe])
        .require_features(&["advancedSearch"]);

    for _ in 0..3 {
        assert_eq!(client.resolve_generation(&options).unwrap(), ApiGeneration::Legacy);
    }
    assert_eq!(transport.probes.load(Ordering::SeqCst), 0);
    assert_eq!(client.selector().cache_len(), 0);
    assert_eq!(client.stats().detection.cache_hits, 0);
}

#[test]
fn repeated_resolution_hits_the_cache_until_cleared() {
    let transport = Recording::answering(json!({}));
    let client = client(transport.clone());
    let options = DetectionOptions::default().with_strategies(&[DetectionStrategy::ConnectivityProbe]);

    let first = client.resolve_generation(&options).unwrap();
    let second = client.resolve_generation(&options).unwrap();
    assert_eq!(first, second);
    assert_eq!(transport.probes.load(Ordering::SeqCst), 1);
    assert_eq!(client.stats().detection.cache_hits, 1);

    client.clear_cache();
    assert_eq!(client.resolve_generation(&options).unwrap(), first);
    assert_eq!(transport.probes.load(Ordering::SeqCst), 2);
}

#[test]
fn feature_requirements_drive_resolution() {
    let client = client(Recording::answering(json!({})));
    let only = [DetectionStrategy::FeatureRequirement];

    let current_only = DetectionOptions::default()
        .with_strategies(&only)
        .require_features(&["advancedSearch", "batchOperations"]);
    assert_eq!(client.resolve_generation(&current_only).unwrap(), ApiGeneration::Current);

    let shared = DetectionOptions::default()
        .with_strategies(&only)
        .require_features(&["userManagement", "messageSend"]);
    let resolved = client.resolve_generation(&shared).unwrap();
    assert!(client.supported_generations().contains(&resolved));
    assert!(client
        .selector()
        .is_feature_supported("messageSend", resolved)
        .unwrap());
}

#[test]
fn response_round_trip_keeps_key_set() {
    let client = client(Recording::answering(json!({})));
    let original = payload(json!({
        "errcode": 0,
        "userid": "u1",
        "unionid": "x",
        "department": "1,2",
        "isBoss": "false",
        "jobnumber": "0042"
    }));
    let schema = client.schema();
    let logical = schema
        .adapt_response(&original, ApiGeneration::Legacy, ApiGeneration::Current, "user.get")
        .unwrap();
    let back = schema
        .adapt_response(&logical, ApiGeneration::Current, ApiGeneration::Legacy, "user.get")
        .unwrap();

    let mut before: Vec<_> = original.keys().cloned().collect();
    let mut after: Vec<_> = back.keys().cloned().collect();
    before.sort();
    after.sort();
    assert_eq!(before, after);
    assert_eq!(back["isBoss"], json!(false));
    assert_eq!(back["jobnumber"], json!("0042"));
}

#[test]
fn recall_is_never_translated() {
    let client = client(Recording::answering(json!({})));
    let input = payload(json!({"taskId": 10}));
    let schema = client.schema();
    let err = schema
        .adapt_request(&input, ApiGeneration::Legacy, ApiGeneration::Current, "message.recall")
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnsupportedTranslation { .. }));
    let err = schema
        .adapt_response(&input, ApiGeneration::Legacy, ApiGeneration::Current, "message.recall")
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnsupportedTranslation { .. }));

    // Native current-generation recall is fine.
    let transport = Recording::answering(json!({"success": true}));
    let client = self::client(transport);
    client
        .call("message.recall", &input, HttpMethod::Post, &CallOptions::pinned(ApiGeneration::Current))
        .unwrap();
}

#[test]
fn vendor_codes_classify() {
    let classification = ErrorClassification::default();
    assert_eq!(classification.classify(40001), FailureKind::Auth);
    assert_eq!(classification.classify(90018), FailureKind::RateLimit);
    assert_eq!(classification.classify(43001), FailureKind::RateLimit);
    assert_eq!(classification.classify(50001), FailureKind::Generic);
    assert_eq!(classification.classify(99999), FailureKind::Generic);

    for (code, kind) in [
        (40001, FailureKind::Auth),
        (90018, FailureKind::RateLimit),
        (43001, FailureKind::RateLimit),
        (50001, FailureKind::Generic),
        (99999, FailureKind::Generic),
    ] {
        let client = client(Recording::answering(json!({"errcode": code, "errmsg": "vendor says no"})));
        let err = client
            .call("user.get", &Payload::new(), HttpMethod::Get, &CallOptions::pinned(ApiGeneration::Legacy))
            .unwrap_err();
        assert_eq!(err.failure_kind(), Some(kind), "code {code}");
        assert_eq!(err.vendor_code(), Some(code));
    }
}

#[test]
fn legacy_user_get_end_to_end() {
    let transport = Recording::answering(json!({"errcode": 0, "errmsg": "ok", "userid": "u1", "name": "Zhang San"}));
    let client = client(transport.clone());
    let out = client
        .call(
            "user.get",
            &payload(json!({"userId": "u1"})),
            HttpMethod::Get,
            &CallOptions::pinned(ApiGeneration::Legacy),
        )
        .unwrap();

    let sent = transport.last();
    assert_eq!(sent.method, HttpMethod::Get);
    assert_eq!(sent.query_param("userid"), Some("u1"));
    assert_eq!(sent.query_param("lang"), Some("zh_CN"));
    assert!(sent.query_param("userId").is_none());
    assert_eq!(sent.query_param("access_token"), Some("token"));
    assert_eq!(sent.query_param("timestamp"), Some("1709294400000"));

    assert_eq!(out["userId"], json!("u1"));
    assert!(!out.contains_key("userid"));
    assert_eq!(out["name"], json!("Zhang San"));
}

#[test]
fn explicit_language_survives_to_the_wire() {
    let transport = Recording::answering(json!({"errcode": 0}));
    let client = client(transport.clone());
    client
        .call(
            "user.get",
            &payload(json!({"userId": "u1", "language": "en_US"})),
            HttpMethod::Get,
            &CallOptions::pinned(ApiGeneration::Legacy),
        )
        .unwrap();
    assert_eq!(transport.last().query_param("lang"), Some("en_US"));
}

#[test]
fn fallback_generation_applies_when_nothing_decides() {
    let transport = Recording::answering(json!({"errcode": 0}));
    let mut config = BridgeConfig::default();
    config.fallback_generation = Some(ApiGeneration::Legacy);
    let client = BridgeClient::new(config, transport, Arc::new(StaticCredentials::new("a", "b", "c")));
    let options = DetectionOptions::default().with_strategies(&[DetectionStrategy::CreationTimeHeuristic]);
    assert_eq!(client.resolve_generation(&options).unwrap(), ApiGeneration::Legacy);
    assert_eq!(client.stats().detection.fallbacks, 1);
}

#[test]
fn shared_client_stays_consistent_across_threads() {
    const THREADS: usize = 8;
    const CALLS_PER_THREAD: usize = 5;

    let transport = Recording::answering(json!({"errcode": 0}));
    let client = Arc::new(client(transport.clone()));
    let options = DetectionOptions::default().with_strategies(&[DetectionStrategy::ConnectivityProbe]);

    let resolved: Vec<Vec<ApiGeneration>> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|worker| {
                let client = Arc::clone(&client);
                let options = options.clone();
                scope.spawn(move || {
                    let call_options = CallOptions::default().with_detection(options.clone());
                    (0..CALLS_PER_THREAD)
                        .map(|i| {
                            let generation = client.resolve_generation(&options).unwrap();
                            let params = payload(json!({"userId": format!("u{worker}-{i}")}));
                            client
                                .call("user.get", &params, HttpMethod::Get, &call_options)
                                .unwrap();
                            generation
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let calls = (THREADS * CALLS_PER_THREAD) as u64;
    assert!(resolved.iter().flatten().all(|g| *g == ApiGeneration::Current));

    let stats = client.stats();
    assert_eq!(stats.detection.total, calls * 2);
    assert_eq!(stats.calls["current"].total, calls);
    assert_eq!(stats.calls["current"].successful, calls);
    assert_eq!(stats.calls["legacy"].total, 0);
    assert_eq!(transport.requests.lock().unwrap().len() as u64, calls);
    assert_eq!(client.selector().cache_len(), 1);
}

fn generation_sets() -> impl Strategy<Value = Vec<ApiGeneration>> {
    prop::collection::vec(
        prop_oneof![Just(ApiGeneration::Legacy), Just(ApiGeneration::Current)],
        1..3,
    )
}

proptest! {
    #[test]
    fn catalog_growth_preserves_superset(additions in prop::collection::vec(("[a-d]", generation_sets()), 0..12)) {
        let mut catalog = FeatureCatalog::default();
        for (name, generations) in &additions {
            let _ = catalog.add_feature(name, generations);
        }
        let legacy = catalog.features_for(ApiGeneration::Legacy).unwrap();
        let current = catalog.features_for(ApiGeneration::Current).unwrap();
        for feature in legacy {
            prop_assert!(current.contains(&feature));
        }
    }
}
