//! Version-compatibility core for a dual-generation vendor API.
//!
//! # Overview
//! The vendor exposes two API generations at once: a legacy one
//! (`errcode` bodies, token in the query string) and a current one (REST
//! paths, token in a header). Application code speaks a single logical
//! shape and this crate bridges it to whichever generation serves a call.
//!
//! - [`VersionSelector`] decides the generation per call through a cascade
//!   of detection strategies, memoised by option fingerprint.
//! - [`SchemaAdapter`] translates request and response payloads between
//!   generations: renames, type conversion, defaults, a compatibility matrix
//!   and an override registry.
//! - [`CallAdapter`] executes a call against one generation: endpoint
//!   lookup, auth injection (bearer or HMAC-signed), vendor error
//!   classification and retry hints.
//! - [`BridgeClient`] ties the three together.
//!
//! # Design
//! The core performs no I/O. Requests are built as [`HttpRequest`] values
//! and handed to an injected [`Transport`]; the host owns the network,
//! retries and cancellation. Time, nonces and credentials are injected too,
//! so every call is reproducible in tests.

pub mod adapter;
pub mod classify;
pub mod client;
pub mod clock;
pub mod config;
pub mod convert;
pub mod credentials;
pub mod custom;
pub mod detection;
pub mod endpoints;
pub mod error;
pub mod features;
pub mod http;
pub mod schema;
pub mod selector;
pub mod signing;
pub mod tables;
pub mod types;

pub use adapter::{CallAdapter, CallStats, ExecuteOptions};
pub use classify::{ErrorClassification, FailureKind};
pub use client::{BridgeClient, BridgeClientBuilder, BridgeStats, CallOptions};
pub use clock::{Clock, FixedClock, NonceSource, SequenceNonce, SystemClock, UuidNonce};
pub use config::{BridgeConfig, EndpointConfig, EnvironmentRequirements, RuntimeVersion, Settings};
pub use credentials::{CachedCredentials, CredentialProvider, IssuedToken, StaticCredentials, TokenCache, TokenSource};
pub use custom::CustomAdapter;
pub use detection::{DetectionOptions, DetectionStrategy, RuntimeEnvironment};
pub use endpoints::{AuthCategory, EndpointTable, TokenPlacement};
pub use error::{AdaptationFault, BridgeError, Result};
pub use features::FeatureCatalog;
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};
pub use schema::{AdaptationStats, MethodStats, SchemaAdapter};
pub use selector::{CompatibilityReport, DetectionStats, VersionSelector};
pub use tables::SchemaTables;
pub use types::{ApiGeneration, Direction, Payload};
