//! Shared vocabulary types: API generations, translation direction and the
//! opaque payload shape.
//!
//! # Design
//! Generations are a closed enum. String identifiers coming from
//! configuration or callers are parsed once at the edge, and anything
//! unrecognised is rejected with `InvalidArgument` instead of silently
//! defaulting. `Auto` exists only as a selector input and never reaches a
//! translation table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Wire payloads are JSON objects; field order is irrelevant at this layer.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// One version family of the vendor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiGeneration {
    /// The "v1" endpoints (`errcode`/`errmsg` envelopes, query-string tokens).
    Legacy,
    /// The "v2" endpoints.
    Current,
    /// Let the selector decide. Never a wire target.
    Auto,
}

impl ApiGeneration {
    /// Every generation that can be used as a wire target, lowest first.
    pub const CONCRETE: [ApiGeneration; 2] = [ApiGeneration::Legacy, ApiGeneration::Current];

    pub fn is_concrete(self) -> bool {
        !matches!(self, ApiGeneration::Auto)
    }

    /// Return `self` if it is a wire target, `InvalidArgument` otherwise.
    pub fn concrete(self) -> Result<Self, BridgeError> {
        if self.is_concrete() {
            Ok(self)
        } else {
            Err(BridgeError::InvalidArgument(
                "generation `auto` must be resolved before translation".to_string(),
            ))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApiGeneration::Legacy => "legacy",
            ApiGeneration::Current => "current",
            ApiGeneration::Auto => "auto",
        }
    }
}

impl fmt::Display for ApiGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiGeneration {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "legacy" => Ok(ApiGeneration::Legacy),
            "v2" | "current" => Ok(ApiGeneration::Current),
            "auto" => Ok(ApiGeneration::Auto),
            other => Err(BridgeError::InvalidArgument(format!(
                "unknown API generation `{other}`"
            ))),
        }
    }
}

/// Which half of a call is being translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Request,
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => f.write_str("request"),
            Direction::Response => f.write_str("response"),
        }
    }
}
