//! Error types for the compatibility core.
//!
//! # Design
//! Vendor failures get one variant per failure kind (`Auth`, `RateLimit`,
//! `Api`) because callers branch on them: re-authenticate, back off, or give
//! up. Translation faults always carry a typed cause in `Adaptation` so a
//! failed rename or conversion is never reported as partial data.
//! Detection strategies that cannot decide are not errors; only exhaustion
//! without a fallback is (`Configuration`).

use std::time::Duration;

use thiserror::Error;

use crate::classify::FailureKind;
use crate::convert::ValueType;
use crate::http::TransportError;
use crate::types::ApiGeneration;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors returned by the selector, the schema adapter and the call adapters.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No strategy produced a generation and no fallback is configured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unknown generation, `auto` where a concrete generation is required,
    /// or a malformed method name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The compatibility matrix forbids bridging this method.
    #[error("method `{method}` cannot be translated from {from} to {to}")]
    UnsupportedTranslation {
        method: String,
        from: ApiGeneration,
        to: ApiGeneration,
    },

    /// Internal mapping or conversion fault.
    #[error("adaptation of `{method}` failed: {source}")]
    Adaptation {
        method: String,
        #[source]
        source: AdaptationFault,
    },

    /// Vendor rejected the credentials.
    #[error("authentication failed ({code}): {message}")]
    Auth { code: i64, message: String },

    /// Vendor throttled the call. `retry_after` is a hint; nothing here sleeps.
    #[error("rate limited ({code}): {message}; retry after {retry_after:?}")]
    RateLimit {
        code: i64,
        message: String,
        retry_after: Duration,
    },

    /// Any other vendor error code.
    #[error("API error ({code}): {message}")]
    Api { code: i64, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BridgeError {
    /// Failure kind for vendor failures, `None` for everything else.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            BridgeError::Auth { .. } => Some(FailureKind::Auth),
            BridgeError::RateLimit { .. } => Some(FailureKind::RateLimit),
            BridgeError::Api { .. } => Some(FailureKind::Generic),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BridgeError::RateLimit { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Vendor error code, if this error came from a vendor response.
    pub fn vendor_code(&self) -> Option<i64> {
        match self {
            BridgeError::Auth { code, .. }
            | BridgeError::RateLimit { code, .. }
            | BridgeError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn adaptation(method: &str, source: AdaptationFault) -> Self {
        BridgeError::Adaptation {
            method: method.to_string(),
            source,
        }
    }
}

/// Root cause of a failed translation.
#[derive(Debug, Error)]
pub enum AdaptationFault {
    #[error("field `{field}` holds {found}, which cannot become {expected}")]
    Conversion {
        field: String,
        expected: ValueType,
        found: String,
    },

    /// A rename would overwrite a field that is already present.
    #[error("renaming `{from}` to `{to}` would overwrite an existing field")]
    Collision { from: String, to: String },

    #[error("custom adapter `{adapter}` failed: {reason}")]
    Custom { adapter: String, reason: String },

    #[error("path placeholder `{0}` has no value in the request")]
    MissingPathParameter(String),

    #[error("malformed response body: {0}")]
    MalformedResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_failures_expose_kind_and_code() {
        let err = BridgeError::RateLimit {
            code: 90018,
            message: "slow down".to_string(),
            retry_after: Duration::from_secs(2),
        };
        assert_eq!(err.failure_kind(), Some(FailureKind::RateLimit));
        assert_eq!(err.vendor_code(), Some(90018));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));

        let err = BridgeError::Configuration("nothing resolved".to_string());
        assert_eq!(err.failure_kind(), None);
        assert_eq!(err.vendor_code(), None);
    }

    #[test]
    fn adaptation_display_includes_cause() {
        let err = BridgeError::adaptation(
            "user.get",
            AdaptationFault::Collision {
                from: "userid".to_string(),
                to: "userId".to_string(),
            },
        );
        let text = err.to_string();
        assert!(text.contains("user.get"));
        assert!(text.contains("userid"));
    }
}
