//! Vendor error-code classification.
//!
//! Codes fall into non-overlapping inclusive ranges, each tagged with a
//! failure kind. Codes outside every range are `Generic`, so an unmodelled
//! code still classifies instead of failing.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use serde::Serialize;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    Auth,
    RateLimit,
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CodeRange {
    start: i64,
    end: i64,
    kind: FailureKind,
}

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    /// Sorted by `start`, pairwise disjoint.
    ranges: Vec<CodeRange>,
    messages: HashMap<i64, String>,
}

const AUTH_RANGES: [RangeInclusive<i64>; 2] = [40001..=40099, 42001..=42099];
const RATE_LIMIT_RANGES: [RangeInclusive<i64>; 2] = [43001..=43099, 90001..=90099];

const MESSAGES: &[(i64, &str)] = &[
    (-1, "the platform is busy, try again later"),
    (40001, "invalid application credentials"),
    (40014, "invalid access_token"),
    (40089, "invalid corpid or corpsecret"),
    (42001, "access_token has expired"),
    (43001, "API call frequency limit exceeded"),
    (43004, "signature verification failed too often"),
    (50001, "permission denied for the requested API"),
    (50002, "no permission to operate on this user"),
    (60003, "department not found"),
    (60011, "no permission to manage this resource"),
    (60121, "user not found"),
    (33012, "invalid userid"),
    (90002, "too many requests for this application"),
    (90018, "too many requests in the current window, retry later"),
];

impl Default for ErrorClassification {
    fn default() -> Self {
        let mut ranges: Vec<(RangeInclusive<i64>, FailureKind)> = Vec::new();
        ranges.extend(AUTH_RANGES.iter().cloned().map(|r| (r, FailureKind::Auth)));
        ranges.extend(RATE_LIMIT_RANGES.iter().cloned().map(|r| (r, FailureKind::RateLimit)));
        let mut classification = Self::from_sorted(ranges);
        for (code, message) in MESSAGES {
            classification.messages.insert(*code, message.to_string());
        }
        classification
    }
}

impl ErrorClassification {
    /// Build from explicit ranges. Overlapping or inverted ranges are a
    /// configuration error.
    pub fn new(ranges: Vec<(RangeInclusive<i64>, FailureKind)>) -> Result<Self> {
        let mut sorted = ranges;
        sorted.sort_by_key(|(r, _)| *r.start());
        for (range, _) in &sorted {
            if range.start() > range.end() {
                return Err(BridgeError::Configuration(format!(
                    "error code range {}..={} is empty",
                    range.start(),
                    range.end()
                )));
            }
        }
        for pair in sorted.windows(2) {
            if pair[1].0.start() <= pair[0].0.end() {
                return Err(BridgeError::Configuration(format!(
                    "error code ranges {:?} and {:?} overlap",
                    pair[0].0, pair[1].0
                )));
            }
        }
        Ok(Self::from_sorted(sorted))
    }

    fn from_sorted(mut ranges: Vec<(RangeInclusive<i64>, FailureKind)>) -> Self {
        ranges.sort_by_key(|(r, _)| *r.start());
        Self {
            ranges: ranges
                .into_iter()
                .map(|(r, kind)| CodeRange {
                    start: *r.start(),
                    end: *r.end(),
                    kind,
                })
                .collect(),
            messages: HashMap::new(),
        }
    }

    pub fn with_message(mut self, code: i64, message: &str) -> Self {
        self.messages.insert(code, message.to_string());
        self
    }

    pub fn classify(&self, code: i64) -> FailureKind {
        let idx = self.ranges.partition_point(|r| r.start <= code);
        match idx.checked_sub(1).map(|i| &self.ranges[i]) {
            Some(range) if code <= range.end => range.kind,
            _ => FailureKind::Generic,
        }
    }

    pub fn message_for(&self, code: i64) -> Option<&str> {
        self.messages.get(&code).map(String::as_str)
    }

    /// Known message for `code`, else the vendor's text, else a placeholder.
    pub fn describe(&self, code: i64, vendor_message: Option<&str>) -> String {
        self.message_for(code)
            .or(vendor_message.filter(|m| !m.trim().is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("unrecognised error code {code}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn documented_codes_classify() {
        let c = ErrorClassification::default();
        assert_eq!(c.classify(40001), FailureKind::Auth);
        assert_eq!(c.classify(42001), FailureKind::Auth);
        assert_eq!(c.classify(90018), FailureKind::RateLimit);
        assert_eq!(c.classify(43001), FailureKind::RateLimit);
        assert_eq!(c.classify(50001), FailureKind::Generic);
        assert_eq!(c.classify(99999), FailureKind::Generic);
        assert_eq!(c.classify(-1), FailureKind::Generic);
    }

    #[test]
    fn range_boundaries_are_inclusive() {
        let c = ErrorClassification::default();
        assert_eq!(c.classify(40000), FailureKind::Generic);
        assert_eq!(c.classify(40099), FailureKind::Auth);
        assert_eq!(c.classify(40100), FailureKind::Generic);
        assert_eq!(c.classify(90099), FailureKind::RateLimit);
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let err = ErrorClassification::new(vec![
            (100..=200, FailureKind::Auth),
            (150..=300, FailureKind::RateLimit),
        ])
        .unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert!(ErrorClassification::new(vec![(5..=1, FailureKind::Auth)]).is_err());
    }

    #[test]
    fn describe_prefers_known_message() {
        let c = ErrorClassification::default();
        assert_eq!(c.describe(60121, Some("no such user")), "user not found");
        assert_eq!(c.describe(77777, Some("vendor text")), "vendor text");
        assert_eq!(c.describe(77777, Some("  ")), "unrecognised error code 77777");
        let custom = ErrorClassification::default().with_message(77777, "mapped");
        assert_eq!(custom.describe(77777, None), "mapped");
    }

    proptest! {
        #[test]
        fn every_code_classifies(code in any::<i64>()) {
            let c = ErrorClassification::default();
            let kind = c.classify(code);
            let in_auth = AUTH_RANGES.iter().any(|r| r.contains(&code));
            let in_rate = RATE_LIMIT_RANGES.iter().any(|r| r.contains(&code));
            prop_assert_eq!(kind == FailureKind::Auth, in_auth);
            prop_assert_eq!(kind == FailureKind::RateLimit, in_rate);
        }
    }
}
