//! Injectable time and nonce sources.
//!
//! Timestamps feed request signing and the creation-time heuristic; nonces
//! feed signing. Both are traits so tests can pin them.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds since the Unix epoch, as stamped on signed requests.
    fn timestamp_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

pub trait NonceSource: Send + Sync {
    fn nonce(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Random v4 UUIDs in simple (hyphen-less) form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidNonce;

impl NonceSource for UuidNonce {
    fn nonce(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Deterministic nonces: `{prefix}-1`, `{prefix}-2`, ...
#[derive(Debug)]
pub struct SequenceNonce {
    prefix: String,
    next: AtomicU64,
}

impl SequenceNonce {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            next: AtomicU64::new(1),
        }
    }
}

impl NonceSource for SequenceNonce {
    fn nonce(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_advances_only_on_request() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
        assert_eq!(clock.timestamp_millis(), start.timestamp_millis() + 90_000);
    }

    #[test]
    fn sequence_nonce_counts_up() {
        let nonces = SequenceNonce::new("n");
        assert_eq!(nonces.nonce(), "n-1");
        assert_eq!(nonces.nonce(), "n-2");
    }

    #[test]
    fn uuid_nonces_are_distinct() {
        let source = UuidNonce;
        let a = source.nonce();
        let b = source.nonce();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
