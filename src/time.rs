use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

pub type Timestamp = DateTime<Utc>;

/// Source of "now" for lease stamping and liveness checks.
///
/// Injected into the engine and the stores so expiry can be driven
/// deterministically in tests.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Clock pinned to a base instant that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Timestamp,
    offset_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(base: Timestamp) -> Self {
        Self {
            base,
            offset_ms: AtomicI64::new(0),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, at: Timestamp) {
        let offset = at.signed_duration_since(self.base).num_milliseconds();
        self.offset_ms.store(offset, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.base + Duration::milliseconds(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Converts a std duration to a chrono one, saturating on overflow.
pub fn to_chrono(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or_else(|_| Duration::max_value())
}
