//! Clocks and the cached request timestamp.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// Wall-clock time.
    fn utc(&self) -> DateTime<Utc>;

    /// Monotonic time.
    fn instant(&self) -> Instant;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<(DateTime<Utc>, Instant)>,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new((start, Instant::now())),
        }
    }

    /// Move both readings forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.0 += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        state.1 += by;
    }
}

impl Clock for ManualClock {
    fn utc(&self) -> DateTime<Utc> {
        self.state.lock().0
    }

    fn instant(&self) -> Instant {
        self.state.lock().1
    }
}

/// HTTP date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn rfc1123(time: &DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Second-precision ISO 8601, e.g. `1994-11-06T08:49:37Z`.
pub fn iso8601(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

struct Stamp {
    value: String,
    expires: Instant,
}

/// Formatted timestamp, recomputed at most once per second.
pub struct TimestampCache {
    clock: Arc<dyn Clock>,
    format: fn(&DateTime<Utc>) -> String,
    current: RwLock<Option<Stamp>>,
}

impl fmt::Debug for TimestampCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimestampCache")
            .field("current", &self.current.read().as_ref().map(|s| s.value.clone()))
            .finish()
    }
}

impl TimestampCache {
    /// Create a cache that formats the clock's time with `format`.
    pub fn new(clock: Arc<dyn Clock>, format: fn(&DateTime<Utc>) -> String) -> Self {
        Self {
            clock,
            format,
            current: RwLock::new(None),
        }
    }

    /// HTTP date timestamps from `clock`.
    pub fn rfc1123(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, rfc1123)
    }

    /// ISO 8601 timestamps from `clock`.
    pub fn iso8601(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, iso8601)
    }

    /// The current timestamp.
    pub fn get(&self) -> String {
        let now = self.clock.instant();
        if let Some(stamp) = self.current.read().as_ref()
            && now < stamp.expires
        {
            return stamp.value.clone();
        }

        let mut current = self.current.write();
        // Another caller may have refreshed while we waited for the lock.
        if let Some(stamp) = current.as_ref()
            && now < stamp.expires
        {
            return stamp.value.clone();
        }
        let value = (self.format)(&self.clock.utc());
        *current = Some(Stamp {
            value: value.clone(),
            expires: now + REFRESH_INTERVAL,
        });
        value
    }
}
