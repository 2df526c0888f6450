use std::sync::Mutex;

use chrono::{DateTime, Local, TimeDelta};

/// Wall-clock source for calendar boundaries (04:00 prune, year rollover).
///
/// Intervals (debounce, throttle, backoff) use `tokio::time` instead so
/// they stay monotonic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Convert an epoch-millisecond timestamp to device-local time.
#[must_use]
pub fn local_datetime(millis: i64) -> Option<DateTime<Local>> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.with_timezone(&Local))
}

/// `yyyy-MM-dd` key of the local calendar date.
#[must_use]
pub fn date_key(dt: &DateTime<Local>) -> String {
    dt.format("%Y-%m-%d").to_string()
}
