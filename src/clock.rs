//! Time source for freshness decisions

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Clock that only moves when told to. Useful for driving freshness windows
/// deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Clock starting at `secs` seconds past the Unix epoch
    pub fn at_secs(secs: i64) -> Self {
        let start = DateTime::<Utc>::from_timestamp(secs, 0)
            .map(Timestamp::from)
            .unwrap_or_else(Timestamp::now);
        Self::new(start)
    }

    pub fn set(&self, now: Timestamp) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        if let Some(next) = now.as_datetime().checked_add_signed(delta) {
            *now = Timestamp::from(next);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
