//! Controllable clocks and retry doubles.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::{BackoffJitter, FetchSleeper, MonotonicClock};

/// Wall clock that only moves when told to.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: Duration) {
        let delta = match TimeDelta::from_std(delta) {
            Ok(delta) => delta,
            Err(error) => {
                panic!("failed to convert Duration to TimeDelta: {error}; delta={delta:?}",)
            }
        };
        *self.lock_clock() += delta;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock_clock() = now;
    }

    fn lock_clock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("clock mutex"),
        }
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

/// Monotonic clock pinned to a base instant plus a manual offset.
pub struct ManualMonotonicClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualMonotonicClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, delta: Duration) {
        let mut offset = match self.offset.lock() {
            Ok(offset) => offset,
            Err(_) => panic!("monotonic clock mutex"),
        };
        *offset += delta;
    }
}

impl Default for ManualMonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for ManualMonotonicClock {
    fn now(&self) -> Instant {
        let offset = match self.offset.lock() {
            Ok(offset) => *offset,
            Err(_) => panic!("monotonic clock mutex"),
        };
        self.base + offset
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateSleeper;

#[async_trait]
impl FetchSleeper for ImmediateSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

#[derive(Default)]
pub struct RecordingSleeper(Mutex<Vec<Duration>>);

impl RecordingSleeper {
    /// Durations slept so far, in order.
    pub fn recorded(&self) -> Vec<Duration> {
        match self.0.lock() {
            Ok(entries) => entries.clone(),
            Err(_) => panic!("sleeper mutex"),
        }
    }
}

#[async_trait]
impl FetchSleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        let mut entries = match self.0.lock() {
            Ok(entries) => entries,
            Err(_) => panic!("sleeper mutex"),
        };
        entries.push(duration);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl BackoffJitter for NoJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32, _now: DateTime<Utc>) -> Duration {
        base
    }
}
