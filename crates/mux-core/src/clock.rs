// SPDX-License-Identifier: MIT

//! A testable source of time, so backoff and staleness logic can be
//! exercised deterministically instead of racing the wall clock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to. `now()` is derived from an
/// internal offset applied to the instant the clock was created.
#[derive(Debug, Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<FakeClockState>>,
}

#[derive(Debug)]
struct FakeClockState {
    base_instant: Instant,
    base_utc: DateTime<Utc>,
    offset: Duration,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeClockState {
                base_instant: Instant::now(),
                base_utc: start,
                offset: Duration::ZERO,
            })),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.inner.lock();
        state.offset += by;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        let state = self.inner.lock();
        state.base_instant + state.offset
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let state = self.inner.lock();
        state.base_utc + chrono::Duration::from_std(state.offset).unwrap_or(chrono::Duration::zero())
    }
}

pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_both_instant_and_utc() {
        let start = Utc::now();
        let clock = FakeClock::new(start);
        let t0 = clock.now();
        clock.advance(Duration::from_secs(30));
        assert!(clock.now() >= t0 + Duration::from_secs(30));
        assert!(clock.now_utc() >= start + chrono::Duration::seconds(30));
    }
}
