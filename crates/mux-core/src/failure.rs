// SPDX-License-Identifier: MIT

//! In-memory failure accounting and backoff arithmetic (§4.4, §8 boundary
//! behaviour). Never persisted: a restart starts every counter at zero.

use std::time::{Duration, Instant};

const ORDINARY_CAP_SECS: u64 = 300;
const ORDINARY_MAX_SHIFT: u32 = 30;

/// OAuth backoff is a fixed escalation ladder rather than an exponential
/// curve: 5 min, 15 min, 1 h, 4 h, 24 h, then capped at the last rung.
const OAUTH_BACKOFF_SECS: [u64; 5] = [300, 900, 3600, 14400, 86400];

#[derive(Debug, Clone, Default)]
pub struct FailureCounters {
    pub consecutive_failures: u32,
    pub retry_count: u32,
    pub last_retry_time: Option<Instant>,
    pub oauth_retry_count: u32,
    pub last_oauth_attempt: Option<Instant>,
    pub first_attempt_time: Option<Instant>,
    pub is_oauth_error: bool,
}

impl FailureCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// (I6) Reset entirely on a successful transition into `Ready`.
    pub fn reset_on_ready(&mut self) {
        *self = Self::default();
    }

    /// (I6) `consecutive_failures` resets on transition into `auto_disabled`;
    /// retry bookkeeping for the *next* manual re-enable starts fresh too.
    pub fn reset_on_auto_disable(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_ordinary_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_retry_time = Some(now);
        self.first_attempt_time.get_or_insert(now);
        self.is_oauth_error = false;
    }

    pub fn record_oauth_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.oauth_retry_count = self.oauth_retry_count.saturating_add(1);
        self.last_oauth_attempt = Some(now);
        self.first_attempt_time.get_or_insert(now);
        self.is_oauth_error = true;
    }

    /// `true` once `consecutive_failures` has reached `threshold`.
    pub fn trips_threshold(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold
    }

    /// Exponential backoff for ordinary transport errors: `1,2,4,8,...`
    /// seconds, capped at 300s. `retry_count - 1` is bounds-checked before
    /// the shift so long-lived error states never overflow `u64`.
    pub fn ordinary_backoff(&self) -> Duration {
        backoff_for(self.retry_count, ORDINARY_CAP_SECS, ORDINARY_MAX_SHIFT)
    }

    /// `true` once enough time has elapsed since `last_retry_time` to retry.
    pub fn should_retry(&self, now: Instant) -> bool {
        match self.last_retry_time {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.ordinary_backoff(),
        }
    }

    /// Fixed OAuth escalation ladder, capped at the longest rung.
    pub fn oauth_backoff(&self) -> Duration {
        let idx = self.oauth_retry_count.saturating_sub(1) as usize;
        let secs = OAUTH_BACKOFF_SECS
            .get(idx)
            .copied()
            .unwrap_or(*OAUTH_BACKOFF_SECS.last().unwrap_or(&86400));
        Duration::from_secs(secs)
    }

    pub fn should_retry_oauth(&self, now: Instant) -> bool {
        match self.last_oauth_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.oauth_backoff(),
        }
    }
}

/// `delay = min(cap, 2^(retry_count-1) seconds)`, with `retry_count == 0`
/// treated as "no failures yet" (zero delay) and the shift clamped so a
/// long-lived error state cannot overflow the exponent.
fn backoff_for(retry_count: u32, cap_secs: u64, max_shift: u32) -> Duration {
    if retry_count == 0 {
        return Duration::ZERO;
    }
    let shift = (retry_count - 1).min(max_shift);
    let secs = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    Duration::from_secs(secs.min(cap_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinary_backoff_sequence_matches_spec() {
        let mut c = FailureCounters::new();
        let expected = [1u64, 2, 4, 8, 16, 32, 64, 128, 256, 300, 300];
        for exp in expected {
            c.record_ordinary_failure(Instant::now());
            assert_eq!(c.ordinary_backoff(), Duration::from_secs(exp));
        }
    }

    #[test]
    fn ordinary_backoff_never_overflows_for_long_lived_errors() {
        let mut c = FailureCounters::new();
        c.retry_count = u32::MAX;
        assert_eq!(c.ordinary_backoff(), Duration::from_secs(ORDINARY_CAP_SECS));
    }

    #[test]
    fn oauth_backoff_follows_escalation_ladder() {
        let mut c = FailureCounters::new();
        for secs in OAUTH_BACKOFF_SECS {
            c.record_oauth_failure(Instant::now());
            assert_eq!(c.oauth_backoff(), Duration::from_secs(secs));
        }
        // further failures stay capped at the last rung
        c.record_oauth_failure(Instant::now());
        assert_eq!(c.oauth_backoff(), Duration::from_secs(*OAUTH_BACKOFF_SECS.last().unwrap()));
    }

    #[test]
    fn reset_on_ready_clears_everything() {
        let mut c = FailureCounters::new();
        c.record_ordinary_failure(Instant::now());
        c.record_oauth_failure(Instant::now());
        c.reset_on_ready();
        assert_eq!(c.consecutive_failures, 0);
        assert_eq!(c.retry_count, 0);
        assert!(!c.is_oauth_error);
    }

    #[test]
    fn reset_on_auto_disable_only_clears_consecutive_failures() {
        let mut c = FailureCounters::new();
        c.record_ordinary_failure(Instant::now());
        c.record_ordinary_failure(Instant::now());
        c.reset_on_auto_disable();
        assert_eq!(c.consecutive_failures, 0);
        assert_eq!(c.retry_count, 2);
    }
}
