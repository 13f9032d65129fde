// SPDX-License-Identifier: MIT

//! Per-upstream state machine (§4.4): current `startup_mode` (intent),
//! current `ConnectionState` (runtime), `FailureCounters`, and the
//! auto-disable threshold. One mutex per upstream; callbacks fire outside
//! the lock to avoid reentrancy deadlocks (§5).

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::SharedClock;
use crate::connection::ConnectionState;
use crate::failure::FailureCounters;
use crate::upstream::StartupMode;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// Snapshot of a state machine's runtime state, returned by
/// `GetConnectionInfo` for observers (dashboards, the CLI `status` view).
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub server_name: String,
    pub startup_mode: StartupMode,
    pub connection_state: ConnectionState,
    pub consecutive_failures: u32,
    pub is_oauth_error: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Outcome of `HandleConnectionFailure`, telling the caller (Managed
/// Client / Manager) whether auto-disable must now be triggered. The
/// state machine itself never calls into Storage — it only reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Continue,
    TripAutoDisable,
}

struct Inner {
    startup_mode: StartupMode,
    connection_state: ConnectionState,
    failures: FailureCounters,
    connected_at: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
    auto_disable_threshold: u32,
}

/// A single upstream's authoritative runtime state. Cheaply cloneable
/// (`Arc` inside); safe to share between the Managed Client's connect
/// loop, the health-check ticker, and the Router's reject-fast path.
#[derive(Clone)]
pub struct UpstreamStateMachine {
    server_name: Arc<str>,
    clock: SharedClock,
    inner: Arc<Mutex<Inner>>,
}

impl UpstreamStateMachine {
    pub fn new(server_name: impl Into<Arc<str>>, startup_mode: StartupMode, auto_disable_threshold: u32, clock: SharedClock) -> Self {
        Self {
            server_name: server_name.into(),
            clock,
            inner: Arc::new(Mutex::new(Inner {
                startup_mode,
                connection_state: ConnectionState::Disconnected,
                failures: FailureCounters::new(),
                connected_at: None,
                last_success_time: None,
                last_error: None,
                auto_disable_threshold,
            })),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn startup_mode(&self) -> StartupMode {
        self.inner.lock().startup_mode
    }

    /// Intent changed by the Manager (enable/disable/quarantine/etc). Does
    /// not itself touch `ConnectionState`; callers drive reconnection or
    /// disconnection separately per §4.6.
    pub fn set_startup_mode(&self, mode: StartupMode) {
        let mut inner = self.inner.lock();
        inner.startup_mode = mode;
        if mode == StartupMode::AutoDisabled {
            inner.failures.reset_on_auto_disable();
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().connection_state
    }

    /// Validated transition (§4.4's table). Invalid transitions return an
    /// error without mutating any state.
    pub fn transition_to(&self, new_state: ConnectionState) -> Result<ConnectionState, TransitionError> {
        let mut inner = self.inner.lock();
        let from = inner.connection_state;
        if !from.can_transition_to(new_state) {
            return Err(TransitionError::InvalidTransition { from, to: new_state });
        }
        inner.connection_state = new_state;
        if new_state == ConnectionState::Ready {
            let now = self.clock.now_utc();
            inner.failures.reset_on_ready();
            inner.connected_at = Some(now);
            inner.last_success_time = Some(now);
            inner.last_error = None;
        }
        Ok(from)
    }

    /// Record a transport error: increments counters and moves into
    /// `Error`, clobbering any in-flight non-Error state.
    pub fn set_error(&self, err: impl Into<String>) -> Result<ConnectionState, TransitionError> {
        let err = err.into();
        {
            let mut inner = self.inner.lock();
            inner.failures.record_ordinary_failure(self.clock.now());
            inner.last_error = Some(err);
        }
        self.force_into_error()
    }

    /// As `set_error`, but classified as an OAuth failure (distinct,
    /// longer backoff schedule; `is_oauth_error` stays sticky until the
    /// next success).
    pub fn set_oauth_error(&self, err: impl Into<String>) -> Result<ConnectionState, TransitionError> {
        let err = err.into();
        {
            let mut inner = self.inner.lock();
            inner.failures.record_oauth_failure(self.clock.now());
            inner.last_error = Some(err);
        }
        self.force_into_error()
    }

    fn force_into_error(&self) -> Result<ConnectionState, TransitionError> {
        let mut inner = self.inner.lock();
        let from = inner.connection_state;
        if from == ConnectionState::Error {
            return Ok(from);
        }
        if !from.can_transition_to(ConnectionState::Error) {
            return Err(TransitionError::InvalidTransition {
                from,
                to: ConnectionState::Error,
            });
        }
        inner.connection_state = ConnectionState::Error;
        Ok(from)
    }

    /// Reports whether `consecutive_failures` has already crossed the
    /// auto-disable threshold for an upstream still in `active`/
    /// `lazy_loading`. Never touches Storage itself (§9: state machines
    /// only publish, the Manager performs mutations).
    pub fn handle_connection_failure(&self) -> FailureOutcome {
        let mut inner = self.inner.lock();
        if !inner.failures.trips_threshold(inner.auto_disable_threshold) {
            return FailureOutcome::Continue;
        }
        if matches!(inner.startup_mode, StartupMode::Active | StartupMode::LazyLoading) {
            FailureOutcome::TripAutoDisable
        } else {
            FailureOutcome::Continue
        }
    }

    /// Explicit counter reset used by `ClearAutoDisable` (§4.6): distinct
    /// from the implicit reset on entering `Ready`, since clearing an
    /// auto-disable happens before any reconnection attempt has succeeded.
    pub fn reset_failure_counters(&self) {
        let mut inner = self.inner.lock();
        inner.failures = FailureCounters::new();
    }

    pub fn should_retry(&self) -> bool {
        let inner = self.inner.lock();
        inner.failures.should_retry(self.clock.now())
    }

    pub fn should_retry_oauth(&self) -> bool {
        let inner = self.inner.lock();
        inner.failures.should_retry_oauth(self.clock.now())
    }

    pub fn last_retry_instant(&self) -> Option<Instant> {
        self.inner.lock().failures.last_retry_time
    }

    pub fn get_connection_info(&self) -> ConnectionInfo {
        let inner = self.inner.lock();
        ConnectionInfo {
            server_name: self.server_name.to_string(),
            startup_mode: inner.startup_mode,
            connection_state: inner.connection_state,
            consecutive_failures: inner.failures.consecutive_failures,
            is_oauth_error: inner.failures.is_oauth_error,
            connected_at: inner.connected_at,
            last_success_time: inner.last_success_time,
            last_error: inner.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use std::sync::Arc as StdArc;

    fn machine(mode: StartupMode, threshold: u32) -> UpstreamStateMachine {
        let clock: SharedClock = StdArc::new(FakeClock::default());
        UpstreamStateMachine::new("svc", mode, threshold, clock)
    }

    #[test]
    fn invalid_transition_is_a_no_op() {
        let m = machine(StartupMode::Active, 3);
        let before = m.connection_state();
        let err = m.transition_to(ConnectionState::Ready).unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Ready,
            }
        );
        assert_eq!(m.connection_state(), before);
    }

    #[test]
    fn entering_ready_clears_failure_counters() {
        let m = machine(StartupMode::Active, 3);
        m.transition_to(ConnectionState::Connecting).unwrap();
        let _ = m.set_error("boom");
        m.transition_to(ConnectionState::Connecting).unwrap();
        m.transition_to(ConnectionState::Ready).unwrap();
        let info = m.get_connection_info();
        assert_eq!(info.consecutive_failures, 0);
        assert!(info.connected_at.is_some());
    }

    #[test]
    fn handle_connection_failure_trips_at_threshold_for_active_only() {
        let m = machine(StartupMode::Active, 2);
        m.transition_to(ConnectionState::Connecting).unwrap();
        let _ = m.set_error("e1");
        assert_eq!(m.handle_connection_failure(), FailureOutcome::Continue);
        m.transition_to(ConnectionState::Connecting).unwrap();
        let _ = m.set_error("e2");
        assert_eq!(m.handle_connection_failure(), FailureOutcome::TripAutoDisable);
    }

    #[test]
    fn handle_connection_failure_never_trips_for_quarantined() {
        let m = machine(StartupMode::Quarantined, 1);
        m.transition_to(ConnectionState::Connecting).unwrap();
        let _ = m.set_error("e1");
        assert_eq!(m.handle_connection_failure(), FailureOutcome::Continue);
    }

    #[test]
    fn auto_disable_resets_only_consecutive_failures() {
        let m = machine(StartupMode::Active, 5);
        m.transition_to(ConnectionState::Connecting).unwrap();
        let _ = m.set_error("e1");
        m.set_startup_mode(StartupMode::AutoDisabled);
        let info = m.get_connection_info();
        assert_eq!(info.consecutive_failures, 0);
    }
}
