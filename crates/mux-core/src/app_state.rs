// SPDX-License-Identifier: MIT

//! Derived, never-persisted application state (§3, §4.6 aggregation).

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionState;
use crate::simple_display;
use crate::upstream::StartupMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Starting,
    Running,
    Degraded,
    Stopping,
    Stopped,
}

simple_display!(AppState {
    Starting => "starting",
    Running => "running",
    Degraded => "degraded",
    Stopping => "stopping",
    Stopped => "stopped",
});

/// Process-wide lifecycle phase, layered on top of per-upstream folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPhase {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Fold per-upstream `(startup_mode, connection_state)` pairs into the
/// derived `AppState`, per §4.6's "App-state aggregation":
///
/// - `E` = upstreams whose `startup_mode` is not in
///   `{disabled, quarantined, auto_disabled, stopped}`.
/// - `E` empty, or every member `Ready` with a stable mode → `Running`.
/// - Else if any member is `Error` → `Degraded`.
/// - The process phase overrides during startup/shutdown windows.
pub fn aggregate(
    phase: ProcessPhase,
    upstreams: impl Iterator<Item = (StartupMode, ConnectionState)>,
) -> AppState {
    match phase {
        ProcessPhase::Starting => return AppState::Starting,
        ProcessPhase::Stopping => return AppState::Stopping,
        ProcessPhase::Stopped => return AppState::Stopped,
        ProcessPhase::Running => {}
    }

    let e: Vec<(StartupMode, ConnectionState)> = upstreams
        .filter(|(mode, _)| !mode.excluded_from_app_state())
        .collect();

    if e.is_empty() {
        return AppState::Running;
    }

    let all_ready_and_stable = e.iter().all(|(mode, conn)| {
        *conn == ConnectionState::Ready
            && matches!(mode, StartupMode::Active | StartupMode::LazyLoading)
    });
    if all_ready_and_stable {
        return AppState::Running;
    }

    if e.iter().any(|(_, conn)| *conn == ConnectionState::Error) {
        return AppState::Degraded;
    }

    // Mixed but not erroring (e.g. some still Connecting/Discovering): the
    // spec only names Running/Degraded for the steady Running phase, so a
    // transitional mix without errors is reported as Running.
    AppState::Running
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_is_running() {
        assert_eq!(
            aggregate(ProcessPhase::Running, std::iter::empty()),
            AppState::Running
        );
    }

    #[test]
    fn all_ready_is_running() {
        let v = vec![
            (StartupMode::Active, ConnectionState::Ready),
            (StartupMode::LazyLoading, ConnectionState::Ready),
        ];
        assert_eq!(aggregate(ProcessPhase::Running, v.into_iter()), AppState::Running);
    }

    #[test]
    fn any_error_is_degraded() {
        let v = vec![
            (StartupMode::Active, ConnectionState::Ready),
            (StartupMode::Active, ConnectionState::Error),
        ];
        assert_eq!(aggregate(ProcessPhase::Running, v.into_iter()), AppState::Degraded);
    }

    #[test]
    fn disabled_and_quarantined_upstreams_are_excluded_from_e() {
        let v = vec![
            (StartupMode::Disabled, ConnectionState::Error),
            (StartupMode::Quarantined, ConnectionState::Error),
            (StartupMode::AutoDisabled, ConnectionState::Error),
        ];
        assert_eq!(aggregate(ProcessPhase::Running, v.into_iter()), AppState::Running);
    }

    #[test]
    fn process_phase_overrides_steady_state() {
        let v = vec![(StartupMode::Active, ConnectionState::Error)];
        assert_eq!(aggregate(ProcessPhase::Starting, v.clone().into_iter()), AppState::Starting);
        assert_eq!(aggregate(ProcessPhase::Stopping, v.clone().into_iter()), AppState::Stopping);
        assert_eq!(aggregate(ProcessPhase::Stopped, v.into_iter()), AppState::Stopped);
    }
}
