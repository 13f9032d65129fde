// SPDX-License-Identifier: MIT

//! Runtime `ConnectionState` and its transition table (§4.4). Never
//! persisted: restarting the process always starts every upstream at
//! `Disconnected` and lets reconciliation/health-checks re-derive it.

use serde::{Deserialize, Serialize};

use crate::simple_display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Discovering,
    Ready,
    Error,
    Sleeping,
}

simple_display!(ConnectionState {
    Disconnected => "disconnected",
    Connecting => "connecting",
    Authenticating => "authenticating",
    Discovering => "discovering",
    Ready => "ready",
    Error => "error",
    Sleeping => "sleeping",
});

impl ConnectionState {
    /// The allowed-transitions table from §4.4. `Sleeping` is reachable
    /// only from `Ready` (lazy-loading upstreams idling down) and leaves
    /// only back into `Connecting` on wake.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        if self == to {
            return false;
        }
        match self {
            Disconnected => matches!(to, Connecting),
            Connecting => matches!(to, Disconnected | Authenticating | Discovering | Ready | Error),
            Authenticating => matches!(to, Disconnected | Connecting | Discovering | Ready | Error),
            Discovering => matches!(to, Disconnected | Ready | Error),
            Ready => matches!(to, Disconnected | Error | Sleeping),
            Error => matches!(to, Disconnected | Connecting),
            Sleeping => matches!(to, Connecting | Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn disconnected_only_goes_to_connecting() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Ready));
        assert!(!Disconnected.can_transition_to(Error));
    }

    #[test]
    fn ready_only_leaves_to_disconnected_error_or_sleeping() {
        assert!(Ready.can_transition_to(Disconnected));
        assert!(Ready.can_transition_to(Error));
        assert!(Ready.can_transition_to(Sleeping));
        assert!(!Ready.can_transition_to(Connecting));
        assert!(!Ready.can_transition_to(Discovering));
    }

    #[test]
    fn sleeping_only_reachable_from_ready() {
        for s in [Disconnected, Connecting, Authenticating, Discovering, Error] {
            assert!(!s.can_transition_to(Sleeping), "{s:?} must not reach Sleeping");
        }
        assert!(Ready.can_transition_to(Sleeping));
    }

    #[test]
    fn no_state_transitions_to_itself() {
        for s in [Disconnected, Connecting, Authenticating, Discovering, Ready, Error, Sleeping] {
            assert!(!s.can_transition_to(s));
        }
    }
}
