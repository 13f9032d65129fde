// SPDX-License-Identifier: MIT

//! Event types fanned out by the bus (§3, §4.1). State machines publish
//! only these; the Manager subscribes and performs storage/config
//! mutations — no component holds a back-pointer to its publisher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::connection::ConnectionState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    ServerStateChanged {
        server_name: String,
        old_state: ConnectionState,
        new_state: ConnectionState,
        timestamp: DateTime<Utc>,
    },
    ServerAutoDisabled {
        server_name: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ServerConfigChanged {
        server_name: String,
        timestamp: DateTime<Utc>,
    },
    ServerGroupUpdated {
        group_id: i64,
        total_updated: u32,
        timestamp: DateTime<Utc>,
    },
    AppStateChanged {
        old_state: AppState,
        new_state: AppState,
        timestamp: DateTime<Utc>,
    },
    ToolsUpdated {
        server_name: String,
        tool_count: usize,
        timestamp: DateTime<Utc>,
    },
    ToolCalled {
        server_name: String,
        tool_name: String,
        duration_ms: u64,
        success: bool,
        timestamp: DateTime<Utc>,
    },
    ConnectionEstablished {
        server_name: String,
        timestamp: DateTime<Utc>,
    },
    ConnectionLost {
        server_name: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// The event's type discriminant, used by the bus for type-keyed
    /// subscription (`Subscribe(type)` in §4.1).
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ServerStateChanged { .. } => EventKind::ServerStateChanged,
            Event::ServerAutoDisabled { .. } => EventKind::ServerAutoDisabled,
            Event::ServerConfigChanged { .. } => EventKind::ServerConfigChanged,
            Event::ServerGroupUpdated { .. } => EventKind::ServerGroupUpdated,
            Event::AppStateChanged { .. } => EventKind::AppStateChanged,
            Event::ToolsUpdated { .. } => EventKind::ToolsUpdated,
            Event::ToolCalled { .. } => EventKind::ToolCalled,
            Event::ConnectionEstablished { .. } => EventKind::ConnectionEstablished,
            Event::ConnectionLost { .. } => EventKind::ConnectionLost,
        }
    }

    pub fn server_name(&self) -> Option<&str> {
        match self {
            Event::ServerStateChanged { server_name, .. }
            | Event::ServerAutoDisabled { server_name, .. }
            | Event::ServerConfigChanged { server_name, .. }
            | Event::ToolsUpdated { server_name, .. }
            | Event::ConnectionEstablished { server_name, .. }
            | Event::ConnectionLost { server_name, .. } => Some(server_name),
            Event::ToolCalled { server_name, .. } => Some(server_name),
            Event::ServerGroupUpdated { .. } | Event::AppStateChanged { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ServerStateChanged,
    ServerAutoDisabled,
    ServerConfigChanged,
    ServerGroupUpdated,
    AppStateChanged,
    ToolsUpdated,
    ToolCalled,
    ConnectionEstablished,
    ConnectionLost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let e = Event::ConnectionLost {
            server_name: "x".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(e.kind(), EventKind::ConnectionLost);
        assert_eq!(e.server_name(), Some("x"));
    }

    #[test]
    fn group_and_app_state_events_have_no_server_name() {
        let e = Event::ServerGroupUpdated {
            group_id: 1,
            total_updated: 3,
            timestamp: Utc::now(),
        };
        assert_eq!(e.server_name(), None);
    }
}
