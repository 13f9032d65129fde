// SPDX-License-Identifier: MIT

//! `Response`: the daemon's answer to one `Request`.

use mux_core::{AppState, ConnectionState, StartupMode};
use serde::{Deserialize, Serialize};

/// A CLI/UI-facing projection of one upstream's current state; smaller
/// and wire-stable compared to shipping `mux_core::Upstream` verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamSummary {
    pub name: String,
    pub startup_mode: StartupMode,
    pub connection_state: ConnectionState,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_disable_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSearchHit {
    pub upstream: String,
    pub tool: String,
    pub description: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    Ok,
    Pong,
    Status {
        app_state: AppState,
        uptime_secs: u64,
        upstream_count: usize,
    },
    Tools {
        hits: Vec<ToolSearchHit>,
    },
    ToolResult {
        value: serde_json::Value,
    },
    ToolsStat {
        stats: Vec<(String, u64)>,
    },
    Upstreams {
        upstreams: Vec<UpstreamSummary>,
    },
    Upstream {
        upstream: UpstreamSummary,
    },
    GroupToggled {
        total_updated: u32,
    },
    Log {
        lines: Vec<String>,
    },
    ShuttingDown,
    Error {
        message: String,
        /// §7's error taxonomy, stringified for wire stability
        /// (`timeout`, `oauth`, `network`, `config`, `permission`,
        /// `missing_package`, `protocol`, `internal`, `user`).
        category: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode, encode};

    #[test]
    fn status_round_trips() {
        let resp = Response::Status {
            app_state: AppState::Running,
            uptime_secs: 42,
            upstream_count: 3,
        };
        let framed = encode(&resp).unwrap();
        let back: Response = decode(&framed).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn error_response_carries_a_category() {
        let resp = Response::Error {
            message: "upstream \"ghost\" not found".into(),
            category: "user".into(),
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["category"], "user");
    }
}
