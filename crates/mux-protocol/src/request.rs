// SPDX-License-Identifier: MIT

//! `Request`: one variant per control-plane operation the CLI can ask the
//! daemon to perform (§6's CLI surface plus §4.7's operational verbs).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Liveness check.
    Ping,

    /// §6 `serve` daemon status: uptime, app state, per-upstream counts.
    Status,

    /// §4.7 `retrieve_tools(query, limit?)`.
    RetrieveTools { query: String, limit: Option<usize> },

    /// §4.7 `call_tool(name, args_json)`.
    CallTool { name: String, args: serde_json::Value },

    /// §4.7 `tools_stat(topN)`.
    ToolsStat { top_n: usize },

    /// `upstream_servers(list)`.
    ListUpstreams,

    /// `upstream_servers(add)` / config-entry CRUD.
    AddUpstream { entry: serde_json::Value },

    /// `upstream_servers(remove)`.
    RemoveUpstream { name: String },

    /// `upstream_servers(patch)`.
    PatchUpstream { name: String, patch: serde_json::Value },

    /// `upstream_servers(enable/disable)`.
    EnableUpstream { name: String, enabled: bool },

    /// `upstream_servers(quarantine)`.
    QuarantineUpstream { name: String, on: bool },

    /// `upstream_servers(restart)`.
    RestartUpstream { name: String },

    /// Manual `ClearAutoDisable(name)`.
    ClearAutoDisable { name: String },

    /// Bulk group toggle (§4.6 `toggle_group_servers`).
    ToggleGroup { group_id: i64, enabled: bool },

    /// `upstream_servers(tail_log)`.
    TailLog { name: String, lines: usize },

    /// Ask the daemon to shut down cleanly (§5 shutdown sequence).
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode, encode};

    #[test]
    fn call_tool_round_trips_through_the_wire_format() {
        let req = Request::CallTool {
            name: "gh:issues.list".into(),
            args: serde_json::json!({"state": "open"}),
        };
        let framed = encode(&req).unwrap();
        let back: Request = decode(&framed).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn tagged_enum_serializes_with_a_type_field() {
        let v = serde_json::to_value(Request::Ping).unwrap();
        assert_eq!(v["type"], "Ping");
    }
}
