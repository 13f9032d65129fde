// SPDX-License-Identifier: MIT

//! Top-level `mcp_config.json` document (§6, abridged format).

use serde::{Deserialize, Serialize};

use crate::entry::{GroupEntry, UpstreamEntry};

pub fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

pub fn default_max_concurrent_connections() -> usize {
    15
}

pub fn default_connection_timeout() -> u64 {
    30
}

pub fn default_tool_response_limit() -> usize {
    20_000
}

pub fn default_tool_cache_ttl() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default = "default_max_concurrent_connections")]
    pub max_concurrent_connections: usize,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    #[serde(default = "default_tool_response_limit")]
    pub tool_response_limit: usize,
    #[serde(default = "default_tool_cache_ttl")]
    pub tool_cache_ttl: u64,
    #[serde(default = "default_true")]
    pub enable_lazy_loading: bool,
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: Vec<UpstreamEntry>,
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: None,
            max_concurrent_connections: default_max_concurrent_connections(),
            connection_timeout: default_connection_timeout(),
            tool_response_limit: default_tool_response_limit(),
            tool_cache_ttl: default_tool_cache_ttl(),
            enable_lazy_loading: true,
            mcp_servers: Vec::new(),
            groups: Vec::new(),
        }
    }
}

impl Config {
    /// Applies the §4.3 migration table to every entry. Returns the names
    /// of entries that were actually changed by the pass (fresh migration
    /// or stray-legacy-field sweep); idempotent across repeated calls.
    pub fn migrate(&mut self) -> Vec<String> {
        let mut migrated = Vec::new();
        for entry in &mut self.mcp_servers {
            if entry.migrate() {
                migrated.push(entry.name.clone());
            }
        }
        migrated
    }

    pub fn find(&self, name: &str) -> Option<&UpstreamEntry> {
        self.mcp_servers.iter().find(|e| e.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut UpstreamEntry> {
        self.mcp_servers.iter_mut().find(|e| e.name == name)
    }

    pub fn group_members(&self, group_id: i64) -> Vec<&UpstreamEntry> {
        self.mcp_servers
            .iter()
            .filter(|e| e.group_id == Some(group_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_section_6() {
        let c = Config::default();
        assert_eq!(c.max_concurrent_connections, 15);
        assert_eq!(c.connection_timeout, 30);
        assert!(c.enable_lazy_loading);
    }

    #[test]
    fn migrate_is_idempotent_across_whole_document() {
        let json = serde_json::json!({
            "mcpServers": [
                {"name": "a", "protocol": "stdio", "command": "true", "quarantined": true},
                {"name": "b", "protocol": "stdio", "command": "true", "enabled": false},
            ]
        });
        let mut c: Config = serde_json::from_value(json).unwrap();
        let first = c.migrate();
        assert_eq!(first.len(), 2);
        let second = c.migrate();
        assert!(second.is_empty(), "no entry should need re-migrating");
    }
}
