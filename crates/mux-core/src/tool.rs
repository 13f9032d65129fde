// SPDX-License-Identifier: MIT

//! `ToolMetadata`: descriptor of one upstream tool, keyed by the composite
//! `(upstream, tool)` pair and addressed publicly as `"{upstream}:{tool}"`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub upstream: String,
    pub tool: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolMetadata {
    pub fn new(
        upstream: impl Into<String>,
        tool: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        let upstream = upstream.into();
        let tool = tool.into();
        let description = description.into();
        let content_hash = hash_tool(&tool, &description, &input_schema);
        Self {
            upstream,
            tool,
            description,
            input_schema,
            content_hash,
            created_at: now,
            updated_at: now,
        }
    }

    /// The public, prefixed identifier routed on by `call_tool`.
    pub fn public_id(&self) -> String {
        public_id(&self.upstream, &self.tool)
    }

    /// Storage key: `"{upstream}:{tool}"`, stable across rehashes.
    pub fn storage_key(&self) -> String {
        self.public_id()
    }
}

pub fn public_id(upstream: &str, tool: &str) -> String {
    format!("{upstream}:{tool}")
}

/// Splits `"{upstream}:{tool}"` into its parts. Tool names never contain
/// `:`, so the first separator is authoritative.
pub fn parse_public_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(':')
}

fn hash_tool(tool: &str, description: &str, schema: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update(b"\0");
    hasher.update(description.as_bytes());
    hasher.update(b"\0");
    hasher.update(schema.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash of an entire tool list, used by the Managed Client's cache to
/// decide whether a re-fetch actually changed anything (§4.5.3).
pub fn hash_tool_list(tools: &[ToolMetadata]) -> String {
    let mut hasher = Sha256::new();
    for t in tools {
        hasher.update(t.tool.as_bytes());
        hasher.update(b"\0");
        hasher.update(t.content_hash.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_id_round_trips() {
        let id = public_id("github", "create_issue");
        assert_eq!(parse_public_id(&id), Some(("github", "create_issue")));
    }

    #[test]
    fn content_hash_is_stable_for_identical_input() {
        let now = Utc::now();
        let a = ToolMetadata::new("gh", "t", "desc", serde_json::json!({"a": 1}), now);
        let b = ToolMetadata::new("gh", "t", "desc", serde_json::json!({"a": 1}), now);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn content_hash_changes_with_description() {
        let now = Utc::now();
        let a = ToolMetadata::new("gh", "t", "desc one", serde_json::json!({}), now);
        let b = ToolMetadata::new("gh", "t", "desc two", serde_json::json!({}), now);
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn list_hash_is_order_sensitive_but_deterministic() {
        let now = Utc::now();
        let tools = vec![
            ToolMetadata::new("gh", "a", "d", serde_json::json!({}), now),
            ToolMetadata::new("gh", "b", "d", serde_json::json!({}), now),
        ];
        let h1 = hash_tool_list(&tools);
        let h2 = hash_tool_list(&tools);
        assert_eq!(h1, h2);
    }
}
