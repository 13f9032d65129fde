// SPDX-License-Identifier: MIT

//! Index Adapter (C8): an opaque dependency the core consumes for ranked
//! tool search. The actual ranking algorithm (BM25 or otherwise) is out of
//! scope for this workspace (spec.md §1); the core only depends on the
//! contract below — "returns ≤ limit items sorted best-first" — never on
//! any particular scoring semantics.
//!
//! Grounded on the teacher's adapter-trait shape (`oj-adapters`'
//! `SessionAdapter`/`AgentAdapter`: a narrow `async_trait`, plus an
//! in-memory reference double used by the rest of the workspace's tests,
//! mirroring `oj-adapters`' `FakeAgentAdapter`).

use async_trait::async_trait;
use mux_core::ToolMetadata;

/// One ranked search hit. `score` is opaque and only meaningful relative
/// to other hits from the same `search` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub upstream: String,
    pub tool: String,
    pub description: String,
    pub score: f64,
}

#[async_trait]
pub trait IndexAdapter: Send + Sync {
    /// Idempotent upsert by composite key (upstream, tool).
    async fn index_tools(&self, tools: &[ToolMetadata]);

    /// Removes every indexed tool belonging to `upstream`.
    async fn delete_server_tools(&self, upstream: &str);

    /// Returns at most `limit` hits, sorted best-first. Ranking semantics
    /// are implementation-defined; callers must not depend on anything
    /// beyond the ordering and the length bound.
    async fn search(&self, query: &str, limit: usize) -> Vec<SearchHit>;
}

/// Indexes nothing and searches nothing. Useful when the real index
/// backend hasn't started yet, or for an upstream whose tools should never
/// surface through `retrieve_tools` (e.g. while it's still `Connecting`).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIndex;

#[async_trait]
impl IndexAdapter for NullIndex {
    async fn index_tools(&self, _tools: &[ToolMetadata]) {}
    async fn delete_server_tools(&self, _upstream: &str) {}
    async fn search(&self, _query: &str, _limit: usize) -> Vec<SearchHit> {
        Vec::new()
    }
}

/// A reference, dependency-free implementation used across the workspace's
/// own tests (and usable standalone until a real BM25/semantic backend is
/// wired in). Scoring is deliberately naive case-insensitive substring
/// matching over the tool name and description — good enough to exercise
/// the router/manager contract without pulling in a real search engine.
#[derive(Default)]
pub struct InMemoryIndex {
    entries: parking_lot::RwLock<Vec<ToolMetadata>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexAdapter for InMemoryIndex {
    async fn index_tools(&self, tools: &[ToolMetadata]) {
        let mut entries = self.entries.write();
        for tool in tools {
            if let Some(existing) = entries
                .iter_mut()
                .find(|t| t.upstream == tool.upstream && t.tool == tool.tool)
            {
                *existing = tool.clone();
            } else {
                entries.push(tool.clone());
            }
        }
    }

    async fn delete_server_tools(&self, upstream: &str) {
        self.entries.write().retain(|t| t.upstream != upstream);
    }

    async fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let query = query.to_ascii_lowercase();
        let entries = self.entries.read();
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .filter_map(|t| {
                let haystack = format!("{} {}", t.tool, t.description).to_ascii_lowercase();
                if query.is_empty() {
                    return Some(SearchHit {
                        upstream: t.upstream.clone(),
                        tool: t.tool.clone(),
                        description: t.description.clone(),
                        score: 0.0,
                    });
                }
                let occurrences = haystack.matches(&query).count();
                (occurrences > 0).then(|| SearchHit {
                    upstream: t.upstream.clone(),
                    tool: t.tool.clone(),
                    description: t.description.clone(),
                    score: occurrences as f64 + if t.tool.to_ascii_lowercase().contains(&query) { 1.0 } else { 0.0 },
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tool(upstream: &str, name: &str, desc: &str) -> ToolMetadata {
        ToolMetadata::new(upstream, name, desc, serde_json::json!({}), Utc::now())
    }

    #[tokio::test]
    async fn search_respects_limit_and_is_best_first() {
        let idx = InMemoryIndex::new();
        idx.index_tools(&[
            tool("gh", "create_issue", "open a github issue"),
            tool("gh", "close_issue", "close a github issue issue"),
            tool("slack", "send_message", "post a slack message"),
        ])
        .await;

        let hits = idx.search("issue", 1).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tool, "close_issue", "more occurrences of the query should rank first");
    }

    #[tokio::test]
    async fn delete_server_tools_removes_only_that_upstream() {
        let idx = InMemoryIndex::new();
        idx.index_tools(&[tool("gh", "a", "d"), tool("slack", "b", "d")]).await;
        idx.delete_server_tools("gh").await;

        let hits = idx.search("", 10).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].upstream, "slack");
    }

    #[tokio::test]
    async fn index_tools_upserts_by_composite_key() {
        let idx = InMemoryIndex::new();
        idx.index_tools(&[tool("gh", "a", "first")]).await;
        idx.index_tools(&[tool("gh", "a", "second")]).await;

        let hits = idx.search("second", 10).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].description, "second");
    }

    #[tokio::test]
    async fn null_index_never_returns_hits() {
        let idx = NullIndex;
        idx.index_tools(&[tool("gh", "a", "d")]).await;
        assert!(idx.search("a", 10).await.is_empty());
    }
}
