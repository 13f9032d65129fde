// SPDX-License-Identifier: MIT

//! `Router` (§4.7): the single façade `retrieve_tools`/`call_tool`/
//! `upstream_servers`/`tools_stat` are served from, wired on top of
//! Storage, the Index Adapter, and the Upstream Manager's Managed
//! Clients. Never mutates state directly — every write goes through
//! `UpstreamManager`'s two-phase-commit ops.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use mux_client::client::logs_dir;
use mux_core::tool::parse_public_id;
use mux_core::{StartupMode, ToolMetadata, Upstream};
use mux_index::{IndexAdapter, SearchHit};
use mux_manager::UpstreamManager;
use mux_storage::Storage;

use crate::error::RouterError;
use crate::truncate::truncate_tool_result;

pub struct Router {
    storage: Arc<Storage>,
    index: Arc<dyn IndexAdapter>,
    manager: UpstreamManager,
    data_dir: PathBuf,
    tool_response_limit: usize,
}

impl Router {
    pub fn new(
        storage: Arc<Storage>,
        index: Arc<dyn IndexAdapter>,
        manager: UpstreamManager,
        data_dir: PathBuf,
        tool_response_limit: usize,
    ) -> Self {
        Self {
            storage,
            index,
            manager,
            data_dir,
            tool_response_limit,
        }
    }

    /// §4.7 `retrieve_tools(query, limit?)`: consults the Index Adapter,
    /// then drops any hit whose upstream is currently
    /// disabled/quarantined/auto-disabled — an upstream can fall into one
    /// of those modes after its tools were indexed, and this is the one
    /// place that matters since the Index itself has no notion of
    /// `startup_mode`.
    pub async fn retrieve_tools(&self, query: &str, limit: Option<usize>) -> Vec<SearchHit> {
        let limit = limit.unwrap_or(20);
        // over-fetch so filtering forbidden upstreams doesn't starve the
        // caller of `limit` results when some hits get dropped
        let hits = self.index.search(query, limit.saturating_mul(4).max(limit)).await;
        hits.into_iter()
            .filter(|hit| !self.is_excluded(&hit.upstream))
            .take(limit)
            .collect()
    }

    fn is_excluded(&self, upstream: &str) -> bool {
        match self.manager.client(upstream) {
            Some(client) => client.machine().startup_mode().excluded_from_app_state(),
            None => true,
        }
    }

    /// §4.7 `call_tool(name, args_json)`: parses `"{upstream}:{tool}"`,
    /// rejects upstreams that are absent/quarantined/disabled/
    /// auto-disabled, forwards to the Managed Client, truncates an
    /// oversized result, and records the call in `tool_stats`.
    pub async fn call_tool(&self, public_id: &str, args: serde_json::Value) -> Result<serde_json::Value, RouterError> {
        let (upstream, tool) = parse_public_id(public_id).ok_or_else(|| RouterError::MalformedToolId(public_id.to_string()))?;

        let client = self
            .manager
            .client(upstream)
            .ok_or_else(|| RouterError::UpstreamNotFound(upstream.to_string()))?;
        if client.machine().startup_mode().is_connect_forbidden() {
            return Err(RouterError::UpstreamUnavailable(upstream.to_string()));
        }

        let result = client.call_tool(tool, args).await?;
        let truncated = truncate_tool_result(&result, self.tool_response_limit);
        self.storage.increment_tool_stats(public_id)?;
        Ok(truncated)
    }

    pub fn list_upstreams(&self) -> Result<Vec<Upstream>, RouterError> {
        Ok(self.manager.list_upstreams()?)
    }

    pub fn get_upstream(&self, name: &str) -> Result<Upstream, RouterError> {
        Ok(self.manager.upstream(name)?)
    }

    pub async fn add_upstream(&self, entry: serde_json::Value) -> Result<(), RouterError> {
        Ok(self.manager.add_upstream(entry).await?)
    }

    pub async fn remove_upstream(&self, name: &str) -> Result<(), RouterError> {
        Ok(self.manager.remove_upstream(name).await?)
    }

    pub async fn patch_upstream(&self, name: &str, patch: serde_json::Value) -> Result<(), RouterError> {
        Ok(self.manager.patch_upstream(name, patch).await?)
    }

    pub fn toggle_group(&self, group_id: i64, enabled: bool) -> Result<u32, RouterError> {
        Ok(self.manager.toggle_group_servers(group_id, enabled)?)
    }

    pub fn enable_upstream(&self, name: &str, enabled: bool) -> Result<(), RouterError> {
        Ok(self.manager.enable_server(name, enabled)?)
    }

    pub fn quarantine_upstream(&self, name: &str, on: bool) -> Result<(), RouterError> {
        Ok(self.manager.quarantine_server(name, on)?)
    }

    pub async fn restart_upstream(&self, name: &str) -> Result<(), RouterError> {
        Ok(self.manager.restart_server(name).await?)
    }

    pub fn clear_auto_disable(&self, name: &str) -> Result<(), RouterError> {
        Ok(self.manager.clear_auto_disable(name)?)
    }

    pub fn tools_for_upstream(&self, upstream: &str) -> Result<Vec<ToolMetadata>, RouterError> {
        Ok(self.storage.get_tool_metadata(upstream)?)
    }

    /// Tails the last `lines` lines of an upstream's stderr sink (the
    /// file `ManagedClient::connect` wires every stdio session's stderr
    /// into), for the `tail_log` operational verb.
    pub fn tail_log(&self, upstream: &str, lines: usize) -> Result<Vec<String>, RouterError> {
        let lines = lines.clamp(1, 1000);
        let path = logs_dir(&self.data_dir).join(format!("{upstream}.stderr.log"));
        let Ok(file) = std::fs::File::open(&path) else {
            return Ok(Vec::new());
        };
        let all: Vec<String> = BufReader::new(file).lines().map_while(Result::ok).collect();
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].to_vec())
    }

    /// §4.7 `tools_stat(topN)`: read-only aggregation from Storage, no
    /// Manager or Index involvement.
    pub fn tools_stat(&self, top_n: usize) -> Result<Vec<(String, u64)>, RouterError> {
        let mut stats = self.storage.list_tool_stats()?;
        stats.truncate(top_n);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_bus::EventBus;
    use mux_config::ConfigLoader;
    use mux_core::clock::{FakeClock, SharedClock};
    use mux_index::InMemoryIndex;
    use mux_manager::ManagerConfig;
    use std::time::Duration;

    fn router(dir: &tempfile::TempDir) -> (Router, UpstreamManager) {
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let (config, _migrated) = ConfigLoader::load(dir.path().join("mcp_config.json")).unwrap();
        let bus = EventBus::new();
        let index: Arc<dyn IndexAdapter> = Arc::new(InMemoryIndex::new());
        let clock: SharedClock = Arc::new(FakeClock::default());
        let cfg = ManagerConfig {
            data_dir: dir.path().to_path_buf(),
            max_concurrent_connections: 4,
            connect_timeout: Duration::from_millis(200),
            cache_ttl: chrono::Duration::seconds(300),
            default_auto_disable_threshold: 3,
            restart_gap: Duration::from_millis(1),
            disconnect_grace: Duration::from_millis(50),
            health_check_interval: Duration::from_millis(200),
        };
        let manager = UpstreamManager::new(storage.clone(), config, bus, index.clone(), clock, cfg);
        let router = Router::new(storage, index, manager.clone(), dir.path().to_path_buf(), 20_000);
        (router, manager)
    }

    #[tokio::test]
    async fn call_tool_rejects_unknown_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _manager) = router(&dir);
        let err = router.call_tool("ghost:do_thing", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, RouterError::UpstreamNotFound(_)));
    }

    #[tokio::test]
    async fn call_tool_rejects_malformed_id() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _manager) = router(&dir);
        let err = router.call_tool("not-a-composite-id", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, RouterError::MalformedToolId(_)));
    }

    #[tokio::test]
    async fn add_then_remove_upstream_round_trips_through_the_manager() {
        let dir = tempfile::tempdir().unwrap();
        let (router, manager) = router(&dir);
        router
            .add_upstream(serde_json::json!({"name": "gh", "protocol": "stdio", "command": "true"}))
            .await
            .unwrap();
        assert!(manager.client("gh").is_some());

        router.remove_upstream("gh").await.unwrap();
        assert!(manager.client("gh").is_none());
    }

    #[tokio::test]
    async fn tools_stat_truncates_to_top_n() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _manager) = router(&dir);
        router.storage.increment_tool_stats("gh:a").unwrap();
        router.storage.increment_tool_stats("gh:a").unwrap();
        router.storage.increment_tool_stats("gh:b").unwrap();

        let stats = router.tools_stat(1).unwrap();
        assert_eq!(stats, vec![("gh:a".to_string(), 2)]);
    }

    #[tokio::test]
    async fn tail_log_returns_empty_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _manager) = router(&dir);
        assert!(router.tail_log("gh", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn tail_log_returns_only_the_last_n_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _manager) = router(&dir);
        let path = logs_dir(dir.path()).join("gh.stderr.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "line1\nline2\nline3\n").unwrap();

        let tail = router.tail_log("gh", 2).unwrap();
        assert_eq!(tail, vec!["line2".to_string(), "line3".to_string()]);
    }
}
