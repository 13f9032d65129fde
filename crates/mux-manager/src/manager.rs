// SPDX-License-Identifier: MIT

//! `UpstreamManager` (§4.6): owns the live set of Managed Clients, drives
//! reconciliation against `config ∪ storage`, runs the bounded-concurrency
//! connect pass, implements the single-entry-point auto-disable protocol,
//! exposes the manual operations the Router calls into, and runs the
//! background reconnect loop + app-state aggregation subscriber.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mux_bus::EventBus;
use mux_client::{AutoDisableSink, ManagedClient};
use mux_config::ConfigLoader;
use mux_core::clock::SharedClock;
use mux_core::event::Event;
use mux_core::{AppState, ConnectionState, ProcessPhase, StartupMode, Upstream};
use mux_index::IndexAdapter;
use mux_storage::Storage;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::ManagerError;
use crate::failure_log::FailureLog;

/// Tuning knobs that would otherwise be threaded through every method
/// individually; mirrors `mcp_config.json`'s process-wide fields (§6).
pub struct ManagerConfig {
    pub data_dir: PathBuf,
    pub max_concurrent_connections: usize,
    pub connect_timeout: Duration,
    pub cache_ttl: chrono::Duration,
    pub default_auto_disable_threshold: u32,
    pub restart_gap: Duration,
    pub disconnect_grace: Duration,
    pub health_check_interval: Duration,
}

struct Inner {
    storage: Arc<Storage>,
    config: ConfigLoader,
    bus: EventBus,
    index: Arc<dyn IndexAdapter>,
    clock: SharedClock,
    cfg: ManagerConfig,
    clients: RwLock<HashMap<String, Arc<ManagedClient>>>,
    semaphore: Semaphore,
    phase: Mutex<ProcessPhase>,
    app_state: Mutex<AppState>,
    failure_log: FailureLog,
}

/// Owns every Managed Client and the single writer path for startup-mode
/// changes. Cheaply cloneable (`Arc` inside); the background reconnect
/// loop and the app-state subscriber each hold their own clone.
#[derive(Clone)]
pub struct UpstreamManager {
    inner: Arc<Inner>,
}

impl UpstreamManager {
    pub fn new(
        storage: Arc<Storage>,
        config: ConfigLoader,
        bus: EventBus,
        index: Arc<dyn IndexAdapter>,
        clock: SharedClock,
        cfg: ManagerConfig,
    ) -> Self {
        let failure_log = FailureLog::new(&cfg.data_dir);
        let max_concurrent = cfg.max_concurrent_connections.max(1);
        Self {
            inner: Arc::new(Inner {
                storage,
                config,
                bus,
                index,
                clock,
                cfg,
                clients: RwLock::new(HashMap::new()),
                semaphore: Semaphore::new(max_concurrent),
                phase: Mutex::new(ProcessPhase::Starting),
                app_state: Mutex::new(AppState::Starting),
                failure_log,
            }),
        }
    }

    pub fn app_state(&self) -> AppState {
        *self.inner.app_state.lock()
    }

    pub fn client(&self, name: &str) -> Option<Arc<ManagedClient>> {
        self.inner.clients.read().get(name).cloned()
    }

    pub fn clients(&self) -> Vec<Arc<ManagedClient>> {
        self.inner.clients.read().values().cloned().collect()
    }

    pub fn client_names(&self) -> Vec<String> {
        self.inner.clients.read().keys().cloned().collect()
    }

    /// §4.6 `loadConfigured()`: brings the live client set in line with
    /// `config ∪ storage`. Adds clients for newly-configured upstreams,
    /// removes clients (and their tool metadata / index entries / failure
    /// history) for ones no longer in config, and persists every
    /// configured entry to Storage so it has a durable record even before
    /// its first connect attempt.
    pub async fn reconcile(&self) -> Result<(), ManagerError> {
        let snapshot = self.inner.config.snapshot();
        let now = Utc::now();

        let mut configured_names = Vec::with_capacity(snapshot.mcp_servers.len());
        for entry in &snapshot.mcp_servers {
            configured_names.push(entry.name.clone());
            let Some(transport) = entry.to_transport() else {
                warn!(upstream = %entry.name, "skipping reconcile: entry has no valid transport");
                continue;
            };
            let file_mode = entry.startup_mode.unwrap_or(StartupMode::Active);
            let resolved_mode = match self.inner.storage.get_upstream(&entry.name)? {
                Some(existing) => mux_storage::reconcile::resolve_startup_mode(existing.startup_mode, file_mode),
                None => file_mode,
            };

            let mut record = entry
                .clone()
                .into_upstream(now)
                .ok_or_else(|| ManagerError::InvalidTransport(entry.name.clone()))?;
            record.startup_mode = resolved_mode;
            self.inner.storage.save_upstream(&record)?;

            self.ensure_client(&record.name, transport, resolved_mode, entry.auto_disable_threshold);
        }

        self.purge_unconfigured(&configured_names).await?;
        Ok(())
    }

    fn ensure_client(
        &self,
        name: &str,
        transport: mux_core::Transport,
        mode: StartupMode,
        auto_disable_threshold: Option<u32>,
    ) {
        let mut clients = self.inner.clients.write();
        if let Some(existing) = clients.get(name) {
            existing.machine().set_startup_mode(mode);
            return;
        }
        let threshold = auto_disable_threshold.unwrap_or(self.inner.cfg.default_auto_disable_threshold);
        let machine = mux_core::UpstreamStateMachine::new(name, mode, threshold, self.inner.clock.clone());
        let client = ManagedClient::new(
            name,
            transport,
            machine,
            self.inner.storage.clone(),
            self.inner.bus.clone(),
            self.inner.clock.clone(),
            self.inner.cfg.connect_timeout,
            self.inner.cfg.data_dir.clone(),
            self.inner.cfg.cache_ttl,
        )
        .with_auto_disable_sink(Arc::new(self.clone()) as Arc<dyn AutoDisableSink>);
        clients.insert(name.to_string(), Arc::new(client));
    }

    /// For each name tracked by Storage or the live client set but absent
    /// from the now-configured set: disconnect and purge client, tool
    /// metadata, index entries, and the client's cidfile/log state.
    async fn purge_unconfigured(&self, configured: &[String]) -> Result<(), ManagerError> {
        let mut stale: Vec<String> = self
            .inner
            .storage
            .list_upstreams()?
            .into_iter()
            .map(|u| u.name)
            .filter(|name| !configured.contains(name))
            .collect();
        for name in self.inner.clients.read().keys() {
            if !configured.contains(name) && !stale.contains(name) {
                stale.push(name.clone());
            }
        }

        for name in stale {
            let client = self.inner.clients.write().remove(&name);
            if let Some(client) = client {
                client.disconnect(self.inner.cfg.disconnect_grace).await;
            }
            self.inner.storage.delete_upstream(&name)?;
            self.inner.index.delete_server_tools(&name).await;
            info!(upstream = %name, "purged upstream no longer present in config");
        }
        Ok(())
    }

    /// §4.6 `ConnectAll`: a semaphore of size `max_concurrent_connections`
    /// admits connect attempts for every client whose `startup_mode` is
    /// `active` — `lazy_loading` upstreams stay `Disconnected` until a
    /// tool call wakes them (§2, §4.5.4), so they are excluded here even
    /// though they aren't connect-forbidden; the rest of setup work
    /// (discovery, caching) runs inline inside `ManagedClient::connect`,
    /// so only the acquire/connect step itself is bounded.
    pub async fn connect_all(&self) {
        let clients = self.clients();
        let tasks = clients.into_iter().filter(|c| c.machine().startup_mode() == StartupMode::Active).map(|client| {
            let inner = self.inner.clone();
            async move {
                let Ok(_permit) = inner.semaphore.acquire().await else {
                    return;
                };
                let deadline = inner.cfg.connect_timeout;
                match tokio::time::timeout(deadline, client.connect()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(upstream = client.name(), %err, "connect failed"),
                    Err(_) => warn!(upstream = client.name(), "connect attempt timed out"),
                }
            }
        });
        join_all_unit(tasks).await;
    }

    /// §4.6 manual op: `EnableServer(name, enabled)`.
    pub fn enable_server(&self, name: &str, enabled: bool) -> Result<(), ManagerError> {
        let mode = if enabled { StartupMode::Active } else { StartupMode::Disabled };
        self.write_startup_mode(name, mode, None)?;
        if enabled {
            self.schedule_connect(name);
        } else {
            self.schedule_disconnect(name);
        }
        Ok(())
    }

    /// §4.6 manual op: `QuarantineServer(name, on)`.
    pub fn quarantine_server(&self, name: &str, on: bool) -> Result<(), ManagerError> {
        let mode = if on { StartupMode::Quarantined } else { StartupMode::Active };
        self.write_startup_mode(name, mode, None)?;
        if on {
            self.schedule_disconnect(name);
        } else {
            self.schedule_connect(name);
        }
        Ok(())
    }

    /// §4.6 manual op: `RestartServer(name)` — disable then re-enable with
    /// a short gap so the transport has time to fully tear down.
    pub async fn restart_server(&self, name: &str) -> Result<(), ManagerError> {
        self.write_startup_mode(name, StartupMode::Disabled, None)?;
        self.schedule_disconnect(name);
        tokio::time::sleep(self.inner.cfg.restart_gap).await;
        self.write_startup_mode(name, StartupMode::Active, None)?;
        self.schedule_connect(name);
        Ok(())
    }

    /// §4.6 manual op: `ClearAutoDisable(name)` — equivalent to
    /// `Enable(name, true)` but explicitly resets the state machine's
    /// failure counters rather than relying on the implicit reset a
    /// successful `Ready` transition would otherwise provide.
    pub fn clear_auto_disable(&self, name: &str) -> Result<(), ManagerError> {
        self.inner.storage.clear_auto_disable(name, &self.inner.config)?;
        if let Some(client) = self.client(name) {
            client.machine().set_startup_mode(StartupMode::Active);
            client.machine().reset_failure_counters();
        }
        self.schedule_connect(name);
        Ok(())
    }

    /// Bulk write over member servers' `startup_mode` (open-question #2):
    /// never a standing override flag consulted at call time, just a
    /// one-shot fan-out of `enable_server`/`quarantine_server`-style writes.
    pub fn toggle_group_servers(&self, group_id: i64, enabled: bool) -> Result<u32, ManagerError> {
        let snapshot = self.inner.config.snapshot();
        let members: Vec<String> = snapshot.group_members(group_id).into_iter().map(|e| e.name.clone()).collect();
        let mut updated = 0;
        for name in &members {
            self.enable_server(name, enabled)?;
            updated += 1;
        }
        let now = Utc::now();
        self.inner.bus.publish(Event::ServerGroupUpdated {
            group_id,
            total_updated: updated,
            timestamp: now,
        });
        Ok(updated)
    }

    fn write_startup_mode(&self, name: &str, mode: StartupMode, reason: Option<&str>) -> Result<(), ManagerError> {
        self.inner.storage.update_server_startup_mode(name, mode, reason, &self.inner.config)?;
        if let Some(client) = self.client(name) {
            client.machine().set_startup_mode(mode);
        }
        let now = Utc::now();
        self.inner.bus.publish(Event::ServerConfigChanged {
            server_name: name.to_string(),
            timestamp: now,
        });
        Ok(())
    }

    fn schedule_connect(&self, name: &str) {
        let Some(client) = self.client(name) else { return };
        let manager = self.clone();
        tokio::spawn(async move {
            let _permit = manager.inner.semaphore.acquire().await;
            if let Err(err) = client.connect().await {
                warn!(upstream = client.name(), %err, "scheduled connect failed");
            }
        });
    }

    fn schedule_disconnect(&self, name: &str) {
        let Some(client) = self.client(name) else { return };
        let grace = self.inner.cfg.disconnect_grace;
        tokio::spawn(async move {
            client.disconnect(grace).await;
        });
    }

    /// Starts the §4.6 background reconnect loop: every 60s, for every
    /// client in `Error` with `startup_mode ∈ {active, lazy_loading}` and
    /// `ShouldRetry()==true`, schedules a bounded connect attempt. Runs
    /// until `cancel` fires.
    pub fn spawn_reconnect_loop(&self, cancel: tokio_util::sync::CancellationToken) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => manager.reconnect_tick().await,
                }
            }
        });
    }

    async fn reconnect_tick(&self) {
        for client in self.clients() {
            let machine = client.machine();
            let mode = machine.startup_mode();
            if !matches!(mode, StartupMode::Active | StartupMode::LazyLoading) {
                continue;
            }
            if machine.connection_state() != ConnectionState::Error {
                continue;
            }
            let due = if machine.get_connection_info().is_oauth_error {
                machine.should_retry_oauth()
            } else {
                machine.should_retry()
            };
            if due {
                self.schedule_connect(client.name());
            }
        }
    }

    /// Starts the §4.5.5 per-upstream health-check loop: every tick,
    /// every client whose persisted `Upstream.options.health_check` is
    /// enabled runs `ManagedClient::health_check_tick` (the fixed
    /// four-step order: auto-disable check, already-auto-disabled
    /// short-circuit, reconnect-if-due, or ping). Runs until `cancel`
    /// fires.
    pub fn spawn_health_check_loop(&self, cancel: tokio_util::sync::CancellationToken) {
        let manager = self.clone();
        let interval = self.inner.cfg.health_check_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => manager.health_check_tick_all().await,
                }
            }
        });
    }

    async fn health_check_tick_all(&self) {
        for client in self.clients() {
            let enabled = self
                .inner
                .storage
                .get_upstream(client.name())
                .ok()
                .flatten()
                .map(|u| u.options.health_check)
                .unwrap_or(false);
            if enabled {
                client.health_check_tick().await;
            }
        }
    }

    /// Starts the §4.6 app-state aggregation subscriber: recomputes
    /// `AppState` on every `ServerStateChanged` and publishes
    /// `AppStateChanged` when it actually changes. Runs until its
    /// subscription's sender side is dropped (on `EventBus::close`).
    pub fn spawn_app_state_subscriber(&self) {
        let manager = self.clone();
        let mut sub = self.inner.bus.subscribe(mux_core::EventKind::ServerStateChanged);
        tokio::spawn(async move {
            while sub.recv().await.is_some() {
                manager.recompute_app_state();
            }
        });
    }

    /// Feeds the Index Adapter from `ToolsUpdated` events rather than
    /// having `ManagedClient` depend on `mux-index` directly (§9: the
    /// client only publishes outcomes, a subscriber decides what they
    /// mean downstream — the same decoupling `spawn_app_state_subscriber`
    /// uses for aggregation).
    pub fn spawn_index_subscriber(&self) {
        let manager = self.clone();
        let mut sub = self.inner.bus.subscribe(mux_core::EventKind::ToolsUpdated);
        tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                let mux_core::event::Event::ToolsUpdated { server_name, .. } = event else {
                    continue;
                };
                let tools = match manager.inner.storage.get_tool_metadata(&server_name) {
                    Ok(tools) => tools,
                    Err(err) => {
                        warn!(upstream = %server_name, %err, "failed to read tool metadata for indexing");
                        continue;
                    }
                };
                manager.inner.index.index_tools(&tools).await;
            }
        });
    }

    fn recompute_app_state(&self) {
        let phase = *self.inner.phase.lock();
        let pairs: Vec<_> = self
            .clients()
            .iter()
            .map(|c| (c.machine().startup_mode(), c.machine().connection_state()))
            .collect();
        let new_state = mux_core::app_state::aggregate(phase, pairs.into_iter());
        let mut current = self.inner.app_state.lock();
        if *current != new_state {
            let old_state = *current;
            *current = new_state;
            drop(current);
            let now = Utc::now();
            self.inner.bus.publish(Event::AppStateChanged {
                old_state,
                new_state,
                timestamp: now,
            });
        }
    }

    /// Marks the process as having finished startup (reconciliation +
    /// initial `connect_all` complete); subsequent aggregation no longer
    /// forces `Starting`.
    pub fn mark_running(&self) {
        *self.inner.phase.lock() = ProcessPhase::Running;
        self.recompute_app_state();
    }

    /// §5's shutdown sequence, the Manager's portion of it: mark
    /// `Stopping`, then disconnect every client with the configured grace
    /// period before the caller moves on to closing Storage/Index.
    pub async fn shutdown(&self) {
        *self.inner.phase.lock() = ProcessPhase::Stopping;
        self.recompute_app_state();
        let grace = self.inner.cfg.disconnect_grace;
        let clients = self.clients();
        let disconnects = clients.iter().map(|c| c.disconnect(grace));
        join_all_unit(disconnects).await;
        *self.inner.phase.lock() = ProcessPhase::Stopped;
        self.recompute_app_state();
    }

    pub fn upstream(&self, name: &str) -> Result<Upstream, ManagerError> {
        self.inner
            .storage
            .get_upstream(name)?
            .ok_or_else(|| ManagerError::UpstreamNotFound(name.to_string()))
    }

    pub fn list_upstreams(&self) -> Result<Vec<Upstream>, ManagerError> {
        Ok(self.inner.storage.list_upstreams()?)
    }

    /// `upstream_servers(add)`: appends a brand-new entry to the config
    /// file and immediately reconciles so the new client is live.
    /// `entry` is the §6 `mcpServers[]` JSON shape for one server.
    pub async fn add_upstream(&self, entry: serde_json::Value) -> Result<(), ManagerError> {
        let mut parsed: mux_config::UpstreamEntry =
            serde_json::from_value(entry).map_err(|e| ManagerError::InvalidTransport(e.to_string()))?;
        parsed.migrate();
        let name = parsed.name.clone();
        if self.inner.config.snapshot().find(&name).is_some() {
            return Err(ManagerError::AlreadyExists(name));
        }
        self.inner.config.update_atomic(|c| c.mcp_servers.push(parsed))?;
        self.reconcile().await
    }

    /// `upstream_servers(remove)`: drops the entry from the config file
    /// and reconciles, which disconnects the client and purges its
    /// Storage/Index footprint (§3 I5/P3).
    pub async fn remove_upstream(&self, name: &str) -> Result<(), ManagerError> {
        if self.inner.config.snapshot().find(name).is_none() {
            return Err(ManagerError::UpstreamNotFound(name.to_string()));
        }
        self.inner.config.update_atomic(|c| c.mcp_servers.retain(|e| e.name != name))?;
        self.reconcile().await
    }

    /// `upstream_servers(patch)`: shallow-merges `patch`'s object fields
    /// onto the existing entry (e.g. `{"args": [...]}`), then reconciles
    /// so a transport-affecting change takes effect.
    pub async fn patch_upstream(&self, name: &str, patch: serde_json::Value) -> Result<(), ManagerError> {
        let serde_json::Value::Object(patch) = patch else {
            return Err(ManagerError::InvalidTransport("patch must be a JSON object".to_string()));
        };
        let found = self.inner.config.update_atomic(|c| -> Result<(), ManagerError> {
            let entry = c.find_mut(name).ok_or_else(|| ManagerError::UpstreamNotFound(name.to_string()))?;
            let mut value = serde_json::to_value(&*entry).map_err(|e| ManagerError::InvalidTransport(e.to_string()))?;
            if let serde_json::Value::Object(obj) = &mut value {
                for (k, v) in patch {
                    obj.insert(k, v);
                }
            }
            *entry = serde_json::from_value(value).map_err(|e| ManagerError::InvalidTransport(e.to_string()))?;
            Ok(())
        })?;
        found?;
        self.reconcile().await
    }
}

impl AutoDisableSink for UpstreamManager {
    /// §4.6's single auto-disable entry point: commit the mode change
    /// (two-phase, via Storage), append the structured failure-log
    /// record, and let `ManagedClient::trip_auto_disable` publish the
    /// `ServerAutoDisabled`/`ServerStateChanged` events — this sink only
    /// owns the durable side effects, not the event publication.
    fn trip_auto_disable(&self, upstream: &str, reason: &str) {
        let now = Utc::now();
        if let Err(err) = self
            .inner
            .storage
            .update_server_startup_mode(upstream, StartupMode::AutoDisabled, Some(reason), &self.inner.config)
        {
            warn!(upstream, %err, "failed to persist auto-disable");
        }
        self.inner.failure_log.append(upstream, reason, now);
    }
}

/// Local stand-in for `futures::future::join_all` so this crate doesn't
/// need a dependency purely for one fan-out await; every future here is
/// infallible from the caller's perspective (errors are logged inline).
async fn join_all_unit<I>(iter: I)
where
    I: IntoIterator,
    I::Item: std::future::Future<Output = ()>,
{
    let mut handles = Vec::new();
    for fut in iter {
        handles.push(fut);
    }
    for fut in handles {
        fut.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_core::clock::FakeClock;
    use mux_core::Transport;
    use std::collections::HashMap as StdHashMap;

    fn test_manager() -> (UpstreamManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let (config, _migrated) = ConfigLoader::load(dir.path().join("mcp_config.json")).unwrap();
        let bus = EventBus::new();
        let index: Arc<dyn IndexAdapter> = Arc::new(mux_index::NullIndex);
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
        (UpstreamManager::new(storage, config, bus, index, clock, cfg), dir)
    }

    fn test_manager_with_index(index: Arc<dyn IndexAdapter>) -> (UpstreamManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let (config, _migrated) = ConfigLoader::load(dir.path().join("mcp_config.json")).unwrap();
        let bus = EventBus::new();
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
        (UpstreamManager::new(storage, config, bus, index, clock, cfg), dir)
    }

    fn push_entry(manager: &UpstreamManager, name: &str, mode: StartupMode) {
        manager
            .inner
            .config
            .update_atomic(|c| {
                let mut entry = mux_config::UpstreamEntry::from_upstream(&Upstream::new(
                    name,
                    Transport::Stdio {
                        command: "true".into(),
                        args: vec![],
                        working_dir: None,
                        env: StdHashMap::new(),
                    },
                    Utc::now(),
                ));
                entry.startup_mode = Some(mode);
                c.mcp_servers.push(entry);
            })
            .unwrap();
    }

    #[tokio::test]
    async fn reconcile_creates_a_client_and_persists_the_record() {
        let (manager, _dir) = test_manager();
        push_entry(&manager, "gh", StartupMode::Active);
        manager.reconcile().await.unwrap();

        assert!(manager.client("gh").is_some());
        let stored = manager.upstream("gh").unwrap();
        assert_eq!(stored.startup_mode, StartupMode::Active);
    }

    #[tokio::test]
    async fn reconcile_purges_upstreams_removed_from_config() {
        let (manager, _dir) = test_manager();
        push_entry(&manager, "gh", StartupMode::Active);
        manager.reconcile().await.unwrap();
        assert!(manager.client("gh").is_some());

        manager.inner.config.update_atomic(|c| c.mcp_servers.clear()).unwrap();
        manager.reconcile().await.unwrap();

        assert!(manager.client("gh").is_none());
        assert!(manager.upstream("gh").is_err());
    }

    #[tokio::test]
    async fn enable_server_writes_through_storage_and_config() {
        let (manager, _dir) = test_manager();
        push_entry(&manager, "gh", StartupMode::Active);
        manager.reconcile().await.unwrap();

        manager.enable_server("gh", false).unwrap();
        assert_eq!(manager.upstream("gh").unwrap().startup_mode, StartupMode::Disabled);
        assert_eq!(
            manager.inner.config.snapshot().find("gh").unwrap().startup_mode,
            Some(StartupMode::Disabled)
        );
    }

    #[tokio::test]
    async fn trip_auto_disable_persists_mode_and_appends_failure_log() {
        let (manager, dir) = test_manager();
        push_entry(&manager, "gh", StartupMode::Active);
        manager.reconcile().await.unwrap();

        manager.trip_auto_disable("gh", "timeout: deadline exceeded");

        assert_eq!(manager.upstream("gh").unwrap().startup_mode, StartupMode::AutoDisabled);
        let log = std::fs::read_to_string(dir.path().join("failed_servers.log")).unwrap();
        assert!(log.contains("\"upstream\":\"gh\""));
        assert!(log.contains("\"category\":\"timeout\""));
    }

    #[tokio::test]
    async fn clear_auto_disable_resets_failure_counters_and_reactivates() {
        let (manager, _dir) = test_manager();
        push_entry(&manager, "gh", StartupMode::Active);
        manager.reconcile().await.unwrap();
        manager.trip_auto_disable("gh", "timeout: x");
        manager.client("gh").unwrap().machine().set_startup_mode(StartupMode::AutoDisabled);

        manager.clear_auto_disable("gh").unwrap();

        assert_eq!(manager.upstream("gh").unwrap().startup_mode, StartupMode::Active);
        assert_eq!(manager.client("gh").unwrap().machine().get_connection_info().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn toggle_group_servers_updates_every_member_and_publishes_once() {
        let (manager, _dir) = test_manager();
        push_entry(&manager, "gh", StartupMode::Active);
        push_entry(&manager, "slack", StartupMode::Active);
        manager
            .inner
            .config
            .update_atomic(|c| {
                for e in &mut c.mcp_servers {
                    e.group_id = Some(7);
                }
            })
            .unwrap();
        manager.reconcile().await.unwrap();

        let mut sub = manager.inner.bus.subscribe(mux_core::EventKind::ServerGroupUpdated);
        let updated = manager.toggle_group_servers(7, false).unwrap();
        assert_eq!(updated, 2);
        assert_eq!(manager.upstream("gh").unwrap().startup_mode, StartupMode::Disabled);
        assert_eq!(manager.upstream("slack").unwrap().startup_mode, StartupMode::Disabled);
        let event = sub.recv().await.unwrap();
        assert!(matches!(event, Event::ServerGroupUpdated { total_updated: 2, .. }));
    }

    #[tokio::test]
    async fn health_check_tick_only_touches_upstreams_with_health_check_enabled() {
        let (manager, _dir) = test_manager();
        push_entry(&manager, "watched", StartupMode::Active);
        push_entry(&manager, "quiet", StartupMode::Active);
        manager
            .inner
            .config
            .update_atomic(|c| {
                c.find_mut("watched").unwrap().health_check = Some(true);
                c.find_mut("quiet").unwrap().health_check = Some(false);
            })
            .unwrap();
        manager.reconcile().await.unwrap();

        manager.health_check_tick_all().await;

        assert_ne!(
            manager.client("watched").unwrap().machine().connection_state(),
            ConnectionState::Disconnected,
            "health-check-enabled upstream must have attempted a connect"
        );
        assert_eq!(
            manager.client("quiet").unwrap().machine().connection_state(),
            ConnectionState::Disconnected,
            "health checks must never run for upstreams that didn't opt in"
        );
    }

    #[tokio::test]
    async fn app_state_subscriber_reports_degraded_on_error_state() {
        let (manager, _dir) = test_manager();
        push_entry(&manager, "gh", StartupMode::Active);
        manager.reconcile().await.unwrap();
        manager.mark_running();
        manager.spawn_app_state_subscriber();

        let client = manager.client("gh").unwrap();
        client.machine().transition_to(ConnectionState::Connecting).unwrap();
        let _ = client.machine().set_error("boom");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.app_state(), AppState::Degraded);
    }

    #[tokio::test]
    async fn add_upstream_reconciles_a_new_client_into_existence() {
        let (manager, _dir) = test_manager();
        let entry = serde_json::json!({
            "name": "gh", "protocol": "stdio", "command": "true", "startup_mode": "active"
        });
        manager.add_upstream(entry).await.unwrap();

        assert!(manager.client("gh").is_some());
        assert_eq!(manager.upstream("gh").unwrap().startup_mode, StartupMode::Active);
    }

    #[tokio::test]
    async fn add_upstream_rejects_a_duplicate_name() {
        let (manager, _dir) = test_manager();
        push_entry(&manager, "gh", StartupMode::Active);
        manager.reconcile().await.unwrap();

        let entry = serde_json::json!({"name": "gh", "protocol": "stdio", "command": "true"});
        let err = manager.add_upstream(entry).await.unwrap_err();
        assert!(matches!(err, ManagerError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn remove_upstream_purges_client_and_storage() {
        let (manager, _dir) = test_manager();
        push_entry(&manager, "gh", StartupMode::Active);
        manager.reconcile().await.unwrap();
        assert!(manager.client("gh").is_some());

        manager.remove_upstream("gh").await.unwrap();

        assert!(manager.client("gh").is_none());
        assert!(manager.upstream("gh").is_err());
    }

    #[tokio::test]
    async fn remove_upstream_errors_for_unknown_name() {
        let (manager, _dir) = test_manager();
        let err = manager.remove_upstream("ghost").await.unwrap_err();
        assert!(matches!(err, ManagerError::UpstreamNotFound(_)));
    }

    #[tokio::test]
    async fn index_subscriber_indexes_tools_published_by_a_tools_updated_event() {
        let (manager, _dir) = test_manager_with_index(Arc::new(mux_index::InMemoryIndex::new()));
        push_entry(&manager, "gh", StartupMode::Active);
        manager.reconcile().await.unwrap();
        manager.spawn_index_subscriber();

        let tools = vec![mux_core::ToolMetadata::new("gh", "ping", "pings", serde_json::json!({}), Utc::now())];
        manager.inner.storage.save_tool_metadata("gh", &tools).unwrap();
        manager.inner.bus.publish(Event::ToolsUpdated {
            server_name: "gh".to_string(),
            tool_count: 1,
            timestamp: Utc::now(),
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let hits = manager.inner.index.search("ping", 10).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].upstream, "gh");
    }

    #[tokio::test]
    async fn patch_upstream_merges_fields_and_reconciles() {
        let (manager, _dir) = test_manager();
        push_entry(&manager, "gh", StartupMode::Active);
        manager.reconcile().await.unwrap();

        manager.patch_upstream("gh", serde_json::json!({"args": ["--verbose"]})).await.unwrap();

        let snapshot = manager.inner.config.snapshot();
        assert_eq!(snapshot.find("gh").unwrap().args, vec!["--verbose".to_string()]);
    }

    /// §8 P6 / scenario 6: with `max_concurrent_connections` well below
    /// the upstream count, `connect_all` cannot finish any faster than
    /// `ceil(n / max_concurrent) * connect_timeout` — each upstream here
    /// is `cat`, which never answers `tools/list`, so every connect
    /// attempt occupies its semaphore permit for the full timeout. An
    /// unbounded implementation would finish in roughly one
    /// `connect_timeout` instead, regardless of `n`.
    #[tokio::test]
    async fn connect_all_bounds_concurrent_connection_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open_temporary().unwrap());
        let (config, _migrated) = ConfigLoader::load(dir.path().join("mcp_config.json")).unwrap();
        let bus = EventBus::new();
        let index: Arc<dyn IndexAdapter> = Arc::new(mux_index::NullIndex);
        let clock: SharedClock = Arc::new(FakeClock::default());
        let connect_timeout = Duration::from_millis(150);
        let cfg = ManagerConfig {
            data_dir: dir.path().to_path_buf(),
            max_concurrent_connections: 3,
            connect_timeout,
            cache_ttl: chrono::Duration::seconds(300),
            default_auto_disable_threshold: 3,
            restart_gap: Duration::from_millis(1),
            disconnect_grace: Duration::from_millis(10),
            health_check_interval: Duration::from_secs(60),
        };
        let manager = UpstreamManager::new(storage, config, bus, index, clock, cfg);

        for i in 0..12 {
            push_entry(&manager, &format!("silent-{i}"), StartupMode::Active);
        }
        manager
            .inner
            .config
            .update_atomic(|c| {
                for entry in &mut c.mcp_servers {
                    entry.command = Some("cat".to_string());
                }
            })
            .unwrap();
        manager.reconcile().await.unwrap();

        let started = std::time::Instant::now();
        manager.connect_all().await;
        let elapsed = started.elapsed();

        // 12 upstreams / 3 permits = 4 rounds; bounded concurrency takes
        // at least 3 rounds worth of waiting, unbounded would take ~1.
        assert!(
            elapsed >= connect_timeout * 3,
            "connect_all finished in {elapsed:?}, too fast for max_concurrent_connections=3 over 12 upstreams"
        );
    }
}
