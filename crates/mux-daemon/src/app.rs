// SPDX-License-Identifier: MIT

//! Daemon startup/shutdown sequence (§5, §6), grounded on the teacher's
//! `oj-daemon/src/lifecycle/startup.rs`: acquire the lock file first so
//! two daemons never race over the same data directory, create
//! directories, open durable state, wire the live components, bind the
//! control socket last (only once everything else has succeeded), then
//! run the accept loop until asked to stop.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use mux_bus::EventBus;
use mux_client::process_group;
use mux_config::ConfigLoader;
use mux_core::clock::{SharedClock, SystemClock};
use mux_index::{IndexAdapter, InMemoryIndex};
use mux_manager::{ManagerConfig, UpstreamManager};
use mux_router::Router;
use mux_storage::Storage;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::listener;
use crate::paths::DataDirLayout;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("another mcpmux daemon already holds the lock at {0}")]
    AlreadyRunning(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] mux_storage::StorageError),
    #[error(transparent)]
    Config(#[from] mux_config::ConfigError),
}

/// Held for the lifetime of the process; dropping it releases the
/// advisory lock.
struct LockFile(std::fs::File);

fn acquire_lock(layout: &DataDirLayout) -> Result<LockFile, StartupError> {
    let path = layout.lock_path();
    let file = OpenOptions::new().write(true).create(true).truncate(false).open(&path)?;
    file.try_lock_exclusive().map_err(|_| StartupError::AlreadyRunning(path))?;
    let mut file = file;
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(LockFile(file))
}

fn cleanup_stale(layout: &DataDirLayout) {
    let _ = std::fs::remove_file(layout.control_socket());
    let _ = std::fs::remove_file(layout.lock_path());
}

/// Runs `mcpmux serve` to completion: binds the control socket, serves
/// requests until a `Shutdown` request or Ctrl-C arrives, then tears
/// down cleanly. Returns once the daemon has fully stopped.
pub async fn serve(
    data_dir: PathBuf,
    config_path: Option<PathBuf>,
    listen: Option<String>,
) -> Result<(), StartupError> {
    let start_time = Instant::now();
    let layout = DataDirLayout::new(data_dir.clone());
    layout.ensure_exists()?;

    let lock = match acquire_lock(&layout) {
        Ok(lock) => lock,
        Err(err) => return Err(err),
    };

    match serve_inner(&layout, config_path, listen, start_time).await {
        Ok(()) => {
            drop(lock);
            cleanup_stale(&layout);
            Ok(())
        }
        Err(err) => {
            drop(lock);
            cleanup_stale(&layout);
            Err(err)
        }
    }
}

async fn serve_inner(
    layout: &DataDirLayout,
    config_path: Option<PathBuf>,
    listen_override: Option<String>,
    start_time: Instant,
) -> Result<(), StartupError> {
    let storage = Arc::new(Storage::open(layout.store_path())?);
    info!(schema_version = storage.schema_version()?, "storage opened");

    let config_path = config_path.unwrap_or_else(|| layout.config_path());
    let (config, migrated) = ConfigLoader::load(config_path)?;
    if !migrated.is_empty() {
        info!(entries = ?migrated, "migrated legacy boolean fields to startup_mode");
    }
    if let Some(listen) = listen_override {
        config.update_atomic(|c| c.listen = listen)?;
    }

    let bus = EventBus::new();
    let index: Arc<dyn IndexAdapter> = Arc::new(InMemoryIndex::new());
    let clock: SharedClock = Arc::new(SystemClock);

    let snapshot = config.snapshot();
    let auto_disable_threshold: u32 = std::env::var("AUTO_DISABLE_THRESHOLD")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);
    let cfg = ManagerConfig {
        data_dir: layout.data_dir.clone(),
        max_concurrent_connections: snapshot.max_concurrent_connections,
        connect_timeout: Duration::from_secs(snapshot.connection_timeout),
        cache_ttl: chrono::Duration::seconds(snapshot.tool_cache_ttl as i64),
        default_auto_disable_threshold: auto_disable_threshold,
        restart_gap: Duration::from_secs(2),
        disconnect_grace: Duration::from_secs(5),
        health_check_interval: Duration::from_secs(30),
    };

    let orphans = process_group::sweep_orphans(&layout.data_dir);
    if !orphans.is_empty() {
        warn!(upstreams = ?orphans, "terminated orphaned process groups left over from a previous run");
    }

    let manager = UpstreamManager::new(storage.clone(), config, bus, index.clone(), clock, cfg);
    let router = Arc::new(Router::new(
        storage.clone(),
        index,
        manager.clone(),
        layout.data_dir.clone(),
        snapshot.tool_response_limit,
    ));

    manager
        .reconcile()
        .await
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;
    manager.connect_all().await;

    let cancel = CancellationToken::new();
    manager.spawn_reconnect_loop(cancel.clone());
    manager.spawn_health_check_loop(cancel.clone());
    manager.spawn_app_state_subscriber();
    manager.spawn_index_subscriber();
    manager.mark_running();

    let socket_path = layout.control_socket();
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let unix_listener = UnixListener::bind(&socket_path)?;
    info!(socket = %socket_path.display(), "control socket bound");

    let shutdown = Arc::new(Notify::new());
    let ctx = Arc::new(listener::ListenCtx {
        router,
        manager: manager.clone(),
        start_time,
        shutdown: shutdown.clone(),
    });

    tokio::select! {
        () = listener::run(unix_listener, ctx) => {}
        () = shutdown.notified() => {
            info!("shutdown requested over the control socket");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    cancel.cancel();
    manager.shutdown().await;
    storage.flush()?;
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Re-exposed for the `call` one-shot client, which needs the same
/// socket path resolution `serve` uses without running a daemon.
pub fn control_socket_path(data_dir: &Path) -> PathBuf {
    DataDirLayout::new(data_dir.to_path_buf()).control_socket()
}
