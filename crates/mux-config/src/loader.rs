// SPDX-License-Identifier: MIT

//! `ConfigLoader` (§4.3): reads `mcp_config.json`, migrates legacy boolean
//! fields on first read, and owns the atomic temp-file+rename rewrite path
//! used both by explicit mutations and by Storage's two-phase commit
//! (§4.2, via the [`mux_storage::ConfigWriter`] impl below).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mux_core::StartupMode;
use mux_storage::{ConfigWriteError, ConfigWriter};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ConfigError;

/// Handle to a live config file. Cheaply cloneable; all mutation goes
/// through one internal mutex (§5: "Config Loader: one mutex").
#[derive(Clone)]
pub struct ConfigLoader {
    path: Arc<PathBuf>,
    state: Arc<Mutex<Config>>,
    /// Set right before an atomic rewrite we triggered ourselves; the
    /// watch loop consumes (clears) it instead of emitting a reload for
    /// that event, per §4.3's `skipNextReload`.
    skip_next_reload: Arc<AtomicBool>,
}

impl ConfigLoader {
    /// Reads `path` (creating a default document if absent), migrates
    /// legacy fields in place, writes the migrated document back, and
    /// returns the loader plus the names of any entries that were
    /// migrated.
    pub fn load(path: impl Into<PathBuf>) -> Result<(Self, Vec<String>), ConfigError> {
        let path = path.into();
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str(&raw)?
        } else {
            Config::default()
        };

        let migrated = config.migrate();

        let loader = Self {
            path: Arc::new(path),
            state: Arc::new(Mutex::new(config)),
            skip_next_reload: Arc::new(AtomicBool::new(false)),
        };
        loader.write_current_to_disk()?;
        Ok((loader, migrated))
    }

    pub fn snapshot(&self) -> Config {
        self.state.lock().clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `mutator` under the lock, persists via atomic rewrite, and
    /// arms `skipNextReload` so the next file-watch tick doesn't re-fire
    /// for our own write.
    pub fn update_atomic<T>(&self, mutator: impl FnOnce(&mut Config) -> T) -> Result<T, ConfigError> {
        let mut guard = self.state.lock();
        let result = mutator(&mut guard);
        self.write_locked(&guard)?;
        Ok(result)
    }

    fn write_current_to_disk(&self) -> Result<(), ConfigError> {
        let guard = self.state.lock();
        self.write_locked(&guard)
    }

    /// Atomic temp-file + fsync + rename (§4.2, §9): never leaves a
    /// half-written config file on disk even if the process is killed
    /// mid-write.
    fn write_locked(&self, config: &Config) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(config)?;
        let tmp_path = self.path.with_extension("json.tmp");

        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, self.path.as_path())?;
            Ok(())
        })();

        write_result.map_err(|source| ConfigError::Io {
            path: self.path.display().to_string(),
            source,
        })?;

        self.skip_next_reload.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Starts a `notify` watch on the config file's parent directory.
    /// Emits `()` on the returned channel for every on-disk modification
    /// that wasn't suppressed by `skipNextReload`. The watcher and its
    /// background task are torn down when the returned guard is dropped.
    pub fn watch(&self) -> Result<(WatchGuard, mpsc::Receiver<()>), ConfigError> {
        let (tx, rx) = mpsc::channel(16);
        let target = self.path.as_path().to_path_buf();
        let skip = self.skip_next_reload.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            if !event.paths.iter().any(|p| p == &target) {
                return;
            }
            if !matches!(
                event.kind,
                notify::EventKind::Modify(_) | notify::EventKind::Create(_)
            ) {
                return;
            }
            if skip.swap(false, Ordering::SeqCst) {
                debug!(path = %target.display(), "config reload suppressed (self-induced write)");
                return;
            }
            if tx.try_send(()).is_err() {
                warn!("config watch channel full or closed, dropping reload signal");
            }
        })?;

        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;

        Ok((WatchGuard { _watcher: watcher }, rx))
    }
}

/// Keeps the underlying `notify` watcher alive; dropping it stops watching.
pub struct WatchGuard {
    _watcher: RecommendedWatcher,
}

impl ConfigWriter for ConfigLoader {
    fn write_startup_mode(
        &self,
        name: &str,
        mode: StartupMode,
        reason: Option<&str>,
    ) -> Result<(), ConfigWriteError> {
        let mut guard = self.state.lock();
        let Some(entry) = guard.find_mut(name) else {
            return Err(ConfigWriteError::new(format!(
                "upstream {name:?} not present in config file"
            )));
        };
        entry.startup_mode = Some(mode);
        if let Some(reason) = reason {
            entry.auto_disable_reason = Some(reason.to_string());
        } else if mode != StartupMode::AutoDisabled {
            entry.auto_disable_reason = None;
        }
        self.write_locked(&guard)
            .map_err(|e| ConfigWriteError::new(e.to_string()))
    }
}
