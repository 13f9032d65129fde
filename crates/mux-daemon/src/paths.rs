// SPDX-License-Identifier: MIT

//! Layout of the data directory (§6's "On-disk state"): `config.db`
//! (the `sled` store), `mcp_config.json`, `failed_servers.log`, `logs/`,
//! the control socket, and the startup lock file.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DataDirLayout {
    pub data_dir: PathBuf,
}

impl DataDirLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("config.db")
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("mcp_config.json")
    }

    pub fn failed_servers_log(&self) -> PathBuf {
        self.data_dir.join("failed_servers.log")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn control_socket(&self) -> PathBuf {
        self.data_dir.join(mux_protocol::CONTROL_SOCKET_NAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("mcpmux.lock")
    }

    pub fn ensure_exists(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

/// Resolves the effective data directory: explicit flag, then `DATA_DIR`
/// env var (§6), then `$HOME/.mcpmux`.
pub fn resolve_data_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(v) = std::env::var("DATA_DIR") {
        return PathBuf::from(v);
    }
    mux_config::default_data_dir("mcpmux").unwrap_or_else(|| PathBuf::from(".mcpmux"))
}
