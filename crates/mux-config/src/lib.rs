// SPDX-License-Identifier: MIT

//! Config Loader (§4.3): reads `mcp_config.json`, migrates legacy boolean
//! fields into the single `startup_mode` enum on first read, and owns the
//! atomic rewrite path (temp file + fsync + rename) that both explicit
//! mutations and Storage's two-phase commit (§4.2) use.
//!
//! Grounded on the teacher's `oj-daemon/src/storage/snapshot.rs`
//! temp+rename persistence pattern and its `oj-cli`/`dirs` data-directory
//! convention; file-watch suppression (`skipNextReload`) is new to this
//! spec and has no teacher counterpart to adapt.

pub mod config;
pub mod entry;
pub mod error;
pub mod loader;

pub use config::Config;
pub use entry::{GroupEntry, UpstreamEntry};
pub use error::ConfigError;
pub use loader::{ConfigLoader, WatchGuard};

/// Resolves the default data directory, `$HOME/.<appname>`, matching the
/// teacher's `dirs`-based resolution in `oj-core`/`oj-cli`.
pub fn default_data_dir(appname: &str) -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|home| home.join(format!(".{appname}")))
}
