// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading/writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("upstream {0:?} not found in config file")]
    UpstreamNotFound(String),
    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),
}
