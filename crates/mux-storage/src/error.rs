// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("upstream {0:?} not found")]
    UpstreamNotFound(String),
    #[error("config file rewrite failed while committing {upstream:?}: {source}")]
    ConfigWriteFailed {
        upstream: String,
        #[source]
        source: ConfigWriteError,
    },
}

/// Surfaced by a [`crate::ConfigWriter`] implementation (owned by
/// `mux-config`) when the second phase of a two-phase commit fails.
/// `mux-storage` treats any such error as grounds to roll back phase one.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigWriteError(pub String);

impl ConfigWriteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
