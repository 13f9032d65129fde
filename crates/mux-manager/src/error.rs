// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("upstream {0:?} not found")]
    UpstreamNotFound(String),
    #[error("upstream {0:?} already exists")]
    AlreadyExists(String),
    #[error("upstream {0:?} has no valid transport in its config entry")]
    InvalidTransport(String),
    #[error(transparent)]
    Storage(#[from] mux_storage::StorageError),
    #[error(transparent)]
    Config(#[from] mux_config::ConfigError),
    #[error(transparent)]
    Client(#[from] mux_client::ClientError),
}
