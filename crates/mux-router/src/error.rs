// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("malformed tool id {0:?}, expected \"{{upstream}}:{{tool}}\"")]
    MalformedToolId(String),
    #[error("upstream {0:?} not found")]
    UpstreamNotFound(String),
    #[error("upstream {0:?} is disabled, quarantined, or auto-disabled")]
    UpstreamUnavailable(String),
    #[error(transparent)]
    Storage(#[from] mux_storage::StorageError),
    #[error(transparent)]
    Client(#[from] mux_client::ClientError),
    #[error(transparent)]
    Manager(#[from] mux_manager::ManagerError),
}
