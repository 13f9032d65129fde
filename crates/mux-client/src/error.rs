// SPDX-License-Identifier: MIT

use mux_core::FailureCategory;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("upstream {0:?} rejected: {1}")]
    Rejected(String, &'static str),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("oauth required: {0}")]
    OAuthRequired(String),
    #[error("storage error: {0}")]
    Storage(#[from] mux_storage::StorageError),
    #[error("invalid state transition: {0}")]
    Transition(#[from] mux_core::state_machine::TransitionError),
    #[error("{0} timed out")]
    Timeout(String),
}

impl ClientError {
    pub fn category(&self) -> FailureCategory {
        match self {
            ClientError::Rejected(..) => FailureCategory::Permission,
            ClientError::Transport(msg) => FailureCategory::classify(msg),
            ClientError::OAuthRequired(_) => FailureCategory::Oauth,
            ClientError::Storage(_) => FailureCategory::Internal,
            ClientError::Transition(_) => FailureCategory::Internal,
            ClientError::Timeout(_) => FailureCategory::Timeout,
        }
    }
}
