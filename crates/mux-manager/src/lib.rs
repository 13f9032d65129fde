// SPDX-License-Identifier: MIT

//! Upstream Manager (C6): owns the live set of Managed Clients, drives
//! reconciliation against `config ∪ storage`, runs the bounded-concurrency
//! connect pass, implements the auto-disable protocol, exposes manual
//! operations, and runs the background reconnect loop and app-state
//! aggregation subscriber (§4.6).

pub mod error;
pub mod failure_log;
pub mod manager;

pub use error::ManagerError;
pub use failure_log::FailureLog;
pub use manager::{ManagerConfig, UpstreamManager};
