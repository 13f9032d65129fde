// SPDX-License-Identifier: MIT

//! Managed Client (C5): the one-per-upstream actor wrapping connect,
//! tool discovery, tool-list caching, `call_tool`, health-checking, and
//! teardown around one `UpstreamStateMachine` (§4.5).

pub mod cache;
pub mod client;
pub mod error;
pub mod process_group;
pub mod transport;

pub use cache::{Refresh, ToolListCache};
pub use client::{AutoDisableSink, ManagedClient};
pub use error::ClientError;
pub use transport::{RemoteTool, Session};
