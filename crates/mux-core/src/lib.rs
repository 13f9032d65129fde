// SPDX-License-Identifier: MIT

//! Domain types and the per-upstream state machine shared by every other
//! crate in the workspace: `Upstream`, `ToolMetadata`, `Event`, `AppState`,
//! connection/failure bookkeeping, and the id/clock/macro plumbing they're
//! built on.

pub mod macros;

pub mod app_state;
pub mod clock;
pub mod connection;
pub mod error;
pub mod event;
pub mod failure;
pub mod id;
pub mod state_machine;
pub mod tool;
pub mod upstream;

pub use app_state::AppState;
pub use connection::ConnectionState;
pub use error::{CoreError, FailureCategory};
pub use event::{Event, EventKind};
pub use failure::FailureCounters;
pub use state_machine::{ConnectionInfo, FailureOutcome, TransitionError, UpstreamStateMachine};
pub use tool::ToolMetadata;
pub use upstream::{Audit, OAuthConfig, Options, StartupMode, Transport, Upstream, UpstreamId};
