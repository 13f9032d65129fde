// SPDX-License-Identifier: MIT

//! CLI↔daemon control-plane protocol (SPEC_FULL.md §10.5).
//!
//! spec.md puts the MCP wire façade itself out of scope ("request decode
//! / response encode"), but the CLI surface in §6 (`mcpmux call tool …`)
//! still needs some channel to reach a running `mcpmux serve` daemon
//! without reimplementing MCP framing in the CLI. This is that channel:
//! a small `Request`/`Response` enum carried over a Unix domain socket at
//! `<data_dir>/control.sock`, used only for local control-plane calls —
//! never for MCP traffic, which remains the out-of-scope façade's job.
//!
//! Grounded on the teacher's `oj-daemon/src/protocol` (`Request`/
//! `Response`/`Query` enums, 4-byte length-prefixed JSON framing).

pub mod request;
pub mod response;
pub mod wire;

pub use request::Request;
pub use response::{Response, UpstreamSummary};
pub use wire::{decode, encode, read_message, write_message, ProtocolError};

/// Default control-socket file name inside the data directory.
pub const CONTROL_SOCKET_NAME: &str = "control.sock";
