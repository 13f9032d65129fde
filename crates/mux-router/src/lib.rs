// SPDX-License-Identifier: MIT

//! Router / Façade (C7): the single surface `retrieve_tools`/`call_tool`/
//! `upstream_servers`/`tools_stat` are served from on top of Storage,
//! the Index Adapter, and the Upstream Manager's Managed Clients (§4.7).

pub mod error;
pub mod router;
pub mod truncate;

pub use error::RouterError;
pub use router::Router;
pub use truncate::{truncate_text, truncate_tool_result};
