// SPDX-License-Identifier: MIT

//! Transport sessions: the live connection to one upstream MCP server.
//! Wire decode/encode for the proxy's *own* façade is explicitly out of
//! scope (spec.md §1); this module only covers the client-side JSON-RPC
//! calls the Managed Client itself must make against an upstream
//! (`tools/list`, `tools/call`) to fulfil C5.

pub mod http;
pub mod stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// A live session against one upstream, regardless of transport variant.
/// Created by [`connect`] and held by the `ManagedClient` for the
/// lifetime of one `Ready` period.
#[async_trait]
pub trait Session: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, ClientError>;
    async fn call_tool(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, ClientError>;
    /// Polite shutdown used by health-check pings and teardown.
    async fn ping(&self) -> Result<(), ClientError>;
    async fn close(&self);
    /// Process-group id backing this session, when it's a stdio subprocess.
    /// Used for cidfile bookkeeping; `None` for every non-stdio transport.
    fn pgid(&self) -> Option<i32> {
        None
    }
}

/// Opens a session for `transport`. stdio spawns a subprocess (see
/// [`stdio::StdioSession`]); http/sse/streamable-http share one JSON-RPC
/// over HTTP implementation (see [`http::HttpSession`]) since the framing
/// differences between those three variants are a wire-façade concern out
/// of this core's scope.
pub async fn connect(
    name: &str,
    transport: &mux_core::Transport,
    connect_timeout: std::time::Duration,
    stderr_log_path: Option<std::path::PathBuf>,
) -> Result<Box<dyn Session>, ClientError> {
    match transport {
        mux_core::Transport::Stdio { command, args, working_dir, env } => {
            let session = stdio::StdioSession::spawn(
                name,
                command,
                args,
                working_dir.as_deref(),
                env,
                connect_timeout,
                stderr_log_path,
            )
            .await?;
            Ok(Box::new(session))
        }
        mux_core::Transport::Http { url, headers, .. }
        | mux_core::Transport::Sse { url, headers, .. }
        | mux_core::Transport::StreamableHttp { url, headers, .. } => {
            let session = http::HttpSession::connect(url, headers, connect_timeout).await?;
            Ok(Box::new(session))
        }
    }
}
