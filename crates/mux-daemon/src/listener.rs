// SPDX-License-Identifier: MIT

//! Control-socket accept loop + per-request dispatch. Grounded on the
//! teacher's `oj-daemon/src/listener/mod.rs`: a shared `ListenCtx`, one
//! spawned task per accepted connection, requests handled in a loop
//! until the peer disconnects.

use std::sync::Arc;
use std::time::Instant;

use mux_manager::UpstreamManager;
use mux_protocol::{read_message, write_message, Request, Response, UpstreamSummary};
use mux_router::Router;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, warn};

pub struct ListenCtx {
    pub router: Arc<Router>,
    pub manager: UpstreamManager,
    pub start_time: Instant,
    pub shutdown: Arc<Notify>,
}

/// Accepts connections until the process is torn down; each connection
/// runs in its own task so a slow or wedged client never blocks others.
pub async fn run(listener: UnixListener, ctx: Arc<ListenCtx>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, &ctx).await {
                        debug!(%err, "control connection closed");
                    }
                });
            }
            Err(err) => warn!(%err, "control socket accept error"),
        }
    }
}

async fn handle_connection(mut stream: UnixStream, ctx: &ListenCtx) -> Result<(), mux_protocol::ProtocolError> {
    loop {
        let request: Request = match read_message(&mut stream).await {
            Ok(req) => req,
            Err(mux_protocol::ProtocolError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let response = dispatch(request, ctx).await;
        let shutting_down = matches!(response, Response::ShuttingDown);
        write_message(&mut stream, &response).await?;
        if shutting_down {
            return Ok(());
        }
    }
}

async fn dispatch(request: Request, ctx: &ListenCtx) -> Response {
    let router = &ctx.router;
    match request {
        Request::Ping => Response::Pong,

        Request::Status => Response::Status {
            app_state: ctx.manager.app_state(),
            uptime_secs: ctx.start_time.elapsed().as_secs(),
            upstream_count: ctx.manager.client_names().len(),
        },

        Request::RetrieveTools { query, limit } => {
            let hits = router
                .retrieve_tools(&query, limit)
                .await
                .into_iter()
                .map(|hit| mux_protocol::response::ToolSearchHit {
                    upstream: hit.upstream,
                    tool: hit.tool,
                    description: hit.description,
                    score: hit.score,
                })
                .collect();
            Response::Tools { hits }
        }

        Request::CallTool { name, args } => match router.call_tool(&name, args).await {
            Ok(value) => Response::ToolResult { value },
            Err(err) => error_response(&err),
        },

        Request::ToolsStat { top_n } => match router.tools_stat(top_n) {
            Ok(stats) => Response::ToolsStat { stats },
            Err(err) => error_response(&err),
        },

        Request::ListUpstreams => match router.list_upstreams() {
            Ok(upstreams) => Response::Upstreams {
                upstreams: upstreams.iter().map(|u| summarize(&ctx.manager, u)).collect(),
            },
            Err(err) => error_response(&err),
        },

        Request::AddUpstream { entry } => match router.add_upstream(entry).await {
            Ok(()) => Response::Ok,
            Err(err) => error_response(&err),
        },

        Request::RemoveUpstream { name } => match router.remove_upstream(&name).await {
            Ok(()) => Response::Ok,
            Err(err) => error_response(&err),
        },

        Request::PatchUpstream { name, patch } => match router.patch_upstream(&name, patch).await {
            Ok(()) => Response::Ok,
            Err(err) => error_response(&err),
        },

        Request::EnableUpstream { name, enabled } => match router.enable_upstream(&name, enabled) {
            Ok(()) => Response::Ok,
            Err(err) => error_response(&err),
        },

        Request::QuarantineUpstream { name, on } => match router.quarantine_upstream(&name, on) {
            Ok(()) => Response::Ok,
            Err(err) => error_response(&err),
        },

        Request::RestartUpstream { name } => match router.restart_upstream(&name).await {
            Ok(()) => Response::Ok,
            Err(err) => error_response(&err),
        },

        Request::ClearAutoDisable { name } => match router.clear_auto_disable(&name) {
            Ok(()) => Response::Ok,
            Err(err) => error_response(&err),
        },

        Request::ToggleGroup { group_id, enabled } => match router.toggle_group(group_id, enabled) {
            Ok(total_updated) => Response::GroupToggled { total_updated },
            Err(err) => error_response(&err),
        },

        Request::TailLog { name, lines } => match router.tail_log(&name, lines) {
            Ok(lines) => Response::Log { lines },
            Err(err) => error_response(&err),
        },

        Request::Shutdown => {
            ctx.shutdown.notify_one();
            Response::ShuttingDown
        }
    }
}

fn summarize(manager: &UpstreamManager, upstream: &mux_core::Upstream) -> UpstreamSummary {
    let connection_state = manager
        .client(&upstream.name)
        .map(|c| c.machine().connection_state())
        .unwrap_or(mux_core::ConnectionState::Disconnected);
    UpstreamSummary {
        name: upstream.name.clone(),
        startup_mode: upstream.startup_mode,
        connection_state,
        protocol: transport_kind(&upstream.transport).to_string(),
        auto_disable_reason: upstream.audit.last_auto_disable_reason.clone(),
    }
}

fn transport_kind(transport: &mux_core::Transport) -> &'static str {
    match transport {
        mux_core::Transport::Stdio { .. } => "stdio",
        mux_core::Transport::Http { .. } => "http",
        mux_core::Transport::Sse { .. } => "sse",
        mux_core::Transport::StreamableHttp { .. } => "streamable_http",
    }
}

fn error_response(err: &impl CategorizedError) -> Response {
    Response::Error {
        message: err.to_string(),
        category: err.category().to_string(),
    }
}

/// Folds every control-plane error enum down to the §7 failure taxonomy
/// so the wire `Response::Error` always carries a machine-readable
/// `category`, regardless of which layer raised it.
trait CategorizedError: std::fmt::Display {
    fn category(&self) -> mux_core::FailureCategory;
}

impl CategorizedError for mux_router::RouterError {
    fn category(&self) -> mux_core::FailureCategory {
        use mux_core::FailureCategory;
        match self {
            mux_router::RouterError::MalformedToolId(_) => FailureCategory::User,
            mux_router::RouterError::UpstreamNotFound(_) => FailureCategory::User,
            mux_router::RouterError::UpstreamUnavailable(_) => FailureCategory::Permission,
            mux_router::RouterError::Storage(_) => FailureCategory::Internal,
            mux_router::RouterError::Client(err) => err.category(),
            mux_router::RouterError::Manager(err) => err.category(),
        }
    }
}

impl CategorizedError for mux_manager::ManagerError {
    fn category(&self) -> mux_core::FailureCategory {
        use mux_core::FailureCategory;
        match self {
            mux_manager::ManagerError::UpstreamNotFound(_) => FailureCategory::User,
            mux_manager::ManagerError::AlreadyExists(_) => FailureCategory::User,
            mux_manager::ManagerError::InvalidTransport(_) => FailureCategory::Config,
            mux_manager::ManagerError::Storage(_) => FailureCategory::Internal,
            mux_manager::ManagerError::Config(_) => FailureCategory::Config,
            mux_manager::ManagerError::Client(err) => err.category(),
        }
    }
}

impl CategorizedError for mux_client::ClientError {
    fn category(&self) -> mux_core::FailureCategory {
        self.category()
    }
}
