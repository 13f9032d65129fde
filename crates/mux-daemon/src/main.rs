// SPDX-License-Identifier: MIT

//! `mcpmux`: local multiplexing proxy for MCP upstream servers (§1).
//! `mcpmux serve` runs the daemon; `mcpmux call …` is a one-shot
//! control-plane client against a running daemon.

mod app;
mod cli;
mod client;
mod exit_error;
mod listener;
mod paths;

use clap::Parser;
use mux_protocol::Request;
use tracing_subscriber::EnvFilter;

use cli::{CallTarget, Cli, Command};
use exit_error::ExitError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = run(cli).await;
    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(err.code);
    }
}

async fn run(cli: Cli) -> Result<(), ExitError> {
    match cli.command {
        Command::Serve {
            listen,
            data_dir,
            config,
            log_level,
        } => {
            init_tracing(&log_level);
            let data_dir = paths::resolve_data_dir(data_dir.as_deref());
            app::serve(data_dir, config, listen).await.map_err(|err| match err {
                app::StartupError::AlreadyRunning(path) => {
                    ExitError::runtime(format!("mcpmux is already running (lock held at {})", path.display()))
                }
                app::StartupError::Config(_) => ExitError::config(err.to_string()),
                app::StartupError::Io(_) | app::StartupError::Storage(_) => ExitError::runtime(err.to_string()),
            })
        }
        Command::Call { target, data_dir } => {
            init_tracing("warn");
            let data_dir = paths::resolve_data_dir(data_dir.as_deref());
            let request = to_request(target)?;
            client::call(&data_dir, request).await
        }
    }
}

fn to_request(target: CallTarget) -> Result<Request, ExitError> {
    Ok(match target {
        CallTarget::Tool { tool_name, json_args } => {
            let args: serde_json::Value = serde_json::from_str(&json_args)
                .map_err(|err| ExitError::usage(format!("--json_args is not valid JSON: {err}")))?;
            Request::CallTool { name: tool_name, args }
        }
        CallTarget::Tools { query, limit } => Request::RetrieveTools { query, limit },
        CallTarget::Status => Request::Status,
        CallTarget::ListUpstreams => Request::ListUpstreams,
        CallTarget::AddUpstream { entry } => {
            let entry: serde_json::Value =
                serde_json::from_str(&entry).map_err(|err| ExitError::usage(format!("entry is not valid JSON: {err}")))?;
            Request::AddUpstream { entry }
        }
        CallTarget::RemoveUpstream { name } => Request::RemoveUpstream { name },
        CallTarget::PatchUpstream { name, patch } => {
            let patch: serde_json::Value =
                serde_json::from_str(&patch).map_err(|err| ExitError::usage(format!("patch is not valid JSON: {err}")))?;
            Request::PatchUpstream { name, patch }
        }
        CallTarget::Enable { name, disable } => Request::EnableUpstream {
            name,
            enabled: !disable,
        },
        CallTarget::Quarantine { name, off } => Request::QuarantineUpstream { name, on: !off },
        CallTarget::Restart { name } => Request::RestartUpstream { name },
        CallTarget::ClearAutoDisable { name } => Request::ClearAutoDisable { name },
        CallTarget::ToggleGroup { group_id, disable } => Request::ToggleGroup {
            group_id,
            enabled: !disable,
        },
        CallTarget::ToolsStat { top_n } => Request::ToolsStat { top_n },
        CallTarget::TailLog { name, lines } => Request::TailLog { name, lines },
        CallTarget::Shutdown => Request::Shutdown,
    })
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
