// SPDX-License-Identifier: MIT

//! `mcpmux` command-line surface (§6): `serve` runs the daemon, `call`
//! is the one-shot control-plane client.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mcpmux", version, about = "Local multiplexing proxy for MCP upstream servers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground.
    Serve {
        /// Address the (out-of-scope) MCP façade would bind to; recorded
        /// in `mcp_config.json` on first run, otherwise informational.
        #[arg(long, env = "LISTEN")]
        listen: Option<String>,

        /// Data directory holding `config.db`, `mcp_config.json`, logs,
        /// and the control socket. Defaults to `$HOME/.mcpmux`.
        #[arg(long, env = "DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Path to the config file, if it lives outside `data_dir`.
        #[arg(long)]
        config: Option<PathBuf>,

        /// `RUST_LOG`-style filter, e.g. `info`, `debug`, `mux_client=trace`.
        #[arg(long, env = "LOG_LEVEL", default_value = "info")]
        log_level: String,
    },

    /// One-shot control-plane call against a running `mcpmux serve`.
    Call {
        #[command(subcommand)]
        target: CallTarget,

        /// Data directory the daemon is listening in. Defaults to
        /// `$HOME/.mcpmux`.
        #[arg(long, env = "DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum CallTarget {
    /// `call_tool(name, args_json)` (§4.7).
    Tool {
        /// `"{upstream}:{tool}"` composite id.
        #[arg(long = "tool-name")]
        tool_name: String,

        /// Arguments as a JSON object.
        #[arg(long = "json_args", default_value = "{}")]
        json_args: String,
    },

    /// `retrieve_tools(query, limit?)`.
    Tools {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Daemon liveness/status.
    Status,

    /// `upstream_servers(list)`.
    ListUpstreams,

    /// `upstream_servers(add)`: entry as a JSON object, same shape as one
    /// `mcpServers[]` element.
    AddUpstream {
        /// JSON-encoded `UpstreamEntry`.
        entry: String,
    },

    /// `upstream_servers(remove)`.
    RemoveUpstream { name: String },

    /// `upstream_servers(patch)`: merges the given fields into the
    /// existing entry.
    PatchUpstream {
        name: String,
        /// JSON object of fields to merge in.
        patch: String,
    },

    /// `upstream_servers(enable/disable)`.
    Enable {
        name: String,
        #[arg(long)]
        disable: bool,
    },

    /// `upstream_servers(quarantine)`.
    Quarantine {
        name: String,
        #[arg(long)]
        off: bool,
    },

    /// `upstream_servers(restart)`.
    Restart { name: String },

    /// Manual `ClearAutoDisable(name)`.
    ClearAutoDisable { name: String },

    /// Bulk group toggle.
    ToggleGroup {
        group_id: i64,
        #[arg(long)]
        disable: bool,
    },

    /// `tools_stat(topN)`.
    ToolsStat {
        #[arg(long, default_value_t = 10)]
        top_n: usize,
    },

    /// `upstream_servers(tail_log)`.
    TailLog {
        name: String,
        #[arg(long, default_value_t = 100)]
        lines: usize,
    },

    /// Ask the daemon to shut down cleanly.
    Shutdown,
}
