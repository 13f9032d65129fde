// SPDX-License-Identifier: MIT

//! stdio transport: the upstream is a child process speaking
//! newline-delimited JSON-RPC over its stdin/stdout. The child is placed
//! in its own process group so teardown can reach everything it spawned,
//! not just the direct child (§5).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex as AsyncMutex;

use super::{RemoteTool, Session};
use crate::error::ClientError;

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub struct StdioSession {
    name: String,
    child: AsyncMutex<Child>,
    stdin: AsyncMutex<ChildStdin>,
    stdout: AsyncMutex<BufReader<tokio::process::ChildStdout>>,
    next_id: AtomicU64,
    pgid: Option<i32>,
}

impl StdioSession {
    #[allow(clippy::too_many_arguments)]
    pub async fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        working_dir: Option<&str>,
        env: &HashMap<String, String>,
        connect_timeout: Duration,
        stderr_log_path: Option<PathBuf>,
    ) -> Result<Self, ClientError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            // Starts a new process group rooted at the child itself, so a
            // single killpg reaches everything the upstream forks.
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ClientError::Transport(format!("spawn {command:?}: {e}")))?;
        let pgid = child.id().map(|pid| pid as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Transport(format!("{name}: no stdin pipe")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Transport(format!("{name}: no stdout pipe")))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_sink(name.to_string(), stderr, stderr_log_path);
        }

        let session = Self {
            name: name.to_string(),
            child: AsyncMutex::new(child),
            stdin: AsyncMutex::new(stdin),
            stdout: AsyncMutex::new(BufReader::new(stdout)),
            next_id: AtomicU64::new(1),
            pgid,
        };

        tokio::time::timeout(connect_timeout, session.handshake())
            .await
            .map_err(|_| ClientError::Timeout(format!("{name} handshake")))??;

        Ok(session)
    }

    pub fn pgid(&self) -> Option<i32> {
        self.pgid
    }

    async fn handshake(&self) -> Result<(), ClientError> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "mux-daemon", "version": env!("CARGO_PKG_VERSION")},
            }),
        )
        .await?;
        self.notify("notifications/initialized", json!({})).await?;
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.write_line(&payload).await?;

        let mut stdout = self.stdout.lock().await;
        loop {
            let mut line = String::new();
            let n = stdout
                .read_line(&mut line)
                .await
                .map_err(|e| ClientError::Transport(format!("{}: read: {e}", self.name)))?;
            if n == 0 {
                return Err(ClientError::Transport(format!("{} closed stdout", self.name)));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
                continue;
            };
            // Skip notifications and responses to requests we've already
            // given up on; only the matching id completes this call.
            if value.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(err) = value.get("error") {
                return Err(ClientError::Transport(format!("{method} rejected: {err}")));
            }
            return Ok(value.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ClientError> {
        let payload = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.write_line(&payload).await
    }

    async fn write_line(&self, payload: &Value) -> Result<(), ClientError> {
        let mut line = serde_json::to_string(payload)
            .map_err(|e| ClientError::Transport(format!("encode: {e}")))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ClientError::Transport(format!("{}: write: {e}", self.name)))?;
        stdin
            .flush()
            .await
            .map_err(|e| ClientError::Transport(format!("{}: flush: {e}", self.name)))
    }
}

#[async_trait]
impl Session for StdioSession {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, ClientError> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(tools)
            .map_err(|e| ClientError::Transport(format!("{}: malformed tools/list: {e}", self.name)))
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ClientError> {
        self.request("tools/call", json!({"name": name, "arguments": args}))
            .await
    }

    async fn ping(&self) -> Result<(), ClientError> {
        self.request("ping", json!({})).await.map(|_| ())
    }

    async fn close(&self) {
        let grace = Duration::from_secs(5);
        if let Some(pgid) = self.pgid {
            let _ = crate::process_group::terminate_group(pgid, false);
            let waited = tokio::time::timeout(grace, self.child.lock().await.wait()).await;
            if waited.is_err() {
                let _ = crate::process_group::terminate_group(pgid, true);
            }
        }
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }

    fn pgid(&self) -> Option<i32> {
        self.pgid
    }
}

/// Maximum stderr log size before rotation (10 MB), matching the daemon's
/// own metrics-file rotation constant.
const MAX_STDERR_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated files to keep (`{name}.stderr.log.1` .. `.3`).
const MAX_ROTATED_STDERR_FILES: u32 = 3;

fn spawn_stderr_sink(
    name: String,
    stderr: tokio::process::ChildStderr,
    log_path: Option<PathBuf>,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        let mut file = match &log_path {
            Some(path) => tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .ok(),
            None => None,
        };
        while let Ok(Some(line)) = reader.next_line().await {
            if let (Some(path), Some(current)) = (&log_path, file.as_mut()) {
                if rotate_stderr_log_if_needed(path).await {
                    *current = match tokio::fs::OpenOptions::new().create(true).append(true).open(path).await {
                        Ok(reopened) => reopened,
                        Err(err) => {
                            tracing::warn!(upstream = %name, %err, "failed to reopen stderr log after rotation");
                            continue;
                        }
                    };
                }
                let _ = current.write_all(line.as_bytes()).await;
                let _ = current.write_all(b"\n").await;
            } else {
                tracing::debug!(upstream = %name, "{line}");
            }
        }
    });
}

/// Rotates `path` → `path.1` → `path.2` → `path.3` (oldest dropped) once it
/// crosses [`MAX_STDERR_LOG_SIZE`], so a long-lived noisy upstream can't
/// grow its stderr sink without bound. Returns whether a rotation happened,
/// so the caller knows to reopen its file handle.
async fn rotate_stderr_log_if_needed(path: &std::path::Path) -> bool {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(_) => return false,
    };
    if size < MAX_STDERR_LOG_SIZE {
        return false;
    }

    let path_str = path.display().to_string();
    for i in (1..MAX_ROTATED_STDERR_FILES).rev() {
        let from = format!("{path_str}.{i}");
        let to = format!("{path_str}.{}", i + 1);
        let _ = tokio::fs::rename(&from, &to).await;
    }
    let _ = tokio::fs::rename(path, format!("{path_str}.1")).await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_missing_command_errors() {
        let err = StdioSession::spawn(
            "ghost",
            "definitely-not-a-real-binary-xyz",
            &[],
            None,
            &HashMap::new(),
            Duration::from_millis(200),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[tokio::test]
    async fn cat_echoes_request_id_mismatch_keeps_waiting_until_timeout() {
        // `cat` never produces a JSON-RPC response, so the handshake should
        // time out rather than hang forever.
        let err = StdioSession::spawn(
            "cat-upstream",
            "cat",
            &[],
            None,
            &HashMap::new(),
            Duration::from_millis(300),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
    }
}
