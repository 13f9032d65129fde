// SPDX-License-Identifier: MIT

//! HTTP-family transport: one simplified JSON-RPC-over-POST session shared
//! by the http, sse and streamable-http variants. Full SSE event-stream
//! parsing and the streaming half of streamable-http are wire-façade
//! details this core does not implement (spec.md §1 scopes the MCP wire
//! façade itself out); every variant that carries a request URL and
//! headers gets the same plain POST/response round trip here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{RemoteTool, Session};
use crate::error::ClientError;

pub struct HttpSession {
    url: String,
    headers: reqwest::header::HeaderMap,
    client: Client,
    next_id: AtomicU64,
}

impl HttpSession {
    pub async fn connect(
        url: &str,
        headers: &HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ClientError::Transport(format!("invalid header {key:?}: {e}")))?;
            let value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| ClientError::Transport(format!("invalid header value for {key:?}: {e}")))?;
            header_map.insert(name, value);
        }

        let client = Client::builder()
            .timeout(connect_timeout)
            .build()
            .map_err(|e| ClientError::Transport(format!("build http client: {e}")))?;

        let session = Self {
            url: url.to_string(),
            headers: header_map,
            client,
            next_id: AtomicU64::new(1),
        };

        session
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "mux-daemon", "version": env!("CARGO_PKG_VERSION")},
                }),
            )
            .await?;

        Ok(session)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});

        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(method, &e))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ClientError::OAuthRequired(format!(
                "{method}: {} returned {}",
                self.url,
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "{method}: {} returned {}",
                self.url,
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::Transport(format!("{method}: decode response: {e}")))?;
        if let Some(err) = body.get("error") {
            return Err(ClientError::Transport(format!("{method} rejected: {err}")));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

fn classify_reqwest_error(method: &str, err: &reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout(format!("{method}: {err}"))
    } else {
        ClientError::Transport(format!("{method}: {err}"))
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, ClientError> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(tools)
            .map_err(|e| ClientError::Transport(format!("malformed tools/list: {e}")))
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ClientError> {
        self.request("tools/call", json!({"name": name, "arguments": args}))
            .await
    }

    async fn ping(&self) -> Result<(), ClientError> {
        self.request("ping", json!({})).await.map(|_| ())
    }

    async fn close(&self) {
        // Stateless over HTTP: nothing to tear down beyond dropping the client.
    }
}
