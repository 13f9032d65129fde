// SPDX-License-Identifier: MIT

//! `ManagedClient` (§4.5): the one-per-upstream actor owning connect,
//! discovery, the tool-list cache, `call_tool`, health checks, and
//! teardown. State-machine mutation and event publication live here
//! rather than in the state machine itself (§9): the state machine only
//! reports outcomes, this actor decides what they mean for Storage and
//! the bus.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mux_bus::EventBus;
use mux_core::event::Event;
use mux_core::{
    ConnectionState, FailureCategory, FailureOutcome, StartupMode, ToolMetadata, Transport,
    UpstreamStateMachine,
};
use mux_core::clock::SharedClock;
use mux_storage::Storage;
use tokio::sync::Mutex as AsyncMutex;

use crate::cache::{Refresh, ToolListCache};
use crate::error::ClientError;
use crate::process_group;
use crate::transport::{self, Session};

/// Narrow callback the Manager implements so `ManagedClient` can trigger
/// auto-disable without depending on `mux-manager` (mirrors
/// `mux_storage::ConfigWriter`'s decoupling, §9).
pub trait AutoDisableSink: Send + Sync {
    fn trip_auto_disable(&self, upstream: &str, reason: &str);
}

pub struct ManagedClient {
    name: String,
    transport: Transport,
    machine: UpstreamStateMachine,
    storage: Arc<Storage>,
    bus: EventBus,
    clock: SharedClock,
    connect_timeout: Duration,
    data_dir: PathBuf,
    auto_disable_sink: Option<Arc<dyn AutoDisableSink>>,
    session: AsyncMutex<Option<Box<dyn Session>>>,
    cache: AsyncMutex<ToolListCache>,
}

impl ManagedClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        transport: Transport,
        machine: UpstreamStateMachine,
        storage: Arc<Storage>,
        bus: EventBus,
        clock: SharedClock,
        connect_timeout: Duration,
        data_dir: PathBuf,
        cache_ttl: chrono::Duration,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            machine,
            storage,
            bus,
            clock,
            connect_timeout,
            data_dir,
            auto_disable_sink: None,
            session: AsyncMutex::new(None),
            cache: AsyncMutex::new(ToolListCache::new(cache_ttl)),
        }
    }

    pub fn with_auto_disable_sink(mut self, sink: Arc<dyn AutoDisableSink>) -> Self {
        self.auto_disable_sink = Some(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn machine(&self) -> &UpstreamStateMachine {
        &self.machine
    }

    /// Step 1: open the transport, authenticate, and discover tools on
    /// first `Ready`. `startup_mode` in `{disabled, quarantined,
    /// auto_disabled}` forbids any connection attempt (I4).
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.machine.startup_mode().is_connect_forbidden() {
            return Err(ClientError::Rejected(
                self.name.clone(),
                "connection attempts are forbidden in this startup_mode",
            ));
        }

        let previous = self.machine.transition_to(ConnectionState::Connecting)?;
        self.publish_state(previous, ConnectionState::Connecting);

        let stderr_log_path = Some(self.data_dir.join("logs").join(format!("{}.stderr.log", self.name)));
        match transport::connect(&self.name, &self.transport, self.connect_timeout, stderr_log_path).await {
            Ok(session) => {
                if let Some(pgid) = session.pgid() {
                    let _ = process_group::write_cidfile(&self.data_dir, &self.name, pgid);
                }
                *self.session.lock().await = Some(session);
                self.machine.transition_to(ConnectionState::Ready)?;
                let now = self.clock.now_utc();
                self.bus.publish(Event::ConnectionEstablished {
                    server_name: self.name.clone(),
                    timestamp: now,
                });
                self.publish_state(ConnectionState::Connecting, ConnectionState::Ready);
                self.discover_tools().await?;
                Ok(())
            }
            Err(ClientError::OAuthRequired(msg)) => {
                let _ = self.machine.transition_to(ConnectionState::Authenticating);
                let _ = self.machine.set_oauth_error(msg.clone());
                self.maybe_trip_auto_disable(FailureCategory::Oauth, &msg).await;
                Err(ClientError::OAuthRequired(msg))
            }
            Err(err) => {
                self.record_failure(&err).await;
                Err(err)
            }
        }
    }

    /// Step 2 / 3: `tools/list`, persisted only when the content hash
    /// changed since the last fetch (§4.5.3's suppression rule).
    pub async fn discover_tools(&self) -> Result<(), ClientError> {
        let remote_tools = {
            let guard = self.session.lock().await;
            let Some(session) = guard.as_ref() else {
                return Err(ClientError::Transport(format!("{}: discover_tools without a session", self.name)));
            };
            session.list_tools().await?
        };

        let now = self.clock.now_utc();
        let tools: Vec<ToolMetadata> = remote_tools
            .into_iter()
            .map(|t| ToolMetadata::new(self.name.clone(), t.name, t.description, t.input_schema, now))
            .collect();

        let refresh = {
            let mut cache = self.cache.lock().await;
            cache.offer(tools.clone(), now)
        };

        if let Refresh::Changed = refresh {
            self.storage.save_tool_metadata(&self.name, &tools)?;
            self.bus.publish(Event::ToolsUpdated {
                server_name: self.name.clone(),
                tool_count: tools.len(),
                timestamp: now,
            });
        }
        Ok(())
    }

    /// Step 4: reject fast for forbidden modes, wake a sleeping
    /// lazy-loading upstream, otherwise dispatch straight through.
    pub async fn call_tool(&self, tool: &str, args: serde_json::Value) -> Result<serde_json::Value, ClientError> {
        let mode = self.machine.startup_mode();
        if mode.is_connect_forbidden() {
            return Err(ClientError::Rejected(
                self.name.clone(),
                "upstream is disabled, quarantined, or auto-disabled",
            ));
        }

        if mode == StartupMode::LazyLoading && self.machine.connection_state() != ConnectionState::Ready {
            self.connect().await?;
        }

        let started = std::time::Instant::now();
        let result = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(session) => session.call_tool(tool, args).await,
                None => Err(ClientError::Transport(format!("{}: not connected", self.name))),
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let now = self.clock.now_utc();

        // Tool-call failures are surfaced to the caller verbatim and never
        // counted as connection failures (§4.5 failure semantics) — only
        // transport-level errors reach `record_failure`.
        self.bus.publish(Event::ToolCalled {
            server_name: self.name.clone(),
            tool_name: tool.to_string(),
            duration_ms,
            success: result.is_ok(),
            timestamp: now,
        });
        result
    }

    /// Step 5: the fixed four-step order from §4.5.
    pub async fn health_check_tick(&self) {
        if self.machine.handle_connection_failure() == FailureOutcome::TripAutoDisable {
            self.trip_auto_disable("exceeded consecutive failure threshold").await;
            return;
        }
        if self.machine.startup_mode() == StartupMode::AutoDisabled {
            return;
        }
        if self.machine.connection_state() != ConnectionState::Ready {
            let info = self.machine.get_connection_info();
            let retry_due = if info.is_oauth_error {
                self.machine.should_retry_oauth()
            } else {
                self.machine.should_retry()
            };
            if retry_due {
                let _ = self.connect().await;
            }
            return;
        }

        let ping_result = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(session) => Some(session.ping().await),
                None => None,
            }
        };
        if let Some(Err(err)) = ping_result {
            self.record_failure(&err).await;
        }
    }

    /// Step 6: polite shutdown, then kill the process group; clean up
    /// cidfiles. `in_flight_grace` bounds how long we wait for the
    /// transport's own close to finish before moving on.
    pub async fn disconnect(&self, in_flight_grace: Duration) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            let _ = tokio::time::timeout(in_flight_grace, session.close()).await;
        }
        process_group::remove_cidfile(&self.data_dir, &self.name);
        let _ = self.machine.transition_to(ConnectionState::Disconnected);
        self.cache.lock().await.clear();
        let now = self.clock.now_utc();
        self.bus.publish(Event::ConnectionLost {
            server_name: self.name.clone(),
            timestamp: now,
        });
    }

    /// Idles a `Ready` lazy-loading upstream down without tearing down
    /// cidfiles/logs — distinct from `disconnect`, which is a full
    /// teardown. The session itself is still closed: waking back up
    /// re-`connect()`s from scratch.
    pub async fn sleep(&self) -> Result<(), ClientError> {
        self.machine.transition_to(ConnectionState::Sleeping)?;
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.close().await;
        }
        Ok(())
    }

    async fn record_failure(&self, err: &ClientError) {
        let category = err.category();
        let previous = if category == FailureCategory::Oauth {
            self.machine.set_oauth_error(err.to_string())
        } else {
            self.machine.set_error(err.to_string())
        };
        if let Ok(old_state) = previous {
            let now = self.clock.now_utc();
            self.bus.publish(Event::ServerStateChanged {
                server_name: self.name.clone(),
                old_state,
                new_state: ConnectionState::Error,
                timestamp: now,
            });
            self.bus.publish(Event::ConnectionLost {
                server_name: self.name.clone(),
                timestamp: now,
            });
        }
        self.maybe_trip_auto_disable(category, &err.to_string()).await;
    }

    async fn maybe_trip_auto_disable(&self, category: FailureCategory, message: &str) {
        if self.machine.handle_connection_failure() == FailureOutcome::TripAutoDisable {
            self.trip_auto_disable(&format!("{category}: {message}")).await;
        }
    }

    async fn trip_auto_disable(&self, reason: &str) {
        if let Some(sink) = &self.auto_disable_sink {
            sink.trip_auto_disable(&self.name, reason);
        }
        self.machine.set_startup_mode(StartupMode::AutoDisabled);
        let now = self.clock.now_utc();
        self.bus.publish(Event::ServerAutoDisabled {
            server_name: self.name.clone(),
            reason: reason.to_string(),
            timestamp: now,
        });
    }

    fn publish_state(&self, old_state: ConnectionState, new_state: ConnectionState) {
        let now = self.clock.now_utc();
        self.bus.publish(Event::ServerStateChanged {
            server_name: self.name.clone(),
            old_state,
            new_state,
            timestamp: now,
        });
    }
}

/// Cidfile/log directory convention shared with `mux-manager`'s startup sweep.
pub fn logs_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}
