// SPDX-License-Identifier: MIT

//! The `Upstream` record: identity, transport, options, and the single
//! persisted lifecycle indicator (`startup_mode`).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{setters, simple_display};

crate::define_id!(pub struct UpstreamId, prefix = "srv", cap = 24);

/// The single source of truth for whether an upstream should be running.
///
/// Replaces the historical product of boolean flags (`enabled`,
/// `quarantined`, `auto_disabled`, `stopped`, `start_on_boot`) with one
/// enum so that "what does the user want" always has exactly one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    Active,
    LazyLoading,
    Disabled,
    Quarantined,
    AutoDisabled,
}

simple_display!(StartupMode {
    Active => "active",
    LazyLoading => "lazy_loading",
    Disabled => "disabled",
    Quarantined => "quarantined",
    AutoDisabled => "auto_disabled",
});

impl StartupMode {
    /// True for modes in which the Manager must guarantee no connection
    /// attempt is ever scheduled (I4).
    pub fn is_connect_forbidden(self) -> bool {
        matches!(
            self,
            StartupMode::Disabled | StartupMode::Quarantined | StartupMode::AutoDisabled
        )
    }

    /// Excluded from the set `E` used by app-state aggregation (§4.6).
    pub fn excluded_from_app_state(self) -> bool {
        matches!(
            self,
            StartupMode::Disabled | StartupMode::Quarantined | StartupMode::AutoDisabled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OAuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorize_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

/// Transport variant. Fields are disjoint per variant by construction:
/// stdio carries process-spawn fields, the rest carry URL/HTTP fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "kebab-case")]
pub enum Transport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        working_dir: Option<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        oauth: Option<OAuthConfig>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        oauth: Option<OAuthConfig>,
    },
    #[serde(rename = "streamable-http")]
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        oauth: Option<OAuthConfig>,
    },
}

impl Transport {
    pub fn is_stdio(&self) -> bool {
        matches!(self, Transport::Stdio { .. })
    }

    pub fn requires_oauth_flow(&self) -> bool {
        match self {
            Transport::Stdio { .. } => false,
            Transport::Http { oauth, .. }
            | Transport::Sse { oauth, .. }
            | Transport::StreamableHttp { oauth, .. } => oauth.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_disable_threshold: Option<u32>,
    #[serde(default)]
    pub start_on_boot: bool,
    #[serde(default)]
    pub health_check: bool,
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder(Options);

impl OptionsBuilder {
    setters! {
        option {
            group_id: i64,
            repository_url: String,
            auto_disable_threshold: u32,
        }
        set {
            start_on_boot: bool,
            health_check: bool,
        }
    }

    pub fn isolation(mut self, v: serde_json::Value) -> Self {
        self.0.isolation = Some(v);
        self
    }

    pub fn build(self) -> Options {
        self.0
    }
}

/// Provenance fields kept purely for observability; never drive behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ever_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_auto_disable_reason: Option<String>,
}

impl Audit {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            last_connected_at: None,
            ever_connected: false,
            last_auto_disable_reason: None,
        }
    }

    pub fn mark_connected(&mut self, now: DateTime<Utc>) {
        self.last_connected_at = Some(now);
        self.ever_connected = true;
        self.updated_at = now;
    }

    pub fn mark_auto_disabled(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.last_auto_disable_reason = Some(reason.into());
        self.updated_at = now;
    }
}

/// Logical identity of one MCP server this process proxies. `name` is the
/// primary key (I1): unique across Storage and the config file at all times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upstream {
    pub name: String,
    pub transport: Transport,
    #[serde(default)]
    pub options: Options,
    pub startup_mode: StartupMode,
    pub audit: Audit,
}

impl Upstream {
    pub fn new(name: impl Into<String>, transport: Transport, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            transport,
            options: Options::default(),
            startup_mode: StartupMode::Active,
            audit: Audit::new(now),
        }
    }

    /// Threshold at which `HandleConnectionFailure` trips auto-disable,
    /// falling back to the process-wide default when unset per-server.
    pub fn auto_disable_threshold(&self, default: u32) -> u32 {
        self.options.auto_disable_threshold.unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_forbidden_modes_match_spec() {
        assert!(StartupMode::Disabled.is_connect_forbidden());
        assert!(StartupMode::Quarantined.is_connect_forbidden());
        assert!(StartupMode::AutoDisabled.is_connect_forbidden());
        assert!(!StartupMode::Active.is_connect_forbidden());
        assert!(!StartupMode::LazyLoading.is_connect_forbidden());
    }

    #[test]
    fn transport_tag_round_trips_through_json() {
        let t = Transport::Stdio {
            command: "true".into(),
            args: vec![],
            working_dir: None,
            env: HashMap::new(),
        };
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["protocol"], "stdio");
        let back: Transport = serde_json::from_value(v).unwrap();
        assert!(back.is_stdio());
    }
}
