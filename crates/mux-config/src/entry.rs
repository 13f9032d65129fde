// SPDX-License-Identifier: MIT

//! `mcpServers` entries (§6's `mcp_config.json` format) plus the legacy
//! boolean migration table (§4.3). An entry on disk may carry either the
//! canonical `startup_mode` or any mix of the legacy flags; `migrate`
//! normalises to the former exactly once and is idempotent thereafter.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mux_core::{Audit, OAuthConfig, Options, StartupMode, Transport, Upstream};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamEntry {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_mode: Option<StartupMode>,

    // Legacy fields (§4.3 migration table). Cleared once `startup_mode` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantined: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped: Option<bool>,

    pub protocol: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_disable_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_on_boot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_disable_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<serde_json::Value>,
}

impl UpstreamEntry {
    /// Applies the §4.3 migration table in place. Returns `true` if the
    /// entry was changed (either a fresh migration, or stray legacy fields
    /// left behind by a hand-edited file were swept away). Idempotent:
    /// calling this twice on the same entry is a no-op the second time.
    pub fn migrate(&mut self) -> bool {
        if self.startup_mode.is_some() {
            let had_legacy = self.enabled.take().is_some()
                | self.quarantined.take().is_some()
                | self.auto_disabled.take().is_some()
                | self.stopped.take().is_some();
            return had_legacy;
        }

        let mode = if self.quarantined.unwrap_or(false) {
            StartupMode::Quarantined
        } else if self.auto_disabled.unwrap_or(false) {
            StartupMode::AutoDisabled
        } else if !self.enabled.unwrap_or(true) {
            StartupMode::Disabled
        } else if !self.start_on_boot.unwrap_or(true) {
            StartupMode::LazyLoading
        } else {
            StartupMode::Active
        };

        self.startup_mode = Some(mode);
        self.enabled = None;
        self.quarantined = None;
        self.auto_disabled = None;
        self.stopped = None;
        true
    }

    pub fn to_transport(&self) -> Option<Transport> {
        match self.protocol.as_str() {
            "stdio" => Some(Transport::Stdio {
                command: self.command.clone()?,
                args: self.args.clone(),
                working_dir: self.working_dir.clone(),
                env: self.env.clone(),
            }),
            "http" => Some(Transport::Http {
                url: self.url.clone()?,
                headers: self.headers.clone(),
                oauth: self.oauth.clone(),
            }),
            "sse" => Some(Transport::Sse {
                url: self.url.clone()?,
                headers: self.headers.clone(),
                oauth: self.oauth.clone(),
            }),
            "streamable-http" => Some(Transport::StreamableHttp {
                url: self.url.clone()?,
                headers: self.headers.clone(),
                oauth: self.oauth.clone(),
            }),
            _ => None,
        }
    }

    /// Converts a migrated entry into the runtime `Upstream` record.
    /// Returns `None` if `migrate` hasn't run yet (`startup_mode` still
    /// unset) or the transport fields don't resolve via `to_transport` —
    /// callers skip and report such entries rather than treating them as
    /// fatal (§7: "individual invalid server entries are skipped and
    /// reported, not fatal").
    pub fn into_upstream(self, now: DateTime<Utc>) -> Option<Upstream> {
        let transport = self.to_transport()?;
        let startup_mode = self.startup_mode?;
        let options = Options::builder()
            .start_on_boot(self.start_on_boot.unwrap_or(true))
            .health_check(self.health_check.unwrap_or(false));
        let options = match self.group_id {
            Some(g) => options.group_id(g),
            None => options,
        };
        let options = match self.repository_url.clone() {
            Some(r) => options.repository_url(r),
            None => options,
        };
        let options = match self.auto_disable_threshold {
            Some(t) => options.auto_disable_threshold(t),
            None => options,
        };
        let options = match self.isolation.clone() {
            Some(v) => options.isolation(v),
            None => options,
        };
        let mut audit = Audit::new(now);
        audit.last_auto_disable_reason = self.auto_disable_reason.clone();

        Some(Upstream {
            name: self.name,
            transport,
            options: options.build(),
            startup_mode,
            audit,
        })
    }

    pub fn from_upstream(up: &Upstream) -> Self {
        let (protocol, command, args, working_dir, env, url, headers, oauth) = match &up.transport {
            Transport::Stdio { command, args, working_dir, env } => (
                "stdio",
                Some(command.clone()),
                args.clone(),
                working_dir.clone(),
                env.clone(),
                None,
                HashMap::new(),
                None,
            ),
            Transport::Http { url, headers, oauth } => {
                ("http", None, Vec::new(), None, HashMap::new(), Some(url.clone()), headers.clone(), oauth.clone())
            }
            Transport::Sse { url, headers, oauth } => {
                ("sse", None, Vec::new(), None, HashMap::new(), Some(url.clone()), headers.clone(), oauth.clone())
            }
            Transport::StreamableHttp { url, headers, oauth } => (
                "streamable-http",
                None,
                Vec::new(),
                None,
                HashMap::new(),
                Some(url.clone()),
                headers.clone(),
                oauth.clone(),
            ),
        };

        Self {
            name: up.name.clone(),
            startup_mode: Some(up.startup_mode),
            enabled: None,
            quarantined: None,
            auto_disabled: None,
            stopped: None,
            protocol: protocol.to_string(),
            command,
            args,
            working_dir,
            env,
            url,
            headers,
            oauth,
            auto_disable_threshold: up.options.auto_disable_threshold,
            start_on_boot: Some(up.options.start_on_boot),
            health_check: Some(up.options.health_check),
            group_id: up.options.group_id,
            auto_disable_reason: up.audit.last_auto_disable_reason.clone(),
            repository_url: up.options.repository_url.clone(),
            isolation: up.options.isolation.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupEntry {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(name: &str) -> UpstreamEntry {
        UpstreamEntry {
            name: name.into(),
            startup_mode: None,
            enabled: None,
            quarantined: None,
            auto_disabled: None,
            stopped: None,
            protocol: "stdio".into(),
            command: Some("true".into()),
            args: vec![],
            working_dir: None,
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            oauth: None,
            auto_disable_threshold: None,
            start_on_boot: None,
            health_check: None,
            group_id: None,
            auto_disable_reason: None,
            repository_url: None,
            isolation: None,
        }
    }

    #[test]
    fn quarantined_true_wins_migration() {
        let mut e = base("a");
        e.quarantined = Some(true);
        e.enabled = Some(true);
        assert!(e.migrate());
        assert_eq!(e.startup_mode, Some(StartupMode::Quarantined));
        assert!(e.enabled.is_none() && e.quarantined.is_none());
    }

    #[test]
    fn enabled_false_becomes_disabled() {
        let mut e = base("a");
        e.enabled = Some(false);
        e.migrate();
        assert_eq!(e.startup_mode, Some(StartupMode::Disabled));
    }

    #[test]
    fn enabled_true_start_on_boot_false_becomes_lazy_loading() {
        let mut e = base("a");
        e.enabled = Some(true);
        e.start_on_boot = Some(false);
        e.migrate();
        assert_eq!(e.startup_mode, Some(StartupMode::LazyLoading));
    }

    #[test]
    fn enabled_true_start_on_boot_absent_becomes_active() {
        let mut e = base("a");
        e.enabled = Some(true);
        e.migrate();
        assert_eq!(e.startup_mode, Some(StartupMode::Active));
    }

    #[test]
    fn migration_is_idempotent() {
        let mut e = base("a");
        e.quarantined = Some(true);
        e.migrate();
        let after_first = e.clone();
        e.migrate();
        assert_eq!(e, after_first);
    }

    #[test]
    fn already_migrated_entry_sweeps_stray_legacy_fields() {
        let mut e = base("a");
        e.startup_mode = Some(StartupMode::Active);
        e.enabled = Some(true); // stray, hand-edited file
        assert!(e.migrate());
        assert!(e.enabled.is_none());
        assert_eq!(e.startup_mode, Some(StartupMode::Active));
    }

    #[test]
    fn round_trips_through_upstream() {
        let mut e = base("a");
        e.migrate();
        let now = Utc::now();
        let up = e.clone().into_upstream(now).unwrap();
        let back = UpstreamEntry::from_upstream(&up);
        assert_eq!(back.protocol, "stdio");
        assert_eq!(back.command, Some("true".into()));
        assert_eq!(back.startup_mode, Some(StartupMode::Active));
    }
}
