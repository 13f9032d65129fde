// SPDX-License-Identifier: MIT

//! `failed_servers.log` (§6, §4.6 step 3): an append-only structured
//! record of every auto-disable occurrence, one JSON object per line,
//! carrying the §7 failure taxonomy plus canned remediation suggestions.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mux_core::FailureCategory;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub upstream: String,
    pub category: FailureCategory,
    pub reason: String,
    pub suggestions: Vec<&'static str>,
    pub timestamp: DateTime<Utc>,
}

/// Best-effort classifier for the reason strings `ManagedClient` hands to
/// its `AutoDisableSink` (formatted as `"{category}: {message}"` by
/// `mux_client::client::ManagedClient::maybe_trip_auto_disable`). Falls
/// back to raw-message classification when the prefix isn't recognised
/// (e.g. a reason supplied directly by a manual caller).
pub fn category_from_reason(reason: &str) -> FailureCategory {
    if let Some((prefix, _)) = reason.split_once(": ") {
        for category in [
            FailureCategory::Timeout,
            FailureCategory::Oauth,
            FailureCategory::Network,
            FailureCategory::Config,
            FailureCategory::Permission,
            FailureCategory::MissingPackage,
            FailureCategory::Protocol,
            FailureCategory::Internal,
            FailureCategory::User,
        ] {
            if category.to_string() == prefix {
                return category;
            }
        }
    }
    FailureCategory::classify(reason)
}

pub struct FailureLog {
    path: PathBuf,
    lock: parking_lot::Mutex<()>,
}

impl FailureLog {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("failed_servers.log"),
            lock: parking_lot::Mutex::new(()),
        }
    }

    /// Appends one record as a single JSON line. Best-effort: a write
    /// failure is logged, not propagated, since auto-disable itself must
    /// still complete (§7: the two-phase commit, not the audit log, is
    /// what's load-bearing).
    pub fn append(&self, upstream: &str, reason: &str, timestamp: DateTime<Utc>) {
        let category = category_from_reason(reason);
        let record = FailureRecord {
            upstream: upstream.to_string(),
            category,
            reason: reason.to_string(),
            suggestions: category.suggestions().to_vec(),
            timestamp,
        };
        let _guard = self.lock.lock();
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            let line = serde_json::to_string(&record).unwrap_or_default();
            writeln!(file, "{line}")
        })();
        if let Err(err) = result {
            tracing::warn!(upstream, %err, "failed to append failure log record");
        }
    }
}
