// SPDX-License-Identifier: MIT

//! The shared failure taxonomy (§7): every persisted failure record
//! carries one of these kinds plus machine-readable suggestions.

use serde::{Deserialize, Serialize};

use crate::simple_display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Timeout,
    Oauth,
    Network,
    Config,
    Permission,
    MissingPackage,
    Protocol,
    Internal,
    User,
}

simple_display!(FailureCategory {
    Timeout => "timeout",
    Oauth => "oauth",
    Network => "network",
    Config => "config",
    Permission => "permission",
    MissingPackage => "missing_package",
    Protocol => "protocol",
    Internal => "internal",
    User => "user",
});

impl FailureCategory {
    /// Best-effort classification from a raw error message, used when a
    /// transport surfaces only a string (e.g. process spawn failures).
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("no such file") || lower.contains("not found") || lower.contains("command not found") {
            FailureCategory::MissingPackage
        } else if lower.contains("oauth") || lower.contains("unauthorized") || lower.contains("401") {
            FailureCategory::Oauth
        } else if lower.contains("permission denied") || lower.contains("forbidden") || lower.contains("403") {
            FailureCategory::Permission
        } else if lower.contains("timed out") || lower.contains("timeout") {
            FailureCategory::Timeout
        } else if lower.contains("connection refused") || lower.contains("dns") || lower.contains("network") {
            FailureCategory::Network
        } else if lower.contains("invalid config") || lower.contains("parse error") {
            FailureCategory::Config
        } else {
            FailureCategory::Internal
        }
    }

    /// Canned remediation hints surfaced alongside a failure log record.
    pub fn suggestions(self) -> &'static [&'static str] {
        match self {
            FailureCategory::MissingPackage => &["install the missing executable and ensure it is on PATH"],
            FailureCategory::Oauth => &["re-authorize this upstream", "check that the OAuth client credentials are valid"],
            FailureCategory::Permission => &["check file permissions and OS-level sandboxing policy"],
            FailureCategory::Timeout => &["increase connection_timeout", "check that the upstream process starts promptly"],
            FailureCategory::Network => &["verify network connectivity and DNS resolution to the upstream"],
            FailureCategory::Config => &["inspect mcp_config.json for malformed fields on this entry"],
            FailureCategory::Protocol => &["verify the upstream speaks a supported MCP transport version"],
            FailureCategory::Internal | FailureCategory::User => &[],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid state transition: {0}")]
    Transition(#[from] crate::state_machine::TransitionError),
    #[error("{category}: {message}")]
    Classified {
        category: FailureCategory,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_recognises_missing_binary() {
        assert_eq!(
            FailureCategory::classify("exec: \"nonexistent-cmd\": executable file not found in $PATH"),
            FailureCategory::MissingPackage
        );
    }

    #[test]
    fn classify_falls_back_to_internal() {
        assert_eq!(FailureCategory::classify("something weird happened"), FailureCategory::Internal);
    }
}
