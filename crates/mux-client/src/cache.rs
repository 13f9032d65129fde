// SPDX-License-Identifier: MIT

//! Per-upstream tool-list cache (§4.5.3). A fresh discovery only replaces
//! the stored copy, and only fires `ToolsUpdated`, when its content hash
//! actually differs from what's cached — repeated polls of an unchanged
//! upstream should be silent.

use chrono::{DateTime, Utc};
use mux_core::ToolMetadata;

pub struct ToolListCache {
    ttl: chrono::Duration,
    entries: Option<CachedList>,
}

struct CachedList {
    tools: Vec<ToolMetadata>,
    hash: String,
    fetched_at: DateTime<Utc>,
}

/// Outcome of offering a freshly-fetched tool list to the cache.
pub enum Refresh {
    /// Content hash matched what was cached; the old list is kept as-is.
    Unchanged,
    /// Content hash differed (or nothing was cached yet); callers should
    /// publish `ToolsUpdated` and persist the new list.
    Changed,
}

impl ToolListCache {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self { ttl, entries: None }
    }

    /// Default TTL per spec.md §6 (`tool_cache_ttl`, 300s).
    pub fn with_default_ttl() -> Self {
        Self::new(chrono::Duration::seconds(300))
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match &self.entries {
            None => true,
            Some(cached) => now - cached.fetched_at >= self.ttl,
        }
    }

    pub fn get(&self) -> Option<&[ToolMetadata]> {
        self.entries.as_ref().map(|c| c.tools.as_slice())
    }

    /// Offers a newly-fetched tool list. Replaces the cache unconditionally
    /// (the fetch timestamp always advances, so TTL staleness resets) but
    /// reports `Unchanged` when the content is identical so callers can
    /// skip re-indexing and re-announcing.
    pub fn offer(&mut self, tools: Vec<ToolMetadata>, now: DateTime<Utc>) -> Refresh {
        let hash = mux_core::hash_tool_list(&tools);
        let changed = self.entries.as_ref().map(|c| c.hash != hash).unwrap_or(true);
        self.entries = Some(CachedList {
            tools,
            hash,
            fetched_at: now,
        });
        if changed {
            Refresh::Changed
        } else {
            Refresh::Unchanged
        }
    }

    pub fn clear(&mut self) {
        self.entries = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(now: DateTime<Utc>) -> ToolMetadata {
        ToolMetadata::new("gh", "create_issue", "desc", serde_json::json!({}), now)
    }

    #[test]
    fn empty_cache_is_stale() {
        let cache = ToolListCache::with_default_ttl();
        assert!(cache.is_stale(Utc::now()));
    }

    #[test]
    fn identical_refresh_reports_unchanged() {
        let now = Utc::now();
        let mut cache = ToolListCache::with_default_ttl();
        assert!(matches!(cache.offer(vec![tool(now)], now), Refresh::Changed));
        assert!(matches!(
            cache.offer(vec![tool(now)], now + chrono::Duration::seconds(1)),
            Refresh::Unchanged
        ));
    }

    #[test]
    fn ttl_expiry_marks_stale() {
        let now = Utc::now();
        let mut cache = ToolListCache::new(chrono::Duration::seconds(10));
        cache.offer(vec![tool(now)], now);
        assert!(!cache.is_stale(now + chrono::Duration::seconds(5)));
        assert!(cache.is_stale(now + chrono::Duration::seconds(11)));
    }

    #[test]
    fn description_change_reports_changed() {
        let now = Utc::now();
        let mut cache = ToolListCache::with_default_ttl();
        cache.offer(vec![tool(now)], now);
        let edited = ToolMetadata::new("gh", "create_issue", "new desc", serde_json::json!({}), now);
        assert!(matches!(cache.offer(vec![edited], now), Refresh::Changed));
    }
}
