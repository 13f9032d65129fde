// SPDX-License-Identifier: MIT

//! Storage (§4.2): an embedded transactional key/value store with three
//! logical buckets (`upstreams`, `tool_metadata`, `tool_stats`) plus a
//! `schema_version`. Backed by `sled`; all mutating operations take the
//! internal writer lock so the store behaves as a single-writer,
//! serialisable transaction log even though individual `sled::Tree`
//! operations are independently atomic (§5: "single-writer DB; readers
//! are lock-free").
//!
//! Grounded in the teacher's persistence split (`oj-storage` +
//! `oj-daemon/src/storage/snapshot.rs`), but the mechanism itself is not
//! the teacher's hand-rolled WAL+`MaterializedState` replay: the teacher
//! has no `sled` call sites anywhere in this pack, so the transactional
//! KV layer here is pulled in from the wider pack
//! (`100monkeys-ai-aegis-orchestrator`, `njfio-fluent_cli`, both of which
//! declare `sled` as a dependency) rather than grounded on a teacher
//! usage site — see DESIGN.md.

pub mod error;
pub mod reconcile;

use std::sync::Arc;

use chrono::Utc;
use mux_core::{StartupMode, ToolMetadata, Upstream};
use parking_lot::Mutex;

pub use error::{ConfigWriteError, StorageError};

const SCHEMA_VERSION: u32 = 1;

const TREE_UPSTREAMS: &str = "upstreams";
const TREE_TOOL_METADATA: &str = "tool_metadata";
const TREE_TOOL_STATS: &str = "tool_stats";
const TREE_META: &str = "meta";
const KEY_SCHEMA_VERSION: &str = "schema_version";

/// The second phase of the two-phase commit (§4.2, §9): an atomic rewrite
/// of the user-editable config file, implemented by `mux-config`.
/// `mux-storage` only depends on this narrow trait so the two crates
/// don't need to know about each other's internals.
pub trait ConfigWriter: Send + Sync {
    /// Atomically rewrite `name`'s `startup_mode` (and, when present, its
    /// auto-disable reason) into the on-disk config file, suppressing the
    /// next file-watch reload (`skipNextReload`).
    fn write_startup_mode(
        &self,
        name: &str,
        mode: StartupMode,
        reason: Option<&str>,
    ) -> Result<(), ConfigWriteError>;
}

pub struct Storage {
    db: sled::Db,
    upstreams: sled::Tree,
    tool_metadata: sled::Tree,
    tool_stats: sled::Tree,
    meta: sled::Tree,
    writer_lock: Mutex<()>,
}

impl Storage {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    pub fn open_temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let upstreams = db.open_tree(TREE_UPSTREAMS)?;
        let tool_metadata = db.open_tree(TREE_TOOL_METADATA)?;
        let tool_stats = db.open_tree(TREE_TOOL_STATS)?;
        let meta = db.open_tree(TREE_META)?;
        if meta.get(KEY_SCHEMA_VERSION)?.is_none() {
            meta.insert(KEY_SCHEMA_VERSION, &SCHEMA_VERSION.to_be_bytes())?;
        }
        Ok(Self {
            db,
            upstreams,
            tool_metadata,
            tool_stats,
            meta,
            writer_lock: Mutex::new(()),
        })
    }

    pub fn schema_version(&self) -> Result<u32, StorageError> {
        let bytes = self
            .meta
            .get(KEY_SCHEMA_VERSION)?
            .ok_or_else(|| StorageError::UpstreamNotFound(KEY_SCHEMA_VERSION.to_string()))?;
        let arr: [u8; 4] = bytes.as_ref().try_into().unwrap_or([0, 0, 0, SCHEMA_VERSION as u8]);
        Ok(u32::from_be_bytes(arr))
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    // -- upstreams --------------------------------------------------------

    pub fn save_upstream(&self, rec: &Upstream) -> Result<(), StorageError> {
        let _guard = self.writer_lock.lock();
        let bytes = serde_json::to_vec(rec)?;
        self.upstreams.insert(rec.name.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_upstream(&self, name: &str) -> Result<Option<Upstream>, StorageError> {
        match self.upstreams.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_upstreams(&self) -> Result<Vec<Upstream>, StorageError> {
        let mut out = Vec::new();
        for entry in self.upstreams.iter() {
            let (_, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Removes the upstream and, in the same writer-lock critical section,
    /// its tool metadata (I5/P3: no dangling keys after removal).
    pub fn delete_upstream(&self, name: &str) -> Result<(), StorageError> {
        let _guard = self.writer_lock.lock();
        self.upstreams.remove(name.as_bytes())?;
        self.delete_tool_metadata_locked(name)?;
        Ok(())
    }

    /// Two-phase commit (§4.2): write the new `startup_mode` to the store,
    /// then ask `writer` to atomically rewrite the config file. On
    /// failure of the second phase, the first phase is rolled back to its
    /// prior value and the error is surfaced.
    pub fn update_server_startup_mode(
        &self,
        name: &str,
        mode: StartupMode,
        reason: Option<&str>,
        writer: &dyn ConfigWriter,
    ) -> Result<(), StorageError> {
        let _guard = self.writer_lock.lock();
        let Some(mut rec) = self.get_upstream_unlocked(name)? else {
            return Err(StorageError::UpstreamNotFound(name.to_string()));
        };
        let previous_mode = rec.startup_mode;
        let previous_reason = rec.audit.last_auto_disable_reason.clone();

        rec.startup_mode = mode;
        if let Some(reason) = reason {
            rec.audit.mark_auto_disabled(reason, Utc::now());
        }
        let bytes = serde_json::to_vec(&rec)?;
        self.upstreams.insert(rec.name.as_bytes(), bytes)?;

        if let Err(source) = writer.write_startup_mode(name, mode, reason) {
            // Phase two failed: compensate with an inverse store write.
            rec.startup_mode = previous_mode;
            rec.audit.last_auto_disable_reason = previous_reason;
            if let Ok(bytes) = serde_json::to_vec(&rec) {
                let _ = self.upstreams.insert(rec.name.as_bytes(), bytes);
            }
            return Err(StorageError::ConfigWriteFailed {
                upstream: name.to_string(),
                source,
            });
        }
        Ok(())
    }

    /// `auto_disabled → active` via the same two-phase protocol (§4.2),
    /// clearing the auto-disable reason.
    pub fn clear_auto_disable(&self, name: &str, writer: &dyn ConfigWriter) -> Result<(), StorageError> {
        {
            let _guard = self.writer_lock.lock();
            if let Some(mut rec) = self.get_upstream_unlocked(name)? {
                rec.audit.last_auto_disable_reason = None;
                let bytes = serde_json::to_vec(&rec)?;
                self.upstreams.insert(rec.name.as_bytes(), bytes)?;
            }
        }
        self.update_server_startup_mode(name, StartupMode::Active, None, writer)
    }

    fn get_upstream_unlocked(&self, name: &str) -> Result<Option<Upstream>, StorageError> {
        match self.upstreams.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // -- tool metadata ------------------------------------------------------

    pub fn save_tool_metadata(&self, upstream: &str, tools: &[ToolMetadata]) -> Result<(), StorageError> {
        let _guard = self.writer_lock.lock();
        let mut batch = sled::Batch::default();
        for tool in tools {
            debug_assert_eq!(tool.upstream, upstream);
            let bytes = serde_json::to_vec(tool)?;
            batch.insert(tool.storage_key().as_bytes(), bytes);
        }
        self.tool_metadata.apply_batch(batch)?;
        Ok(())
    }

    pub fn get_tool_metadata(&self, upstream: &str) -> Result<Vec<ToolMetadata>, StorageError> {
        let prefix = format!("{upstream}:");
        let mut out = Vec::new();
        for entry in self.tool_metadata.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    pub fn get_all_tool_metadata(&self) -> Result<Vec<ToolMetadata>, StorageError> {
        let mut out = Vec::new();
        for entry in self.tool_metadata.iter() {
            let (_, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    pub fn delete_server_tool_metadata(&self, upstream: &str) -> Result<(), StorageError> {
        let _guard = self.writer_lock.lock();
        self.delete_tool_metadata_locked(upstream)
    }

    fn delete_tool_metadata_locked(&self, upstream: &str) -> Result<(), StorageError> {
        let prefix = format!("{upstream}:");
        let keys: Vec<_> = self
            .tool_metadata
            .scan_prefix(prefix.as_bytes())
            .keys()
            .collect::<Result<Vec<_>, _>>()?;
        let mut batch = sled::Batch::default();
        for key in keys {
            batch.remove(key);
        }
        self.tool_metadata.apply_batch(batch)?;
        Ok(())
    }

    // -- tool stats -----------------------------------------------------

    pub fn increment_tool_stats(&self, tool_name: &str) -> Result<u64, StorageError> {
        let _guard = self.writer_lock.lock();
        let current = self.tool_stat_count(tool_name)?;
        let next = current.saturating_add(1);
        self.tool_stats.insert(tool_name.as_bytes(), &next.to_be_bytes())?;
        Ok(next)
    }

    pub fn list_tool_stats(&self) -> Result<Vec<(String, u64)>, StorageError> {
        let mut out = Vec::new();
        for entry in self.tool_stats.iter() {
            let (key, value) = entry?;
            let name = String::from_utf8_lossy(&key).into_owned();
            let arr: [u8; 8] = value.as_ref().try_into().unwrap_or([0; 8]);
            out.push((name, u64::from_be_bytes(arr)));
        }
        out.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(out)
    }

    fn tool_stat_count(&self, tool_name: &str) -> Result<u64, StorageError> {
        match self.tool_stats.get(tool_name.as_bytes())? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_ref().try_into().unwrap_or([0; 8]);
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }
}

pub type SharedStorage = Arc<Storage>;

#[cfg(test)]
mod tests {
    use super::*;
    use mux_core::Transport;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingWriter {
        fail: bool,
        calls: AtomicUsize,
    }

    impl ConfigWriter for RecordingWriter {
        fn write_startup_mode(
            &self,
            _name: &str,
            _mode: StartupMode,
            _reason: Option<&str>,
        ) -> Result<(), ConfigWriteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ConfigWriteError::new("disk full"))
            } else {
                Ok(())
            }
        }
    }

    fn sample_upstream(name: &str) -> Upstream {
        Upstream::new(
            name,
            Transport::Stdio {
                command: "true".into(),
                args: vec![],
                working_dir: None,
                env: HashMap::new(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn save_and_get_round_trip() {
        let storage = Storage::open_temporary().unwrap();
        storage.save_upstream(&sample_upstream("gh")).unwrap();
        let got = storage.get_upstream("gh").unwrap().unwrap();
        assert_eq!(got.name, "gh");
        assert_eq!(storage.list_upstreams().unwrap().len(), 1);
    }

    #[test]
    fn delete_upstream_purges_tool_metadata() {
        let storage = Storage::open_temporary().unwrap();
        storage.save_upstream(&sample_upstream("gh")).unwrap();
        let tools = vec![ToolMetadata::new("gh", "t1", "d", serde_json::json!({}), Utc::now())];
        storage.save_tool_metadata("gh", &tools).unwrap();
        assert_eq!(storage.get_tool_metadata("gh").unwrap().len(), 1);

        storage.delete_upstream("gh").unwrap();

        assert!(storage.get_upstream("gh").unwrap().is_none());
        assert!(storage.get_tool_metadata("gh").unwrap().is_empty());
    }

    #[test]
    fn update_startup_mode_commits_both_phases_on_success() {
        let storage = Storage::open_temporary().unwrap();
        storage.save_upstream(&sample_upstream("gh")).unwrap();
        let writer = RecordingWriter {
            fail: false,
            calls: AtomicUsize::new(0),
        };
        storage
            .update_server_startup_mode("gh", StartupMode::AutoDisabled, Some("timeout"), &writer)
            .unwrap();

        let rec = storage.get_upstream("gh").unwrap().unwrap();
        assert_eq!(rec.startup_mode, StartupMode::AutoDisabled);
        assert_eq!(rec.audit.last_auto_disable_reason.as_deref(), Some("timeout"));
        assert_eq!(writer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_startup_mode_rolls_back_store_when_file_write_fails() {
        let storage = Storage::open_temporary().unwrap();
        storage.save_upstream(&sample_upstream("gh")).unwrap();
        let writer = RecordingWriter {
            fail: true,
            calls: AtomicUsize::new(0),
        };

        let result = storage.update_server_startup_mode("gh", StartupMode::AutoDisabled, Some("x"), &writer);
        assert!(result.is_err());

        let rec = storage.get_upstream("gh").unwrap().unwrap();
        assert_eq!(rec.startup_mode, StartupMode::Active, "store must roll back on phase-two failure");
    }

    #[test]
    fn tool_stats_increment_and_sort_descending() {
        let storage = Storage::open_temporary().unwrap();
        storage.increment_tool_stats("gh:ping").unwrap();
        storage.increment_tool_stats("gh:ping").unwrap();
        storage.increment_tool_stats("gh:pong").unwrap();

        let stats = storage.list_tool_stats().unwrap();
        assert_eq!(stats[0], ("gh:ping".to_string(), 2));
        assert_eq!(stats[1], ("gh:pong".to_string(), 1));
    }
}
