//! Journal index: every persisted recording, its lifecycle state, and upload bookkeeping.
//!
//! Loads entirely into memory and is flushed atomically (temp file, fsync,
//! rename). Holds only non-sensitive `JournalRecord` metadata; emotional
//! content lives sealed inside the blobs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use amira_core::types::JournalRecord;
use amira_storage::LocalBlobStore;

use crate::error::{LifecycleError, LifecycleResult};
use crate::state::RecordingState;

/// Index entry for one recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub record: JournalRecord,
    pub state: RecordingState,
    /// Upload attempts since the last success
    #[serde(default)]
    pub attempts: u32,
    /// Most recent upload or integrity error, if any
    #[serde(default)]
    pub last_error: Option<String>,
    /// Deleted locally after upload; the remote copy still has to go
    #[serde(default)]
    pub pending_remote_delete: bool,
}

/// What `recover` changed after an unclean shutdown
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Interrupted uploads (and unqueued persisted blobs) put back in the queue
    pub requeued: Vec<String>,
    /// Entries whose blob is missing, truncated, or corrupt
    pub failed: Vec<String>,
}

pub struct JournalIndex {
    /// Path to the JSON index on disk
    path: PathBuf,
    /// Recording id → entry
    entries: BTreeMap<String, JournalEntry>,
    /// Whether there are unsaved changes
    dirty: bool,
}

impl JournalIndex {
    /// Load or create an index at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading journal index: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing journal index: {}", path.display()))?
        } else {
            BTreeMap::new()
        };

        Ok(JournalIndex {
            path: path.to_path_buf(),
            entries,
            dirty: false,
        })
    }

    pub fn get(&self, id: &str) -> Option<&JournalEntry> {
        self.entries.get(id)
    }

    fn entry_mut(&mut self, id: &str) -> LifecycleResult<&mut JournalEntry> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    /// Add a newly persisted recording.
    pub fn insert(&mut self, record: JournalRecord, state: RecordingState) {
        self.entries.insert(
            record.id.clone(),
            JournalEntry {
                record,
                state,
                attempts: 0,
                last_error: None,
                pending_remote_delete: false,
            },
        );
        self.dirty = true;
    }

    /// Drop an entry outright. Only for rolling back an insert that never reached disk.
    pub fn remove(&mut self, id: &str) -> Option<JournalEntry> {
        let removed = self.entries.remove(id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Move an entry to `to`, rejecting transitions the state machine forbids.
    /// Returns the previous state.
    pub fn set_state(&mut self, id: &str, to: RecordingState) -> LifecycleResult<RecordingState> {
        let entry = self.entry_mut(id)?;
        let from = entry.state;
        entry.state = from.transition(to)?;
        self.dirty = true;
        Ok(from)
    }

    /// Record a failed upload attempt (state is unchanged).
    pub fn record_attempt(&mut self, id: &str, error: &str) -> LifecycleResult<u32> {
        let entry = self.entry_mut(id)?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        let attempts = entry.attempts;
        self.dirty = true;
        Ok(attempts)
    }

    /// The server acknowledged durable storage: `Uploading → Synced`, `is_uploaded = true`.
    pub fn mark_uploaded(&mut self, id: &str) -> LifecycleResult<()> {
        self.set_state(id, RecordingState::Synced)?;
        let entry = self.entry_mut(id)?;
        entry.record.is_uploaded = true;
        entry.attempts = 0;
        entry.last_error = None;
        if entry.record.is_deleted {
            // deleted while the upload was in flight
            entry.pending_remote_delete = true;
        }
        Ok(())
    }

    /// Mark an entry failed after an integrity problem with its blob.
    pub fn mark_failed(&mut self, id: &str, reason: &str) -> LifecycleResult<()> {
        self.set_state(id, RecordingState::Failed)?;
        self.entry_mut(id)?.last_error = Some(reason.to_string());
        Ok(())
    }

    /// Tombstone an entry. Returns true if a remote copy must also be deleted.
    pub fn mark_deleted(&mut self, id: &str) -> LifecycleResult<bool> {
        let entry = self.entry_mut(id)?;
        entry.record.is_deleted = true;
        entry.pending_remote_delete = entry.record.is_uploaded;
        let remote = entry.pending_remote_delete;
        self.dirty = true;
        Ok(remote)
    }

    pub fn clear_remote_delete(&mut self, id: &str) -> LifecycleResult<()> {
        self.entry_mut(id)?.pending_remote_delete = false;
        self.dirty = true;
        Ok(())
    }

    /// Live (not deleted) entries, oldest first.
    pub fn records(&self) -> Vec<&JournalEntry> {
        let mut live: Vec<_> = self.entries.values().filter(|e| !e.record.is_deleted).collect();
        live.sort_by_key(|e| (e.record.created_at, e.record.id.clone()));
        live
    }

    /// Ids waiting for upload.
    pub fn queued(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| e.state == RecordingState::QueuedForUpload && !e.record.is_deleted)
            .map(|e| e.record.id.clone())
            .collect()
    }

    /// Ids whose remote copy still has to be deleted.
    pub fn pending_remote_deletes(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| e.pending_remote_delete)
            .map(|e| e.record.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Repair the index after an unclean shutdown.
    ///
    /// Interrupted uploads go back to the queue (they restart from the
    /// beginning of the blob). A queued entry whose blob is missing or fails
    /// structural validation moves to `Failed`.
    pub fn recover(&mut self, store: &LocalBlobStore) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let ids: Vec<String> = self
            .entries
            .values()
            .filter(|e| !e.record.is_deleted)
            .map(|e| e.record.id.clone())
            .collect();

        for id in ids {
            let state = self.entries[&id].state;
            if !matches!(
                state,
                RecordingState::PersistedLocal
                    | RecordingState::QueuedForUpload
                    | RecordingState::Uploading
            ) {
                continue;
            }

            if state != RecordingState::QueuedForUpload {
                self.set_state(&id, RecordingState::QueuedForUpload)?;
                report.requeued.push(id.clone());
            }

            if let Err(e) = store.get(&id) {
                tracing::warn!(recording_id = %id, "blob unusable at recovery: {e}");
                self.mark_failed(&id, &e.to_string())?;
                report.requeued.retain(|r| r != &id);
                report.failed.push(id);
            }
        }

        if !report.requeued.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "journal recovered"
            );
            self.flush()?;
        }
        Ok(report)
    }

    /// Flush dirty changes to disk using an atomic write.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating journal dir: {}", parent.display()))?;
        }

        let json = serde_json::to_vec_pretty(&self.entries).context("serializing journal index")?;
        amira_storage::write_atomic(&self.path, &json)
            .with_context(|| format!("writing journal index: {}", self.path.display()))?;

        self.dirty = false;
        Ok(())
    }
}

impl Drop for JournalIndex {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                tracing::warn!("failed to flush journal index on drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> JournalRecord {
        JournalRecord {
            id: id.into(),
            user_id: "u1".into(),
            title: None,
            duration_seconds: 5,
            created_at: 1_700_000_000,
            is_favorite: false,
            is_uploaded: false,
            is_deleted: false,
            storage_reference: format!("{id}.amrb"),
        }
    }

    #[test]
    fn test_open_flush_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.json");

        {
            let mut index = JournalIndex::open(&path).unwrap();
            index.insert(record("a"), RecordingState::QueuedForUpload);
            index.flush().unwrap();
        }

        let index = JournalIndex::open(&path).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a").unwrap().state, RecordingState::QueuedForUpload);
    }

    #[test]
    fn test_drop_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.json");
        {
            let mut index = JournalIndex::open(&path).unwrap();
            index.insert(record("a"), RecordingState::PersistedLocal);
        }
        assert_eq!(JournalIndex::open(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_set_state_enforces_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = JournalIndex::open(&dir.path().join("j.json")).unwrap();
        index.insert(record("a"), RecordingState::QueuedForUpload);

        assert!(matches!(
            index.set_state("a", RecordingState::Synced),
            Err(LifecycleError::InvalidTransition { .. })
        ));
        assert!(matches!(
            index.set_state("missing", RecordingState::Uploading),
            Err(LifecycleError::NotFound(_))
        ));
        index.set_state("a", RecordingState::Uploading).unwrap();
        index.mark_uploaded("a").unwrap();

        let entry = index.get("a").unwrap();
        assert_eq!(entry.state, RecordingState::Synced);
        assert!(entry.record.is_uploaded);
    }

    #[test]
    fn test_delete_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = JournalIndex::open(&dir.path().join("j.json")).unwrap();
        index.insert(record("local"), RecordingState::QueuedForUpload);
        index.insert(record("remote"), RecordingState::Uploading);
        index.mark_uploaded("remote").unwrap();

        assert!(!index.mark_deleted("local").unwrap());
        assert!(index.mark_deleted("remote").unwrap());

        assert!(index.records().is_empty());
        assert!(index.queued().is_empty());
        assert_eq!(index.pending_remote_deletes(), vec!["remote".to_string()]);
    }

    #[test]
    fn test_delete_during_upload_schedules_remote_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = JournalIndex::open(&dir.path().join("j.json")).unwrap();
        index.insert(record("a"), RecordingState::Uploading);

        assert!(!index.mark_deleted("a").unwrap());
        index.mark_uploaded("a").unwrap();
        assert_eq!(index.pending_remote_deletes(), vec!["a".to_string()]);
    }
}
