//! Upload queue: moves persisted recordings to the remote store.
//!
//! Several recordings upload concurrently; each recording's transitions are
//! sequential. Failures back off exponentially up to a per-pass attempt cap,
//! after which the recording simply stays `QueuedForUpload` for the next pass.
//! `is_uploaded` flips only when the uploader reports success.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use opendal::Operator;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use amira_core::config::UploadConfig;
use amira_core::types::JournalRecord;
use amira_crypto::EncryptedBlob;
use amira_storage::{blob_object, record_object, LocalBlobStore};

use crate::controller::LifecycleEvent;
use crate::error::LifecycleResult;
use crate::journal::JournalIndex;
use crate::state::RecordingState;

/// Remote side of the upload queue. Receives only blob container bytes and
/// non-sensitive record metadata.
pub trait Uploader: Send + Sync {
    /// Store a recording. Success means the server acknowledged durable storage.
    fn upload(
        &self,
        record: &JournalRecord,
        container: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove a recording's remote copy. Removing an absent copy succeeds.
    fn delete(&self, id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Uploader backed by an OpenDAL operator rooted at the bucket prefix (see
/// `amira_storage::open_remote`; `memory_remote` in tests).
#[derive(Clone)]
pub struct OpendalUploader {
    op: Operator,
}

impl OpendalUploader {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    /// Fetch a recording's container bytes back from the remote store.
    pub async fn download(&self, id: &str) -> Result<Vec<u8>> {
        let key = blob_object(id)?;
        let data = self
            .op
            .read(&key)
            .await
            .with_context(|| format!("downloading {key}"))?;
        Ok(data.to_vec())
    }
}

impl Uploader for OpendalUploader {
    async fn upload(&self, record: &JournalRecord, container: Vec<u8>) -> Result<()> {
        let blob_key = blob_object(&record.id)?;
        let bytes = container.len();
        self.op
            .write(&blob_key, container)
            .await
            .with_context(|| format!("uploading blob: {blob_key}"))?;

        let record_key = record_object(&record.id)?;
        let json = serde_json::to_vec(record).context("serializing journal record")?;
        self.op
            .write(&record_key, json)
            .await
            .with_context(|| format!("uploading record: {record_key}"))?;

        debug!(recording_id = %record.id, bytes, "uploaded");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        for key in [blob_object(id)?, record_object(id)?] {
            self.op
                .delete(&key)
                .await
                .with_context(|| format!("deleting {key}"))?;
        }
        Ok(())
    }
}

/// Exponential backoff: `min(cap, base * 2^attempt)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap)
    }
}

impl From<&UploadConfig> for Backoff {
    fn from(cfg: &UploadConfig) -> Self {
        Self::new(cfg.backoff_base(), cfg.backoff_cap())
    }
}

/// How one recording fared in a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Uploaded,
    StillQueued,
    Failed,
    Cancelled,
}

/// Summary of one upload pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub uploaded: Vec<String>,
    /// Hit the attempt cap; retried on the next pass
    pub still_queued: Vec<String>,
    /// Blob unusable; needs user attention
    pub failed: Vec<String>,
    pub remote_deleted: Vec<String>,
    pub cancelled: bool,
}

pub struct UploadQueue {
    journal: Arc<Mutex<JournalIndex>>,
    store: LocalBlobStore,
    backoff: Backoff,
    max_attempts: u32,
    concurrency: usize,
    events: Option<broadcast::Sender<LifecycleEvent>>,
}

impl UploadQueue {
    pub fn new(journal: Arc<Mutex<JournalIndex>>, store: LocalBlobStore, cfg: &UploadConfig) -> Self {
        Self {
            journal,
            store,
            backoff: Backoff::from(cfg),
            max_attempts: cfg.max_attempts_per_pass.max(1),
            concurrency: cfg.concurrency.max(1),
            events: None,
        }
    }

    /// Broadcast state changes on `events` (typically the controller's sender).
    pub fn with_events(mut self, events: broadcast::Sender<LifecycleEvent>) -> Self {
        self.events = Some(events);
        self
    }

    async fn transition(&self, id: &str, to: RecordingState) -> LifecycleResult<()> {
        let from = {
            let mut journal = self.journal.lock().await;
            let from = journal.set_state(id, to)?;
            journal.flush()?;
            from
        };
        debug!(recording_id = %id, %from, %to, "upload state changed");
        if let Some(events) = &self.events {
            let _ = events.send(LifecycleEvent {
                recording_id: id.to_string(),
                from,
                to,
            });
        }
        Ok(())
    }

    /// Run one pass: send pending remote deletes, then upload every queued recording.
    ///
    /// Triggered on app start, foreground, and network restore. Cancelling
    /// returns in-flight uploads to the queue.
    pub async fn run_pass<U: Uploader>(
        &self,
        uploader: &U,
        cancel: &CancellationToken,
    ) -> LifecycleResult<PassReport> {
        let mut report = PassReport::default();

        let deletes = self.journal.lock().await.pending_remote_deletes();
        for id in deletes {
            match uploader.delete(&id).await {
                Ok(()) => {
                    let mut journal = self.journal.lock().await;
                    journal.clear_remote_delete(&id)?;
                    journal.flush()?;
                    report.remote_deleted.push(id);
                }
                Err(e) => warn!(recording_id = %id, "remote delete failed, will retry: {e:#}"),
            }
        }

        let queued = self.journal.lock().await.queued();
        if !queued.is_empty() {
            info!(count = queued.len(), "upload pass starting");
        }

        let outcomes: Vec<(String, LifecycleResult<Outcome>)> = stream::iter(queued)
            .map(|id| async move {
                let outcome = self.upload_one(uploader, &id, cancel).await;
                (id, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (id, outcome) in outcomes {
            match outcome {
                Ok(Outcome::Uploaded) => report.uploaded.push(id),
                Ok(Outcome::StillQueued) => report.still_queued.push(id),
                Ok(Outcome::Failed) => report.failed.push(id),
                Ok(Outcome::Cancelled) => report.cancelled = true,
                Err(e) => {
                    warn!(recording_id = %id, "journal update failed during upload, left queued: {e}");
                    self.return_to_queue(&id).await;
                    report.still_queued.push(id);
                }
            }
        }

        info!(
            uploaded = report.uploaded.len(),
            still_queued = report.still_queued.len(),
            failed = report.failed.len(),
            "upload pass finished"
        );
        Ok(report)
    }

    async fn upload_one<U: Uploader>(
        &self,
        uploader: &U,
        id: &str,
        cancel: &CancellationToken,
    ) -> LifecycleResult<Outcome> {
        for attempt in 0..self.max_attempts {
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }

            let record = match self.journal.lock().await.get(id) {
                Some(entry) if entry.state == RecordingState::QueuedForUpload && !entry.record.is_deleted => {
                    entry.record.clone()
                }
                // deleted or moved on since the pass started
                _ => return Ok(Outcome::StillQueued),
            };
            self.transition(id, RecordingState::Uploading).await?;

            // the whole container is re-read and re-sent on every attempt
            let container = match self.load_container(id).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(recording_id = %id, "blob unusable, not uploading: {e}");
                    let mut journal = self.journal.lock().await;
                    journal.mark_failed(id, &e.to_string())?;
                    journal.flush()?;
                    return Ok(Outcome::Failed);
                }
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.transition(id, RecordingState::QueuedForUpload).await?;
                    info!(recording_id = %id, "upload cancelled, back in queue");
                    return Ok(Outcome::Cancelled);
                }
                r = uploader.upload(&record, container) => r,
            };

            match result {
                Ok(()) => {
                    let mut journal = self.journal.lock().await;
                    journal.mark_uploaded(id)?;
                    journal.flush()?;
                    drop(journal);
                    if let Some(events) = &self.events {
                        let _ = events.send(LifecycleEvent {
                            recording_id: id.to_string(),
                            from: RecordingState::Uploading,
                            to: RecordingState::Synced,
                        });
                    }
                    info!(recording_id = %id, "upload acknowledged");
                    return Ok(Outcome::Uploaded);
                }
                Err(e) => {
                    self.transition(id, RecordingState::QueuedForUpload).await?;
                    let attempts = {
                        let mut journal = self.journal.lock().await;
                        let n = journal.record_attempt(id, &format!("{e:#}"))?;
                        journal.flush()?;
                        n
                    };
                    warn!(recording_id = %id, attempts, "upload failed: {e:#}");

                    if attempt + 1 < self.max_attempts {
                        let delay = self.backoff.delay(attempt);
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(Outcome::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
        Ok(Outcome::StillQueued)
    }

    /// Put an entry interrupted mid-upload back in the queue (in memory; the
    /// next successful flush persists it, `recover` covers a crash first).
    async fn return_to_queue(&self, id: &str) {
        let mut journal = self.journal.lock().await;
        if journal.get(id).map(|e| e.state) == Some(RecordingState::Uploading) {
            if let Err(e) = journal.set_state(id, RecordingState::QueuedForUpload) {
                warn!(recording_id = %id, "could not requeue: {e}");
            }
        }
    }

    async fn load_container(&self, id: &str) -> LifecycleResult<Vec<u8>> {
        let store = self.store.clone();
        let id = id.to_string();
        let bytes = tokio::task::spawn_blocking(move || {
            let bytes = store.get_bytes(&id)?;
            // structural check so a truncated blob never leaves the device
            EncryptedBlob::from_bytes(&bytes).map_err(amira_storage::StorageError::from)?;
            Ok::<_, amira_storage::StorageError>(bytes)
        })
        .await??;
        Ok(bytes)
    }

    /// Delete a recording: tombstone it, securely erase the local blob, and
    /// schedule the remote delete if it was uploaded.
    pub async fn delete_recording(&self, id: &str) -> LifecycleResult<()> {
        let remote = {
            let mut journal = self.journal.lock().await;
            let remote = journal.mark_deleted(id)?;
            journal.flush()?;
            remote
        };

        let store = self.store.clone();
        let blob_id = id.to_string();
        tokio::task::spawn_blocking(move || store.erase(&blob_id)).await??;

        info!(recording_id = %id, remote_delete = remote, "recording deleted");
        Ok(())
    }

    /// Re-queue synced recordings whose local blob changed (after key rotation).
    pub async fn requeue(&self, ids: &[String]) -> LifecycleResult<usize> {
        let mut count = 0;
        for id in ids {
            let state = self.journal.lock().await.get(id).map(|e| e.state);
            if state == Some(RecordingState::Synced) {
                self.transition(id, RecordingState::QueuedForUpload).await?;
                count += 1;
            }
        }
        Ok(count)
    }
}
