//! Recording controller: drives one recording from capture to a queued encrypted blob.
//!
//! Plaintext audio exists only inside the controller's `RecordingBuffer`
//! and the encryption worker's zeroizing snapshot. Once `finalize` has
//! persisted the blob, the buffer is wiped and the journal index takes over
//! the recording's state.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use amira_core::types::{CheckinContext, EmotionalCheckin, JournalRecord};
use amira_crypto::{blob, generate_recording_key, KeyManager};
use amira_storage::LocalBlobStore;

use crate::capture::{AudioDevice, AudioFormat, CaptureLease, RecordingBuffer};
use crate::error::{LifecycleError, LifecycleResult};
use crate::journal::JournalIndex;
use crate::metadata::RecordingMetadata;
use crate::state::RecordingState;

const EVENT_CAPACITY: usize = 64;

/// A state change, broadcast to subscribers (UI, CLI progress).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub recording_id: String,
    pub from: RecordingState,
    pub to: RecordingState,
}

struct ActiveRecording {
    id: String,
    state: RecordingState,
    title: Option<String>,
    format: AudioFormat,
    lease: Option<CaptureLease>,
    buffer: RecordingBuffer,
    pre_checkin: Option<EmotionalCheckin>,
    post_checkin: Option<EmotionalCheckin>,
    cancel: CancellationToken,
}

pub struct RecordingController {
    device: Arc<dyn AudioDevice>,
    keys: Arc<Mutex<KeyManager>>,
    store: LocalBlobStore,
    journal: Arc<Mutex<JournalIndex>>,
    user_id: String,
    events: broadcast::Sender<LifecycleEvent>,
    active: Option<ActiveRecording>,
}

impl RecordingController {
    pub fn new(
        device: Arc<dyn AudioDevice>,
        keys: Arc<Mutex<KeyManager>>,
        store: LocalBlobStore,
        journal: Arc<Mutex<JournalIndex>>,
        user_id: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            device,
            keys,
            store,
            journal,
            user_id: user_id.into(),
            events,
            active: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Sender shared with the upload queue so one subscriber sees the whole lifecycle.
    pub fn event_sender(&self) -> broadcast::Sender<LifecycleEvent> {
        self.events.clone()
    }

    /// State of the active recording (`Idle` when there is none).
    pub fn state(&self) -> RecordingState {
        self.active
            .as_ref()
            .map(|a| a.state)
            .unwrap_or(RecordingState::Idle)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.id.as_str())
    }

    /// Bytes of audio captured so far.
    pub fn captured_len(&self) -> usize {
        self.active.as_ref().map(|a| a.buffer.len()).unwrap_or(0)
    }

    /// Token that cancels the active recording's in-flight encryption.
    pub fn cancel_handle(&self) -> Option<CancellationToken> {
        self.active.as_ref().map(|a| a.cancel.clone())
    }

    fn transition(&mut self, to: RecordingState) -> LifecycleResult<()> {
        let Some(active) = self.active.as_mut() else {
            return Err(LifecycleError::InvalidTransition {
                from: RecordingState::Idle,
                to,
            });
        };
        let from = active.state;
        active.state = from.transition(to)?;
        info!(recording_id = %active.id, %from, %to, "recording state changed");
        // no subscribers is fine
        let _ = self.events.send(LifecycleEvent {
            recording_id: active.id.clone(),
            from,
            to,
        });
        Ok(())
    }

    /// Drop the active recording, wiping its buffer and releasing the device.
    fn finish_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.buffer.clear();
            active.lease.take();
        }
    }

    /// Start a new recording: `Idle → Preparing → Recording`.
    ///
    /// Permission or hardware problems surface here as `Resource` errors and
    /// leave the controller idle.
    pub fn start(&mut self, title: Option<String>) -> LifecycleResult<String> {
        let current = self.state();
        if current != RecordingState::Idle {
            return Err(LifecycleError::InvalidTransition {
                from: current,
                to: RecordingState::Preparing,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.active = Some(ActiveRecording {
            id: id.clone(),
            state: RecordingState::Idle,
            title,
            format: self.device.format(),
            lease: None,
            buffer: RecordingBuffer::new(),
            pre_checkin: None,
            post_checkin: None,
            cancel: CancellationToken::new(),
        });
        self.transition(RecordingState::Preparing)?;

        match self.device.acquire() {
            Ok(lease) => {
                if let Some(active) = self.active.as_mut() {
                    active.lease = Some(lease);
                }
                self.transition(RecordingState::Recording)?;
                Ok(id)
            }
            Err(e) => {
                warn!(recording_id = %id, "audio capture unavailable: {e}");
                self.transition(RecordingState::Failed)?;
                self.finish_active();
                Err(e.into())
            }
        }
    }

    /// Append captured PCM. Only valid while `Recording`.
    pub fn write_samples(&mut self, pcm: &[u8]) -> LifecycleResult<()> {
        match self.active.as_mut() {
            Some(active) if active.state == RecordingState::Recording => {
                active.buffer.append(pcm);
                Ok(())
            }
            _ => Err(LifecycleError::NotRecording(self.state())),
        }
    }

    pub fn pause(&mut self) -> LifecycleResult<()> {
        self.transition(RecordingState::Paused)
    }

    pub fn resume(&mut self) -> LifecycleResult<()> {
        self.transition(RecordingState::Recording)
    }

    /// Stop capturing: `Recording → Processing`. Releases the audio device.
    pub fn stop(&mut self) -> LifecycleResult<()> {
        self.transition(RecordingState::Processing)?;
        if let Some(active) = self.active.as_mut() {
            active.lease.take();
        }
        Ok(())
    }

    pub fn set_pre_checkin(&mut self, mut checkin: EmotionalCheckin) -> LifecycleResult<()> {
        checkin.context = CheckinContext::PreJournaling;
        self.active_for_checkin()?.pre_checkin = Some(checkin);
        Ok(())
    }

    pub fn set_post_checkin(&mut self, mut checkin: EmotionalCheckin) -> LifecycleResult<()> {
        checkin.context = CheckinContext::PostJournaling;
        self.active_for_checkin()?.post_checkin = Some(checkin);
        Ok(())
    }

    fn active_for_checkin(&mut self) -> LifecycleResult<&mut ActiveRecording> {
        let state = self.state();
        match self.active.as_mut() {
            Some(active) if active.state.holds_plaintext() && active.state != RecordingState::Encrypting => {
                Ok(active)
            }
            _ => Err(LifecycleError::NotRecording(state)),
        }
    }

    /// Discard the active recording (`Recording`, `Paused`, `Processing`, or `Failed`).
    pub fn cancel(&mut self) -> LifecycleResult<()> {
        self.transition(RecordingState::Discarded)?;
        if let Some(active) = &self.active {
            info!(recording_id = %active.id, "recording discarded");
        }
        self.finish_active();
        Ok(())
    }

    /// Retry a failed recording with its retained buffer: `Failed → Processing`.
    /// Call `finalize` afterwards.
    pub fn retry(&mut self) -> LifecycleResult<()> {
        self.transition(RecordingState::Processing)
    }

    /// Give up on a failed recording: `Failed → Discarded`.
    pub fn discard_failed(&mut self) -> LifecycleResult<()> {
        let current = self.state();
        if current != RecordingState::Failed {
            return Err(LifecycleError::InvalidTransition {
                from: current,
                to: RecordingState::Discarded,
            });
        }
        self.cancel()
    }

    /// Encrypt, persist, and queue the stopped recording.
    ///
    /// `Processing → Encrypting → PersistedLocal → QueuedForUpload`. On an
    /// encryption, storage, or journal failure the recording moves to `Failed`
    /// with its buffer retained for `retry`; a blob already written is erased
    /// so the retry starts clean. If the cancel token fires while
    /// encrypting, the result is dropped and the recording is `Discarded`.
    pub async fn finalize(&mut self) -> LifecycleResult<JournalRecord> {
        self.transition(RecordingState::Encrypting)?;

        let (id, audio, cancel, metadata) = {
            let Some(active) = self.active.as_ref() else {
                return Err(LifecycleError::NotRecording(RecordingState::Idle));
            };
            let metadata = RecordingMetadata {
                duration_seconds: active.format.duration_seconds(active.buffer.len()),
                format: active.format,
                pre_checkin: active.pre_checkin.clone(),
                post_checkin: active.post_checkin.clone(),
            };
            (
                active.id.clone(),
                active.buffer.snapshot(),
                active.cancel.clone(),
                metadata,
            )
        };

        match self.seal_and_persist(&id, audio, &cancel, &metadata).await {
            Ok((storage_reference, created_at)) => {
                self.transition(RecordingState::PersistedLocal)?;
                match self
                    .record_persisted(&id, &metadata, storage_reference, created_at)
                    .await
                {
                    Ok(record) => {
                        self.finish_active();
                        Ok(record)
                    }
                    Err(e) => {
                        warn!(recording_id = %id, "journal update failed, rolling back blob: {e}");
                        self.roll_back_persisted(&id).await;
                        self.transition(RecordingState::Failed)?;
                        Err(e)
                    }
                }
            }
            Err(LifecycleError::Cancelled) => {
                self.transition(RecordingState::Discarded)?;
                self.finish_active();
                Err(LifecycleError::Cancelled)
            }
            Err(e) => {
                warn!(recording_id = %id, "finalize failed: {e}");
                self.transition(RecordingState::Failed)?;
                Err(e)
            }
        }
    }

    async fn seal_and_persist(
        &self,
        id: &str,
        audio: zeroize::Zeroizing<Vec<u8>>,
        cancel: &CancellationToken,
        metadata: &RecordingMetadata,
    ) -> LifecycleResult<(String, u64)> {
        let sealed_meta = metadata.to_bytes()?;
        let blob_id = id.to_string();
        let created_at = now_epoch();

        let worker = tokio::task::spawn_blocking(move || {
            let key = generate_recording_key()?;
            let mut encrypted = blob::encrypt_at(&blob_id, created_at, &audio, &key)?;
            encrypted.seal_metadata(&key, &sealed_meta)?;
            Ok::<_, amira_crypto::CryptoError>((encrypted, key))
        });

        let (mut encrypted, key) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LifecycleError::Cancelled),
            res = worker => res??,
        };
        debug!(recording_id = %id, "audio encrypted");

        encrypted.wrapped_key = self.keys.lock().await.wrap_recording_key(&key)?;
        drop(key);

        if cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled);
        }

        let store = self.store.clone();
        let reference = tokio::task::spawn_blocking(move || store.put(&encrypted)).await??;
        Ok((reference, created_at))
    }

    /// Undo a persist whose journal entry could not be written.
    async fn roll_back_persisted(&self, id: &str) {
        self.journal.lock().await.remove(id);
        let store = self.store.clone();
        let blob_id = id.to_string();
        match tokio::task::spawn_blocking(move || store.erase(&blob_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(recording_id = %id, "could not erase orphaned blob: {e}"),
            Err(e) => warn!(recording_id = %id, "erase task failed: {e}"),
        }
    }

    async fn record_persisted(
        &mut self,
        id: &str,
        metadata: &RecordingMetadata,
        storage_reference: String,
        created_at: u64,
    ) -> LifecycleResult<JournalRecord> {
        let title = self.active.as_ref().and_then(|a| a.title.clone());
        let record = JournalRecord {
            id: id.to_string(),
            user_id: self.user_id.clone(),
            title,
            duration_seconds: metadata.duration_seconds,
            created_at,
            is_favorite: false,
            is_uploaded: false,
            is_deleted: false,
            storage_reference,
        };

        {
            let mut journal = self.journal.lock().await;
            journal.insert(record.clone(), RecordingState::PersistedLocal);
            journal.set_state(id, RecordingState::QueuedForUpload)?;
            journal.flush()?;
        }

        self.transition(RecordingState::QueuedForUpload)?;
        info!(recording_id = %id, duration = metadata.duration_seconds, "recording queued for upload");
        Ok(record)
    }
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
