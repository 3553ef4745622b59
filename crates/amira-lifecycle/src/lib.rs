//! amira-lifecycle: recording state machine, capture, journal index, upload queue
//!
//! A recording moves Idle → Preparing → Recording (⇄ Paused) → Processing →
//! Encrypting → PersistedLocal → QueuedForUpload → Uploading → Synced.
//! `RecordingController` owns the in-memory part of that path; once the blob
//! is persisted, `JournalIndex` and `UploadQueue` take over.

pub mod capture;
pub mod controller;
pub mod error;
pub mod journal;
pub mod metadata;
pub mod playback;
pub mod rotation;
pub mod state;
pub mod upload;

pub use capture::{AudioDevice, AudioFormat, CaptureLease, RecordingBuffer, SyntheticDevice};
pub use controller::{LifecycleEvent, RecordingController};
pub use error::{LifecycleError, LifecycleResult, ResourceError};
pub use journal::{JournalEntry, JournalIndex, RecoveryReport};
pub use metadata::RecordingMetadata;
pub use playback::{open_recording, DecryptedRecording};
pub use rotation::{change_passphrase, rotate_recordings, RotationReport};
pub use state::RecordingState;
pub use upload::{Backoff, OpendalUploader, PassReport, UploadQueue, Uploader};
