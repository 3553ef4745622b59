//! Recording lifecycle states and the allowed transitions between them.
//!
//! ```text
//! Idle → Preparing → Recording ⇄ Paused
//!                        ↓
//!                    Processing → Encrypting → PersistedLocal → QueuedForUpload ⇄ Uploading → Synced
//! ```
//! `Failed` and `Discarded` are reachable from the capture and processing
//! states; see `can_transition_to` for the complete table.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LifecycleError, LifecycleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Idle,
    Preparing,
    Recording,
    Paused,
    Processing,
    Encrypting,
    PersistedLocal,
    QueuedForUpload,
    Uploading,
    Synced,
    Failed,
    Discarded,
}

impl RecordingState {
    pub const ALL: [RecordingState; 12] = [
        RecordingState::Idle,
        RecordingState::Preparing,
        RecordingState::Recording,
        RecordingState::Paused,
        RecordingState::Processing,
        RecordingState::Encrypting,
        RecordingState::PersistedLocal,
        RecordingState::QueuedForUpload,
        RecordingState::Uploading,
        RecordingState::Synced,
        RecordingState::Failed,
        RecordingState::Discarded,
    ];

    pub fn can_transition_to(self, to: RecordingState) -> bool {
        use RecordingState::*;
        matches!(
            (self, to),
            (Idle, Preparing)
                | (Preparing, Recording)
                | (Preparing, Failed)
                | (Recording, Paused)
                | (Recording, Processing)
                | (Recording, Failed)
                | (Recording, Discarded)
                | (Paused, Recording)
                | (Paused, Discarded)
                | (Processing, Encrypting)
                | (Processing, Failed)
                | (Processing, Discarded)
                | (Encrypting, PersistedLocal)
                | (Encrypting, Failed)
                // cancelled while the cipher was running; the result is dropped
                | (Encrypting, Discarded)
                | (PersistedLocal, QueuedForUpload)
                // blob found truncated or corrupt at recovery / upload time
                | (PersistedLocal, Failed)
                | (QueuedForUpload, Failed)
                | (QueuedForUpload, Uploading)
                | (Uploading, Synced)
                | (Uploading, Failed)
                // transient network failure or cancelled upload
                | (Uploading, QueuedForUpload)
                // local blob re-wrapped by a key rotation, remote copy is stale
                | (Synced, QueuedForUpload)
                // retry with the retained buffer
                | (Failed, Processing)
                | (Failed, Discarded)
        )
    }

    /// Check a transition, returning `InvalidTransition` if it is not allowed.
    pub fn transition(self, to: RecordingState) -> LifecycleResult<RecordingState> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(LifecycleError::InvalidTransition { from: self, to })
        }
    }

    /// States in which a recording holds plaintext audio in memory.
    pub fn holds_plaintext(self) -> bool {
        use RecordingState::*;
        matches!(self, Recording | Paused | Processing | Encrypting | Failed)
    }

    /// End of the normal flow for one recording.
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordingState::Synced | RecordingState::Discarded)
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Preparing => "preparing",
            RecordingState::Recording => "recording",
            RecordingState::Paused => "paused",
            RecordingState::Processing => "processing",
            RecordingState::Encrypting => "encrypting",
            RecordingState::PersistedLocal => "persisted_local",
            RecordingState::QueuedForUpload => "queued_for_upload",
            RecordingState::Uploading => "uploading",
            RecordingState::Synced => "synced",
            RecordingState::Failed => "failed",
            RecordingState::Discarded => "discarded",
        }
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}
