use amira_crypto::CryptoError;
use amira_storage::StorageError;
use thiserror::Error;

use crate::state::RecordingState;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Audio capture resources that could not be acquired. Surfaced at
/// `Preparing` and never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("audio hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("audio device already in use")]
    Busy,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid transition {from} → {to}")]
    InvalidTransition {
        from: RecordingState,
        to: RecordingState,
    },

    #[error("not recording (state: {0})")]
    NotRecording(RecordingState),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{} recording(s) unwrap under neither the old nor the new key: {}", .0.len(), .0.join(", "))]
    RotationStranded(Vec<String>),

    #[error("recording not found: {0}")]
    NotFound(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LifecycleError {
    /// Failures worth retrying later without user action.
    pub fn is_transient(&self) -> bool {
        match self {
            LifecycleError::Storage(StorageError::Io(_)) => true,
            LifecycleError::Crypto(CryptoError::Locked) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LifecycleError::Storage(StorageError::Io(std::io::Error::other("disk"))).is_transient());
        assert!(LifecycleError::Crypto(CryptoError::Locked).is_transient());
        assert!(!LifecycleError::Crypto(CryptoError::IntegrityViolation).is_transient());
        assert!(!LifecycleError::Resource(ResourceError::PermissionDenied).is_transient());
        assert!(!LifecycleError::Cancelled.is_transient());
    }

    #[test]
    fn test_invalid_transition_message() {
        let e = LifecycleError::InvalidTransition {
            from: RecordingState::Idle,
            to: RecordingState::Synced,
        };
        assert_eq!(e.to_string(), "invalid transition idle → synced");
    }
}
