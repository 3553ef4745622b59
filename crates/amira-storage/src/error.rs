use amira_crypto::CryptoError;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid blob id {0:?}")]
    InvalidBlobId(String),

    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("refusing to replace key material with a different salt")]
    SaltChanged,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl StorageError {
    /// The blob exists but cannot be decoded (truncated, corrupted, or tampered).
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StorageError::Crypto(e) if e.is_permanent())
    }
}
