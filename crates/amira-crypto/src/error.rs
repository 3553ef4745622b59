//! Error taxonomy for key handling and integrity checks.
//!
//! Variants never carry key bytes or plaintext; at most a blob identifier.

use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("secure random source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("key unwrapping failed: wrong key or tampered data")]
    UnwrapAuthentication,

    #[error("integrity violation: recording corrupted or tampered")]
    IntegrityViolation,

    #[error("export package integrity check failed for entry {entry}")]
    PackageIntegrity { entry: String },

    #[error("credential does not match this account")]
    WrongCredential,

    #[error("new credential does not match the passphrase change already in progress")]
    RotationMismatch,

    #[error("master key is locked")]
    Locked,

    #[error("{what} has wrong length: {actual} bytes (expected {expected})")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported blob schema version {0}")]
    UnsupportedSchema(u32),

    #[error("malformed blob: {0}")]
    MalformedBlob(String),

    #[error("encryption failed")]
    Encryption,

    #[error("secure key store: {0}")]
    KeyStore(String),
}

impl CryptoError {
    /// Errors that mean the affected data cannot be recovered with the
    /// current keys, as opposed to a locked session or a malformed request.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CryptoError::UnwrapAuthentication
                | CryptoError::IntegrityViolation
                | CryptoError::PackageIntegrity { .. }
                | CryptoError::MalformedBlob(_)
                | CryptoError::UnsupportedSchema(_)
        )
    }
}

/// Reject byte strings whose length differs from a fixed primitive size.
pub(crate) fn expect_len(what: &'static str, expected: usize, actual: usize) -> CryptoResult<()> {
    if actual != expected {
        return Err(CryptoError::InvalidLength {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}
