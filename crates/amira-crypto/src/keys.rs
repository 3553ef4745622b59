//! Per-recording keys and key wrapping (envelope encryption)

use zeroize::Zeroize;

use crate::aead::{fill_random, open, seal};
use crate::error::{expect_len, CryptoError, CryptoResult};
use crate::kdf::MasterKey;
use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

/// Wrapped key layout: `[12-byte IV][32-byte ciphertext][16-byte tag]`
pub const WRAPPED_KEY_SIZE: usize = IV_SIZE + KEY_SIZE + TAG_SIZE;

/// Associated data for every wrapped RecordingKey.
const WRAP_AAD: &[u8] = b"amira-recording-key-v1";

/// A per-recording 256-bit encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct RecordingKey {
    bytes: [u8; KEY_SIZE],
}

impl RecordingKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for RecordingKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for RecordingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit recording key from the OS CSPRNG.
pub fn generate_recording_key() -> CryptoResult<RecordingKey> {
    let mut bytes = [0u8; KEY_SIZE];
    fill_random(&mut bytes)?;
    Ok(RecordingKey::from_bytes(bytes))
}

/// Wrap (encrypt) a recording key under the master key.
///
/// Uses AES-256-GCM with its own random IV, independent of the audio IV.
pub fn wrap_key(recording_key: &RecordingKey, master: &MasterKey) -> CryptoResult<Vec<u8>> {
    wrap_with(master.as_bytes(), recording_key)
}

/// Unwrap (decrypt) a recording key with the master key.
///
/// A tag mismatch means tampering or the wrong master key; the recording is
/// unreadable under this key and the error must not be retried.
pub fn unwrap_key(wrapped: &[u8], master: &MasterKey) -> CryptoResult<RecordingKey> {
    unwrap_with(master.as_bytes(), wrapped)
}

/// Re-wrap a recording key from `old` to `new` without exposing it to the caller.
pub fn rewrap_key(wrapped: &[u8], old: &MasterKey, new: &MasterKey) -> CryptoResult<Vec<u8>> {
    let key = unwrap_key(wrapped, old)?;
    wrap_key(&key, new)
}

pub(crate) fn wrap_with(wrapping_key: &[u8; KEY_SIZE], key: &RecordingKey) -> CryptoResult<Vec<u8>> {
    let sealed = seal(wrapping_key, WRAP_AAD, key.as_bytes())?;

    let mut result = Vec::with_capacity(WRAPPED_KEY_SIZE);
    result.extend_from_slice(&sealed.iv);
    result.extend_from_slice(&sealed.ciphertext);
    result.extend_from_slice(&sealed.tag);
    Ok(result)
}

pub(crate) fn unwrap_with(wrapping_key: &[u8; KEY_SIZE], wrapped: &[u8]) -> CryptoResult<RecordingKey> {
    expect_len("wrapped key", WRAPPED_KEY_SIZE, wrapped.len())?;

    let (iv, rest) = wrapped.split_at(IV_SIZE);
    let (ciphertext, tag) = rest.split_at(KEY_SIZE);

    let mut iv_bytes = [0u8; IV_SIZE];
    iv_bytes.copy_from_slice(iv);
    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag);

    let plaintext = open(wrapping_key, &iv_bytes, WRAP_AAD, ciphertext, &tag_bytes)
        .ok_or(CryptoError::UnwrapAuthentication)?;

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    Ok(RecordingKey::from_bytes(key_bytes))
}
