//! Encryption engine: plaintext audio ⇄ `EncryptedBlob`
//!
//! Container format (binary, what local storage and the uploader see):
//! ```text
//! [4 bytes: b"AMRB"][2 bytes: container version, BE][4 bytes: header length, BE]
//! [header JSON: blob id, schema version, created_at, iv, tag, wrapped key,
//!  sealed metadata, ciphertext length, BLAKE3 of ciphertext]
//! [ciphertext]
//! ```
//! AAD for the audio = schema_version (4 bytes BE) || created_at (8 bytes BE) || blob_id,
//! which binds the ciphertext to its cleartext header fields.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::aead::{open, seal};
use crate::encoding::{b64, b64_array};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{RecordingKey, WRAPPED_KEY_SIZE};
use crate::{IV_SIZE, TAG_SIZE};

/// Current encryption scheme. Readers dispatch on this field.
pub const SCHEMA_VERSION: u32 = 1;

const MAGIC: &[u8; 4] = b"AMRB";
const CONTAINER_VERSION: u16 = 1;
const PREFIX_LEN: usize = 4 + 2 + 4;
const MAX_HEADER_LEN: usize = 64 * 1024;
const METADATA_AAD: &[u8] = b"amira-metadata-v1";

/// A separately encrypted field (sensitive recording metadata).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedField {
    #[serde(with = "b64_array")]
    pub iv: [u8; IV_SIZE],
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64_array")]
    pub tag: [u8; TAG_SIZE],
}

/// One encrypted recording plus everything needed to decrypt it except the master key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    pub blob_id: String,
    pub schema_version: u32,
    /// Unix timestamp (seconds)
    pub created_at: u64,
    pub iv: [u8; IV_SIZE],
    pub auth_tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
    /// RecordingKey wrapped by the master key (or an export wrapping key)
    pub wrapped_key: Vec<u8>,
    pub sealed_metadata: Option<SealedField>,
}

#[derive(Serialize, Deserialize)]
struct BlobHeader {
    blob_id: String,
    schema_version: u32,
    created_at: u64,
    #[serde(with = "b64_array")]
    iv: [u8; IV_SIZE],
    #[serde(with = "b64_array")]
    auth_tag: [u8; TAG_SIZE],
    #[serde(with = "b64")]
    wrapped_key: Vec<u8>,
    #[serde(default)]
    sealed_metadata: Option<SealedField>,
    ciphertext_len: u64,
    ciphertext_hash: String,
}

/// Encrypt a recording's audio with its RecordingKey.
///
/// A fresh IV is drawn for every call. The returned blob has an empty
/// `wrapped_key`; the caller attaches the wrapped key before persisting.
pub fn encrypt(blob_id: &str, plaintext: &[u8], key: &RecordingKey) -> CryptoResult<EncryptedBlob> {
    encrypt_at(blob_id, now_epoch(), plaintext, key)
}

pub fn encrypt_at(
    blob_id: &str,
    created_at: u64,
    plaintext: &[u8],
    key: &RecordingKey,
) -> CryptoResult<EncryptedBlob> {
    let aad = build_aad(SCHEMA_VERSION, created_at, blob_id);
    let sealed = seal(key.as_bytes(), &aad, plaintext)?;

    tracing::debug!(blob_id, bytes = plaintext.len(), "encrypted recording");

    Ok(EncryptedBlob {
        blob_id: blob_id.to_string(),
        schema_version: SCHEMA_VERSION,
        created_at,
        iv: sealed.iv,
        auth_tag: sealed.tag,
        ciphertext: sealed.ciphertext,
        wrapped_key: Vec::new(),
        sealed_metadata: None,
    })
}

/// Decrypt a blob. The tag is verified before any plaintext is returned.
pub fn decrypt(blob: &EncryptedBlob, key: &RecordingKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
    match blob.schema_version {
        1 => decrypt_v1(blob, key),
        v => Err(CryptoError::UnsupportedSchema(v)),
    }
}

fn decrypt_v1(blob: &EncryptedBlob, key: &RecordingKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let aad = build_aad(blob.schema_version, blob.created_at, &blob.blob_id);
    open(key.as_bytes(), &blob.iv, &aad, &blob.ciphertext, &blob.auth_tag).ok_or_else(|| {
        tracing::warn!(blob_id = %blob.blob_id, "integrity violation on decrypt");
        CryptoError::IntegrityViolation
    })
}

fn build_aad(schema_version: u32, created_at: u64, blob_id: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(4 + 8 + blob_id.len());
    aad.extend_from_slice(&schema_version.to_be_bytes());
    aad.extend_from_slice(&created_at.to_be_bytes());
    aad.extend_from_slice(blob_id.as_bytes());
    aad
}

fn metadata_aad(blob_id: &str) -> Vec<u8> {
    let mut aad = METADATA_AAD.to_vec();
    aad.extend_from_slice(blob_id.as_bytes());
    aad
}

impl EncryptedBlob {
    /// Encrypt sensitive metadata (duration, format, check-ins) under the recording key.
    pub fn seal_metadata(&mut self, key: &RecordingKey, metadata: &[u8]) -> CryptoResult<()> {
        let sealed = seal(key.as_bytes(), &metadata_aad(&self.blob_id), metadata)?;
        self.sealed_metadata = Some(SealedField {
            iv: sealed.iv,
            ciphertext: sealed.ciphertext,
            tag: sealed.tag,
        });
        Ok(())
    }

    /// Decrypt the sealed metadata, if any.
    pub fn open_metadata(&self, key: &RecordingKey) -> CryptoResult<Option<Zeroizing<Vec<u8>>>> {
        let Some(field) = &self.sealed_metadata else {
            return Ok(None);
        };
        open(
            key.as_bytes(),
            &field.iv,
            &metadata_aad(&self.blob_id),
            &field.ciphertext,
            &field.tag,
        )
        .map(Some)
        .ok_or(CryptoError::IntegrityViolation)
    }

    /// BLAKE3 of the ciphertext (hex), used by manifests and the container.
    pub fn ciphertext_hash(&self) -> String {
        blake3::hash(&self.ciphertext).to_hex().to_string()
    }

    /// Encode to the binary container format.
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        let header = BlobHeader {
            blob_id: self.blob_id.clone(),
            schema_version: self.schema_version,
            created_at: self.created_at,
            iv: self.iv,
            auth_tag: self.auth_tag,
            wrapped_key: self.wrapped_key.clone(),
            sealed_metadata: self.sealed_metadata.clone(),
            ciphertext_len: self.ciphertext.len() as u64,
            ciphertext_hash: self.ciphertext_hash(),
        };
        let header_json = serde_json::to_vec(&header)
            .map_err(|e| CryptoError::MalformedBlob(format!("header serialization: {e}")))?;

        let mut out = Vec::with_capacity(PREFIX_LEN + header_json.len() + self.ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&CONTAINER_VERSION.to_be_bytes());
        out.extend_from_slice(&(header_json.len() as u32).to_be_bytes());
        out.extend_from_slice(&header_json);
        out.extend_from_slice(&self.ciphertext);
        Ok(out)
    }

    /// Decode the binary container format.
    ///
    /// Truncated or corrupted containers are rejected here, before any key is
    /// touched, so a half-written file can never pass as a valid recording.
    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        if data.len() < PREFIX_LEN {
            return Err(malformed(format!("container too short: {} bytes", data.len())));
        }
        if &data[..4] != MAGIC {
            return Err(malformed("bad magic".into()));
        }
        let version = u16::from_be_bytes([data[4], data[5]]);
        if version != CONTAINER_VERSION {
            return Err(malformed(format!("unknown container version {version}")));
        }
        let header_len = u32::from_be_bytes([data[6], data[7], data[8], data[9]]) as usize;
        if header_len > MAX_HEADER_LEN || data.len() < PREFIX_LEN + header_len {
            return Err(malformed(format!("header length {header_len} out of range")));
        }

        let header: BlobHeader = serde_json::from_slice(&data[PREFIX_LEN..PREFIX_LEN + header_len])
            .map_err(|e| malformed(format!("header: {e}")))?;

        let ciphertext = &data[PREFIX_LEN + header_len..];
        if ciphertext.len() as u64 != header.ciphertext_len {
            return Err(malformed(format!(
                "ciphertext length {} (header says {})",
                ciphertext.len(),
                header.ciphertext_len
            )));
        }
        if blake3::hash(ciphertext).to_hex().as_str() != header.ciphertext_hash {
            return Err(malformed("ciphertext hash mismatch".into()));
        }
        if header.wrapped_key.len() != WRAPPED_KEY_SIZE {
            return Err(malformed(format!(
                "wrapped key length {} (expected {WRAPPED_KEY_SIZE})",
                header.wrapped_key.len()
            )));
        }

        Ok(Self {
            blob_id: header.blob_id,
            schema_version: header.schema_version,
            created_at: header.created_at,
            iv: header.iv,
            auth_tag: header.auth_tag,
            ciphertext: ciphertext.to_vec(),
            wrapped_key: header.wrapped_key,
            sealed_metadata: header.sealed_metadata,
        })
    }
}

fn malformed(msg: String) -> CryptoError {
    CryptoError::MalformedBlob(msg)
}

fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::MasterKey;
    use crate::keys::{generate_recording_key, wrap_key};
    use crate::KEY_SIZE;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn sealed_blob(plaintext: &[u8]) -> (EncryptedBlob, RecordingKey) {
        let key = generate_recording_key().unwrap();
        let mut blob = encrypt("rec-1", plaintext, &key).unwrap();
        blob.wrapped_key = wrap_key(&key, &MasterKey::from_bytes([9u8; KEY_SIZE])).unwrap();
        (blob, key)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_recording_key().unwrap();
        let blob = encrypt("rec-1", b"five seconds of audio", &key).unwrap();
        let plaintext = decrypt(&blob, &key).unwrap();
        assert_eq!(plaintext.as_slice(), b"five seconds of audio");
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let key = generate_recording_key().unwrap();
        let blob = encrypt("rec-1", b"", &key).unwrap();
        assert!(decrypt(&blob, &key).unwrap().is_empty());
    }

    #[test]
    fn test_ciphertext_size_matches_plaintext() {
        let key = generate_recording_key().unwrap();
        let blob = encrypt("rec-1", &[0u8; 1000], &key).unwrap();
        assert_eq!(blob.ciphertext.len(), 1000);
        assert_eq!(blob.iv.len(), IV_SIZE);
        assert_eq!(blob.auth_tag.len(), TAG_SIZE);
    }

    #[test]
    fn test_iv_unique_over_10k_encryptions() {
        let key = generate_recording_key().unwrap();
        let mut seen = HashSet::with_capacity(10_000);
        for _ in 0..10_000 {
            let blob = encrypt("rec-1", b"same plaintext", &key).unwrap();
            assert!(seen.insert(blob.iv), "IV collision");
        }
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let key1 = generate_recording_key().unwrap();
        let key2 = generate_recording_key().unwrap();
        let blob = encrypt("rec-1", b"secret data", &key1).unwrap();

        assert!(matches!(decrypt(&blob, &key2), Err(CryptoError::IntegrityViolation)));
    }

    #[test]
    fn test_single_bit_flips_detected() {
        let key = generate_recording_key().unwrap();
        let blob = encrypt("rec-1", b"secret data", &key).unwrap();

        for byte in 0..blob.ciphertext.len() {
            for bit in 0..8 {
                let mut t = blob.clone();
                t.ciphertext[byte] ^= 1 << bit;
                assert!(matches!(decrypt(&t, &key), Err(CryptoError::IntegrityViolation)));
            }
        }
        for byte in 0..IV_SIZE {
            for bit in 0..8 {
                let mut t = blob.clone();
                t.iv[byte] ^= 1 << bit;
                assert!(matches!(decrypt(&t, &key), Err(CryptoError::IntegrityViolation)));
            }
        }
        for byte in 0..TAG_SIZE {
            for bit in 0..8 {
                let mut t = blob.clone();
                t.auth_tag[byte] ^= 1 << bit;
                assert!(matches!(decrypt(&t, &key), Err(CryptoError::IntegrityViolation)));
            }
        }
    }

    #[test]
    fn test_header_binding() {
        let key = generate_recording_key().unwrap();
        let blob = encrypt("rec-1", b"secret data", &key).unwrap();

        let mut moved = blob.clone();
        moved.blob_id = "rec-2".into();
        assert!(matches!(decrypt(&moved, &key), Err(CryptoError::IntegrityViolation)));

        let mut redated = blob;
        redated.created_at += 1;
        assert!(matches!(decrypt(&redated, &key), Err(CryptoError::IntegrityViolation)));
    }

    #[test]
    fn test_unknown_schema_rejected() {
        let key = generate_recording_key().unwrap();
        let mut blob = encrypt("rec-1", b"x", &key).unwrap();
        blob.schema_version = 2;
        assert!(matches!(decrypt(&blob, &key), Err(CryptoError::UnsupportedSchema(2))));
    }

    #[test]
    fn test_metadata_sealed_and_opened() {
        let key = generate_recording_key().unwrap();
        let mut blob = encrypt("rec-1", b"audio", &key).unwrap();
        assert!(blob.open_metadata(&key).unwrap().is_none());

        blob.seal_metadata(&key, br#"{"pre":"joy"}"#).unwrap();
        let sealed = blob.sealed_metadata.as_ref().unwrap();
        assert_ne!(sealed.ciphertext.as_slice(), br#"{"pre":"joy"}"#.as_slice());

        let opened = blob.open_metadata(&key).unwrap().unwrap();
        assert_eq!(opened.as_slice(), br#"{"pre":"joy"}"#);

        let other = generate_recording_key().unwrap();
        assert!(matches!(blob.open_metadata(&other), Err(CryptoError::IntegrityViolation)));
    }

    #[test]
    fn test_container_roundtrip() {
        let (mut blob, key) = sealed_blob(b"container payload");
        blob.seal_metadata(&key, b"meta").unwrap();

        let bytes = blob.to_bytes().unwrap();
        let restored = EncryptedBlob::from_bytes(&bytes).unwrap();

        assert_eq!(restored, blob);
        assert_eq!(decrypt(&restored, &key).unwrap().as_slice(), b"container payload");
    }

    #[test]
    fn test_container_truncation_detected() {
        let (blob, _) = sealed_blob(&[7u8; 4096]);
        let bytes = blob.to_bytes().unwrap();

        for cut in [0, 3, PREFIX_LEN, PREFIX_LEN + 20, bytes.len() - 1] {
            let result = EncryptedBlob::from_bytes(&bytes[..cut]);
            assert!(
                matches!(result, Err(CryptoError::MalformedBlob(_))),
                "truncation at {cut} must be detected"
            );
        }
    }

    #[test]
    fn test_container_corruption_detected() {
        let (blob, _) = sealed_blob(&[7u8; 256]);
        let mut bytes = blob.to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            EncryptedBlob::from_bytes(&bytes),
            Err(CryptoError::MalformedBlob(_))
        ));
    }

    #[test]
    fn test_container_requires_wrapped_key() {
        let key = generate_recording_key().unwrap();
        let blob = encrypt("rec-1", b"x", &key).unwrap();
        let bytes = blob.to_bytes().unwrap();
        assert!(matches!(
            EncryptedBlob::from_bytes(&bytes),
            Err(CryptoError::MalformedBlob(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let key = generate_recording_key().unwrap();
            let blob = encrypt("prop", &plaintext, &key).unwrap();
            let decrypted = decrypt(&blob, &key).unwrap();
            prop_assert_eq!(decrypted.as_slice(), plaintext.as_slice());
        }

        #[test]
        fn prop_tamper_any_ciphertext_bit(
            plaintext in proptest::collection::vec(any::<u8>(), 1..512),
            idx in any::<proptest::sample::Index>(),
            bit in 0u8..8,
        ) {
            let key = generate_recording_key().unwrap();
            let mut blob = encrypt("prop", &plaintext, &key).unwrap();
            let i = idx.index(blob.ciphertext.len());
            blob.ciphertext[i] ^= 1 << bit;
            prop_assert!(matches!(decrypt(&blob, &key), Err(CryptoError::IntegrityViolation)));
        }
    }
}
