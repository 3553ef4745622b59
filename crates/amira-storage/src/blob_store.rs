//! Local directory of encrypted blob containers (`<blob_id>.amrb`).
//!
//! Only ciphertext ever reaches this directory. Writes are atomic, so after
//! a crash a blob is either absent or complete; leftover temp files are
//! erased when the store is opened.

use std::fs;
use std::path::{Path, PathBuf};

use amira_crypto::EncryptedBlob;

use crate::durable::{secure_erase, write_atomic, TMP_SUFFIX};
use crate::error::{StorageError, StorageResult};

pub const BLOB_EXTENSION: &str = "amrb";

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    dir: PathBuf,
}

impl LocalBlobStore {
    /// Open (creating if needed) the blob directory and clean up interrupted writes.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let mut stray = 0usize;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_tmp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(TMP_SUFFIX));
            if is_tmp {
                secure_erase(&path)?;
                stray += 1;
            }
        }
        if stray > 0 {
            tracing::warn!(dir = %dir.display(), count = stray, "erased interrupted blob writes");
        }

        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for a blob (the `storage_reference` in journal records).
    pub fn file_name(blob_id: &str) -> StorageResult<String> {
        validate_blob_id(blob_id)?;
        Ok(format!("{blob_id}.{BLOB_EXTENSION}"))
    }

    pub fn path_for(&self, blob_id: &str) -> StorageResult<PathBuf> {
        Ok(self.dir.join(Self::file_name(blob_id)?))
    }

    /// Persist a blob atomically. Returns its storage reference.
    pub fn put(&self, blob: &EncryptedBlob) -> StorageResult<String> {
        let bytes = blob.to_bytes()?;
        self.put_bytes(&blob.blob_id, &bytes)
    }

    pub fn put_bytes(&self, blob_id: &str, bytes: &[u8]) -> StorageResult<String> {
        let path = self.path_for(blob_id)?;
        write_atomic(&path, bytes)?;
        tracing::debug!(blob_id, bytes = bytes.len(), "blob persisted");
        Self::file_name(blob_id)
    }

    pub fn get_bytes(&self, blob_id: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(blob_id)?;
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(blob_id.to_string()),
            _ => StorageError::Io(e),
        })
    }

    /// Load and structurally validate a blob (magic, lengths, ciphertext hash).
    pub fn get(&self, blob_id: &str) -> StorageResult<EncryptedBlob> {
        let bytes = self.get_bytes(blob_id)?;
        let blob = EncryptedBlob::from_bytes(&bytes)?;
        if blob.blob_id != blob_id {
            return Err(StorageError::Crypto(amira_crypto::CryptoError::MalformedBlob(
                format!("file for {blob_id} holds blob {}", blob.blob_id),
            )));
        }
        Ok(blob)
    }

    pub fn exists(&self, blob_id: &str) -> bool {
        self.path_for(blob_id).is_ok_and(|p| p.exists())
    }

    /// Overwrite and unlink a blob. Absent blobs are not an error.
    pub fn erase(&self, blob_id: &str) -> StorageResult<()> {
        secure_erase(&self.path_for(blob_id)?)
    }

    /// Ids of all complete blobs, sorted.
    pub fn list(&self) -> StorageResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Blob ids become file and object names: ASCII alphanumerics, `-` and `_` only.
pub fn validate_blob_id(blob_id: &str) -> StorageResult<()> {
    let ok = !blob_id.is_empty()
        && blob_id.len() <= 128
        && blob_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidBlobId(blob_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amira_crypto::{encrypt, generate_recording_key, wrap_key, MasterKey};

    fn blob(id: &str) -> EncryptedBlob {
        let key = generate_recording_key().unwrap();
        let mut blob = encrypt(id, b"pcm bytes", &key).unwrap();
        blob.wrapped_key = wrap_key(&key, &MasterKey::from_bytes([3u8; 32])).unwrap();
        blob
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();
        let b = blob("rec-1");

        let reference = store.put(&b).unwrap();
        assert_eq!(reference, "rec-1.amrb");
        assert_eq!(store.get("rec-1").unwrap(), b);
        assert_eq!(store.list().unwrap(), vec!["rec-1".to_string()]);
    }

    #[test]
    fn test_missing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();
        assert!(matches!(store.get("nope"), Err(StorageError::NotFound(_))));
        assert!(!store.exists("nope"));
    }

    #[test]
    fn test_truncated_blob_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();
        let bytes = blob("rec-1").to_bytes().unwrap();
        store.put_bytes("rec-1", &bytes[..bytes.len() / 2]).unwrap();

        let err = store.get("rec-1").unwrap_err();
        assert!(err.is_corrupt(), "got {err:?}");
    }

    #[test]
    fn test_open_erases_stray_tmp_files() {
        let dir = tempfile::tempdir().unwrap();
        let stray = dir.path().join("rec-9.amrb.tmp");
        fs::write(&stray, b"half a blob").unwrap();

        let store = LocalBlobStore::open(dir.path()).unwrap();
        assert!(!stray.exists());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_erase() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path()).unwrap();
        store.put(&blob("rec-1")).unwrap();

        store.erase("rec-1").unwrap();
        assert!(!store.exists("rec-1"));
        store.erase("rec-1").unwrap();
    }

    #[test]
    fn test_rejects_path_traversal_ids() {
        for bad in ["", "../x", "a/b", "a.b", "rec 1"] {
            assert!(matches!(
                validate_blob_id(bad),
                Err(StorageError::InvalidBlobId(_))
            ));
        }
        validate_blob_id("5f0c2a4e-9d1b-4b8e-a0c1-3e2f1d0b9a87").unwrap();
    }
}
