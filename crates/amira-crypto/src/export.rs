//! Password-protected export packages for moving recordings between devices.
//!
//! Each recording keeps its audio ciphertext unchanged; only its key is
//! re-wrapped, from the device master key to a key derived from the export
//! password. A manifest of BLAKE3 ciphertext hashes guards against tampering.

use std::collections::{HashMap, HashSet};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::aead::fill_random;
use crate::blob::EncryptedBlob;
use crate::encoding::{b64, b64_array};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_key_bytes, KdfParams};
use crate::keys::{unwrap_with, wrap_with, RecordingKey};
use crate::manager::KeyManager;
use crate::SALT_SIZE;

pub const PACKAGE_FORMAT: &str = "amira-export-v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub blob_id: String,
    /// BLAKE3 of the blob's ciphertext (hex)
    pub ciphertext_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    pub blob_id: String,
    /// AMRB container whose wrapped key is under the export wrapping key
    #[serde(with = "b64")]
    pub container: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPackage {
    pub format: String,
    pub created_at: u64,
    #[serde(with = "b64_array")]
    pub salt: [u8; SALT_SIZE],
    pub kdf: KdfParams,
    pub manifest: Vec<ManifestEntry>,
    pub entries: Vec<PackageEntry>,
}

impl ExportPackage {
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| CryptoError::MalformedBlob(format!("package serialization: {e}")))
    }

    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        serde_json::from_slice(data).map_err(|e| CryptoError::MalformedBlob(format!("package: {e}")))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn wrapping_key(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> CryptoResult<Zeroizing<[u8; 32]>> {
    derive_key_bytes(password.expose_secret().as_bytes(), salt, params).map(Zeroizing::new)
}

/// Package `blobs` for export under `password`.
///
/// Every blob's key is unwrapped with the device master key held by `keys`,
/// so the session must be unlocked.
pub fn export_package(
    blobs: &[EncryptedBlob],
    password: &SecretString,
    keys: &mut KeyManager,
    params: &KdfParams,
) -> CryptoResult<ExportPackage> {
    let mut salt = [0u8; SALT_SIZE];
    fill_random(&mut salt)?;
    let wrapping = wrapping_key(password, &salt, params)?;

    let mut manifest = Vec::with_capacity(blobs.len());
    let mut entries = Vec::with_capacity(blobs.len());

    for blob in blobs {
        let recording_key = keys.unwrap_recording_key(&blob.wrapped_key)?;
        let mut exported = blob.clone();
        exported.wrapped_key = wrap_with(&wrapping, &recording_key)?;

        manifest.push(ManifestEntry {
            blob_id: blob.blob_id.clone(),
            ciphertext_hash: blob.ciphertext_hash(),
        });
        entries.push(PackageEntry {
            blob_id: blob.blob_id.clone(),
            container: exported.to_bytes()?,
        });
    }

    tracing::info!(recordings = entries.len(), "export package created");

    Ok(ExportPackage {
        format: PACKAGE_FORMAT.to_string(),
        created_at: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        salt,
        kdf: *params,
        manifest,
        entries,
    })
}

/// Verify and unpack an export package, re-wrapping every key for this device.
///
/// All-or-nothing: any integrity or authentication failure returns an error
/// and no blob.
pub fn import_package(
    package: &ExportPackage,
    password: &SecretString,
    keys: &mut KeyManager,
) -> CryptoResult<Vec<EncryptedBlob>> {
    if package.format != PACKAGE_FORMAT {
        return Err(CryptoError::MalformedBlob(format!(
            "unknown package format {:?}",
            package.format
        )));
    }

    let blobs = verify_manifest(package)?;

    let wrapping = wrapping_key(password, &package.salt, &package.kdf)?;
    let recording_keys: Vec<RecordingKey> = blobs
        .iter()
        .map(|blob| unwrap_with(&wrapping, &blob.wrapped_key))
        .collect::<CryptoResult<_>>()?;

    let mut imported = Vec::with_capacity(blobs.len());
    for (mut blob, key) in blobs.into_iter().zip(recording_keys.iter()) {
        blob.wrapped_key = keys.wrap_recording_key(key)?;
        imported.push(blob);
    }

    tracing::info!(recordings = imported.len(), "export package imported");
    Ok(imported)
}

/// Decode every entry and check it against the manifest, one-to-one.
fn verify_manifest(package: &ExportPackage) -> CryptoResult<Vec<EncryptedBlob>> {
    let expected: HashMap<&str, &str> = package
        .manifest
        .iter()
        .map(|m| (m.blob_id.as_str(), m.ciphertext_hash.as_str()))
        .collect();

    if expected.len() != package.manifest.len() || package.manifest.len() != package.entries.len() {
        return Err(CryptoError::PackageIntegrity {
            entry: "manifest".into(),
        });
    }

    let mut seen = HashSet::new();
    let mut blobs = Vec::with_capacity(package.entries.len());
    for entry in &package.entries {
        let integrity = || CryptoError::PackageIntegrity {
            entry: entry.blob_id.clone(),
        };

        let blob = EncryptedBlob::from_bytes(&entry.container).map_err(|_| integrity())?;
        let hash = expected.get(entry.blob_id.as_str()).ok_or_else(integrity)?;
        if blob.blob_id != entry.blob_id || blob.ciphertext_hash() != *hash || !seen.insert(&entry.blob_id) {
            tracing::warn!(blob_id = %entry.blob_id, "export package entry failed verification");
            return Err(integrity());
        }
        blobs.push(blob);
    }
    Ok(blobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{decrypt, encrypt};
    use crate::kdf::MasterKey;
    use crate::keys::generate_recording_key;
    use std::time::Duration;

    const FAST: KdfParams = KdfParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    };
    const HOUR: Duration = Duration::from_secs(3600);

    fn device(seed: u8) -> KeyManager {
        let mut km = KeyManager::new(HOUR, HOUR);
        km.unlock_with(MasterKey::from_bytes([seed; 32]));
        km
    }

    fn recordings(km: &mut KeyManager, n: usize) -> Vec<(EncryptedBlob, Vec<u8>)> {
        (0..n)
            .map(|i| {
                let audio = vec![i as u8; 100 + i];
                let key = generate_recording_key().unwrap();
                let mut blob = encrypt(&format!("rec-{i}"), &audio, &key).unwrap();
                blob.wrapped_key = km.wrap_recording_key(&key).unwrap();
                (blob, audio)
            })
            .collect()
    }

    #[test]
    fn test_export_import_between_devices() {
        let mut source = device(1);
        let recs = recordings(&mut source, 3);
        let blobs: Vec<_> = recs.iter().map(|(b, _)| b.clone()).collect();

        let password = SecretString::from("correct-horse");
        let package = export_package(&blobs, &password, &mut source, &FAST).unwrap();
        let bytes = package.to_bytes().unwrap();

        let mut target = device(2);
        let parsed = ExportPackage::from_bytes(&bytes).unwrap();
        let imported = import_package(&parsed, &password, &mut target).unwrap();

        assert_eq!(imported.len(), 3);
        for (blob, (_, audio)) in imported.iter().zip(recs.iter()) {
            let key = target.unwrap_recording_key(&blob.wrapped_key).unwrap();
            assert_eq!(decrypt(blob, &key).unwrap().as_slice(), audio.as_slice());
        }
    }

    #[test]
    fn test_import_wrong_password() {
        let mut source = device(1);
        let blobs: Vec<_> = recordings(&mut source, 2).into_iter().map(|(b, _)| b).collect();
        let package =
            export_package(&blobs, &SecretString::from("correct-horse"), &mut source, &FAST).unwrap();

        let result = import_package(&package, &SecretString::from("wrong"), &mut device(2));
        assert!(matches!(result, Err(CryptoError::UnwrapAuthentication)));
    }

    #[test]
    fn test_import_tampered_entry() {
        let mut source = device(1);
        let blobs: Vec<_> = recordings(&mut source, 2).into_iter().map(|(b, _)| b).collect();
        let password = SecretString::from("correct-horse");
        let mut package = export_package(&blobs, &password, &mut source, &FAST).unwrap();

        let last = package.entries[1].container.len() - 1;
        package.entries[1].container[last] ^= 0x01;

        let result = import_package(&package, &password, &mut device(2));
        assert!(matches!(result, Err(CryptoError::PackageIntegrity { entry }) if entry == "rec-1"));
    }

    #[test]
    fn test_import_manifest_mismatch() {
        let mut source = device(1);
        let blobs: Vec<_> = recordings(&mut source, 2).into_iter().map(|(b, _)| b).collect();
        let password = SecretString::from("correct-horse");

        let mut missing = export_package(&blobs, &password, &mut source, &FAST).unwrap();
        missing.manifest.pop();
        assert!(matches!(
            import_package(&missing, &password, &mut device(2)),
            Err(CryptoError::PackageIntegrity { .. })
        ));

        let mut wrong_hash = export_package(&blobs, &password, &mut source, &FAST).unwrap();
        wrong_hash.manifest[0].ciphertext_hash = "00".repeat(32);
        assert!(matches!(
            import_package(&wrong_hash, &password, &mut device(2)),
            Err(CryptoError::PackageIntegrity { .. })
        ));
    }

    #[test]
    fn test_export_requires_unlocked_session() {
        let mut source = device(1);
        let blobs: Vec<_> = recordings(&mut source, 1).into_iter().map(|(b, _)| b).collect();
        source.lock();
        let result = export_package(&blobs, &SecretString::from("pw"), &mut source, &FAST);
        assert!(matches!(result, Err(CryptoError::Locked)));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let mut source = device(1);
        let mut package = export_package(&[], &SecretString::from("pw"), &mut source, &FAST).unwrap();
        assert!(package.is_empty());
        package.format = "other".into();
        assert!(matches!(
            import_package(&package, &SecretString::from("pw"), &mut device(2)),
            Err(CryptoError::MalformedBlob(_))
        ));
    }
}
