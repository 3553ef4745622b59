//! Master key rotation over the local blob store.
//!
//! Only wrapped keys change; audio ciphertext is never touched. Each blob is
//! rewritten atomically, and blobs already wrapped under the new key are
//! skipped, so an interrupted rotation is resumed by running it again with
//! the same new key. `change_passphrase` pins that key on disk before the
//! first blob is touched.

use std::path::Path;

use secrecy::SecretString;
use tokio::sync::Mutex;
use tracing::{info, warn};

use amira_crypto::{KeyManager, MasterKey, RewrapOutcome, UserKeyMaterial};
use amira_storage::{save_key_material, LocalBlobStore};

use crate::error::{LifecycleError, LifecycleResult};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationReport {
    /// Blobs re-wrapped in this run
    pub rewrapped: Vec<String>,
    /// Blobs an earlier, interrupted run already moved to the new key
    pub already_rotated: Vec<String>,
    /// Blobs that could not be read at all, with the reason
    pub skipped: Vec<(String, String)>,
}

impl RotationReport {
    /// Every blob now wrapped under the new key. Their remote copies are stale.
    pub fn moved(&self) -> Vec<String> {
        self.rewrapped
            .iter()
            .chain(self.already_rotated.iter())
            .cloned()
            .collect()
    }
}

/// Re-wrap every stored recording key from the current master key to `new_master`,
/// then make `new_master` the active key.
///
/// A blob that reads fine but whose key unwraps under neither the old nor
/// the new master is stranded: the rotation is then not installed and
/// `RotationStranded` lists those ids. Blobs re-wrapped before that point
/// stay on the new key, so the same rotation can be resumed.
pub async fn rotate_recordings(
    keys: &Mutex<KeyManager>,
    store: &LocalBlobStore,
    new_master: MasterKey,
) -> LifecycleResult<RotationReport> {
    let rotation = keys.lock().await.begin_rotation(new_master)?;
    let store = store.clone();

    let (rotation, report, stranded) = tokio::task::spawn_blocking(move || {
        let mut report = RotationReport::default();
        let mut stranded = Vec::new();
        for id in store.list()? {
            let mut blob = match store.get(&id) {
                Ok(blob) => blob,
                Err(e) => {
                    warn!(recording_id = %id, "skipping unreadable blob: {e}");
                    report.skipped.push((id, e.to_string()));
                    continue;
                }
            };
            match rotation.rewrap(&blob.wrapped_key) {
                Ok(RewrapOutcome::Rewrapped(wrapped)) => {
                    blob.wrapped_key = wrapped;
                    store.put(&blob)?;
                    report.rewrapped.push(id);
                }
                Ok(RewrapOutcome::AlreadyRotated) => report.already_rotated.push(id),
                Err(e) => {
                    warn!(recording_id = %id, "key unwraps under neither master key: {e}");
                    stranded.push(id);
                }
            }
        }
        Ok::<_, amira_storage::StorageError>((rotation, report, stranded))
    })
    .await??;

    if !stranded.is_empty() {
        warn!(
            stranded = stranded.len(),
            rewrapped = report.rewrapped.len(),
            "rotation not installed"
        );
        return Err(LifecycleError::RotationStranded(stranded));
    }

    keys.lock().await.install(rotation)?;

    info!(
        rewrapped = report.rewrapped.len(),
        already_rotated = report.already_rotated.len(),
        skipped = report.skipped.len(),
        "master key rotation complete"
    );
    Ok(report)
}

/// Change the account passphrase: pin the new key check next to the key
/// material, re-wrap every recording, then make the new passphrase
/// authoritative.
///
/// `keys` must be unlocked with the current passphrase. A crash at any point
/// leaves the material marked pending; calling this again with the same new
/// passphrase finishes the job, and any other passphrase is refused with
/// `RotationMismatch` before a blob is touched.
pub async fn change_passphrase(
    keys: &Mutex<KeyManager>,
    store: &LocalBlobStore,
    material_path: &Path,
    material: &UserKeyMaterial,
    new_credential: &SecretString,
) -> LifecycleResult<(UserKeyMaterial, RotationReport)> {
    let (pending, new_master) = material.begin_rekey(new_credential)?;
    if material.rotation_pending() {
        info!(user_id = %material.user_id, "resuming interrupted passphrase change");
    }
    save_key_material(material_path, &pending)?;

    let report = rotate_recordings(keys, store, new_master).await?;

    let Some(done) = pending.complete_rekey() else {
        return Err(LifecycleError::Other(anyhow::anyhow!(
            "key material lost its pending rotation"
        )));
    };
    save_key_material(material_path, &done)?;
    info!(user_id = %done.user_id, "passphrase changed");
    Ok((done, report))
}
