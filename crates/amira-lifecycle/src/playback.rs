//! Decrypting a stored recording for playback.

use tokio::sync::Mutex;
use zeroize::Zeroizing;

use amira_crypto::{blob, KeyManager};
use amira_storage::LocalBlobStore;

use crate::error::LifecycleResult;
use crate::metadata::RecordingMetadata;

pub struct DecryptedRecording {
    pub audio: Zeroizing<Vec<u8>>,
    pub metadata: Option<RecordingMetadata>,
}

impl std::fmt::Debug for DecryptedRecording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedRecording")
            .field("audio_len", &self.audio.len())
            .finish_non_exhaustive()
    }
}

/// Load, unwrap, and decrypt a recording. Fails closed on any integrity problem.
pub async fn open_recording(
    keys: &Mutex<KeyManager>,
    store: &LocalBlobStore,
    id: &str,
) -> LifecycleResult<DecryptedRecording> {
    let store = store.clone();
    let blob_id = id.to_string();
    let encrypted = tokio::task::spawn_blocking(move || store.get(&blob_id)).await??;

    let key = keys.lock().await.unwrap_recording_key(&encrypted.wrapped_key)?;

    let (audio, metadata) = tokio::task::spawn_blocking(move || {
        let audio = blob::decrypt(&encrypted, &key)?;
        let metadata = encrypted.open_metadata(&key)?;
        Ok::<_, amira_crypto::CryptoError>((audio, metadata))
    })
    .await??;

    let metadata = metadata
        .map(|bytes| RecordingMetadata::from_bytes(&bytes))
        .transpose()?;

    tracing::debug!(recording_id = %id, bytes = audio.len(), "recording decrypted");
    Ok(DecryptedRecording { audio, metadata })
}
