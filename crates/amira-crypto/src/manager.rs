//! KeyManager: the single owner of the unlocked master key.
//!
//! Callers hold it as explicit context (`Arc<Mutex<KeyManager>>` in the
//! lifecycle crate). The master key never leaves this type except through
//! `KeyRotation`, which is itself consumed by `install`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::SecretString;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::MasterKey;
use crate::keys::{rewrap_key, unwrap_key, wrap_key, RecordingKey};
use crate::keystore::SecureKeyStore;
use crate::material::UserKeyMaterial;

/// Key id under which the master key is cached in a `SecureKeyStore`.
pub const MASTER_KEY_ID: &str = "amira-master-key";

pub struct KeyManager {
    master: Option<MasterKey>,
    session_timeout: Duration,
    background_grace: Duration,
    last_activity: Instant,
    backgrounded_at: Option<Instant>,
    key_store: Option<Arc<dyn SecureKeyStore>>,
}

impl KeyManager {
    pub fn new(session_timeout: Duration, background_grace: Duration) -> Self {
        Self {
            master: None,
            session_timeout,
            background_grace,
            last_activity: Instant::now(),
            backgrounded_at: None,
            key_store: None,
        }
    }

    /// Cache the master key in `store` on unlock and clear it on lock.
    pub fn with_key_store(mut self, store: Arc<dyn SecureKeyStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    /// Derive the master key from the user's credential and hold it.
    pub fn unlock(&mut self, credential: &SecretString, material: &UserKeyMaterial) -> CryptoResult<()> {
        let master = material.derive(credential)?;
        if let Some(store) = &self.key_store {
            store.store(MASTER_KEY_ID, master.as_bytes())?;
        }
        self.unlock_with(master);
        tracing::info!(user_id = %material.user_id, "master key unlocked");
        Ok(())
    }

    /// Hold an already derived master key.
    pub fn unlock_with(&mut self, master: MasterKey) {
        self.master = Some(master);
        self.last_activity = Instant::now();
        self.backgrounded_at = None;
    }

    /// Unlock from the secure key store without prompting.
    ///
    /// Returns `false` when nothing usable is cached. A cached key that fails
    /// the key check is removed.
    pub fn restore(&mut self, material: &UserKeyMaterial) -> CryptoResult<bool> {
        let Some(store) = self.key_store.clone() else {
            return Ok(false);
        };
        let Some(bytes) = store.retrieve(MASTER_KEY_ID)? else {
            return Ok(false);
        };
        let master = MasterKey::from_slice(&bytes)?;
        if material.verify(&master).is_err() {
            tracing::warn!("cached master key does not match key material, discarding");
            store.delete(MASTER_KEY_ID)?;
            return Ok(false);
        }
        self.unlock_with(master);
        tracing::debug!("master key restored from secure key store");
        Ok(true)
    }

    /// Clear the master key (logout). Also removes any cached copy.
    pub fn lock(&mut self) {
        self.clear("logout");
        if let Some(store) = &self.key_store {
            if let Err(e) = store.delete(MASTER_KEY_ID) {
                tracing::warn!("failed to remove cached master key: {e}");
            }
        }
    }

    pub fn is_unlocked(&mut self) -> bool {
        self.expire_if_idle();
        self.master.is_some()
    }

    /// The app moved to the background.
    pub fn on_background(&mut self) {
        self.backgrounded_at = Some(Instant::now());
    }

    /// The app returned to the foreground; clears the key if it was away too long.
    pub fn on_foreground(&mut self) {
        if let Some(since) = self.backgrounded_at.take() {
            if since.elapsed() >= self.background_grace {
                self.clear("background grace period exceeded");
            }
        }
    }

    pub fn wrap_recording_key(&mut self, key: &RecordingKey) -> CryptoResult<Vec<u8>> {
        wrap_key(key, self.master()?)
    }

    pub fn unwrap_recording_key(&mut self, wrapped: &[u8]) -> CryptoResult<RecordingKey> {
        unwrap_key(wrapped, self.master()?)
    }

    /// Start rotating to `new`. The current key stays active until `install`.
    pub fn begin_rotation(&mut self, new: MasterKey) -> CryptoResult<KeyRotation> {
        let old = self.master()?.clone();
        Ok(KeyRotation { old, new })
    }

    /// Make the rotation's new key the active master key.
    pub fn install(&mut self, rotation: KeyRotation) -> CryptoResult<()> {
        let new = rotation.finish();
        if let Some(store) = &self.key_store {
            store.store(MASTER_KEY_ID, new.as_bytes())?;
        }
        self.unlock_with(new);
        tracing::info!("rotated master key installed");
        Ok(())
    }

    fn master(&mut self) -> CryptoResult<&MasterKey> {
        self.expire_if_idle();
        self.last_activity = Instant::now();
        self.master.as_ref().ok_or(CryptoError::Locked)
    }

    fn expire_if_idle(&mut self) {
        if self.master.is_some() && self.last_activity.elapsed() >= self.session_timeout {
            self.clear("session timeout");
        }
    }

    fn clear(&mut self, reason: &str) {
        // MasterKey zeroizes on drop
        if self.master.take().is_some() {
            tracing::info!(reason, "master key cleared");
        }
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("unlocked", &self.master.is_some())
            .field("session_timeout", &self.session_timeout)
            .field("background_grace", &self.background_grace)
            .finish()
    }
}

/// Result of re-wrapping one recording key during rotation.
#[derive(Debug)]
pub enum RewrapOutcome {
    Rewrapped(Vec<u8>),
    /// Already wrapped under the new key (an earlier, interrupted rotation got here)
    AlreadyRotated,
}

/// An in-progress master key rotation.
pub struct KeyRotation {
    old: MasterKey,
    new: MasterKey,
}

impl KeyRotation {
    /// Re-wrap one recording key from the old master to the new one.
    pub fn rewrap(&self, wrapped: &[u8]) -> CryptoResult<RewrapOutcome> {
        if unwrap_key(wrapped, &self.new).is_ok() {
            return Ok(RewrapOutcome::AlreadyRotated);
        }
        rewrap_key(wrapped, &self.old, &self.new).map(RewrapOutcome::Rewrapped)
    }

    fn finish(self) -> MasterKey {
        self.new
    }
}
