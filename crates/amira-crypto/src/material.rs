//! Per-account key material: the clear-text inputs needed to re-derive the master key.

use hkdf::Hkdf;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::aead::fill_random;
use crate::encoding::{b64_array, b64_array_opt};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_master_key, KdfParams, MasterKey};
use crate::SALT_SIZE;

const KEY_CHECK_SIZE: usize = 16;
const KEY_CHECK_DOMAIN: &[u8] = b"amira-key-check";

/// Salt, KDF parameters and a key-check value for one user.
///
/// None of these fields is secret. The salt is generated once and never
/// changes for the life of the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKeyMaterial {
    pub user_id: String,
    #[serde(with = "b64_array")]
    pub salt: [u8; SALT_SIZE],
    pub kdf: KdfParams,
    #[serde(with = "b64_array")]
    pub key_check: [u8; KEY_CHECK_SIZE],
    /// Key check of the credential an unfinished passphrase change moves to.
    /// Written before any recording key is re-wrapped.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_array_opt")]
    pub pending_key_check: Option<[u8; KEY_CHECK_SIZE]>,
    /// Unix timestamp (seconds)
    pub created_at: u64,
}

impl UserKeyMaterial {
    /// Create key material for a new account and return the derived master key.
    pub fn create(
        user_id: &str,
        credential: &SecretString,
        params: KdfParams,
    ) -> CryptoResult<(Self, MasterKey)> {
        let mut salt = [0u8; SALT_SIZE];
        fill_random(&mut salt)?;

        let master = derive_master_key(credential, &salt, &params)?;
        let key_check = key_check(&master, &salt)?;

        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        tracing::info!(user_id, "created key material");

        Ok((
            Self {
                user_id: user_id.to_string(),
                salt,
                kdf: params,
                key_check,
                pending_key_check: None,
                created_at,
            },
            master,
        ))
    }

    /// Re-derive the master key and confirm it matches this account.
    pub fn derive(&self, credential: &SecretString) -> CryptoResult<MasterKey> {
        let master = derive_master_key(credential, &self.salt, &self.kdf)?;
        self.verify(&master)?;
        Ok(master)
    }

    /// Check a master key against the stored key-check value in constant time.
    pub fn verify(&self, master: &MasterKey) -> CryptoResult<()> {
        if !ct_eq(&key_check(master, &self.salt)?, &self.key_check) {
            return Err(CryptoError::WrongCredential);
        }
        Ok(())
    }

    /// Whether a passphrase change was started and not finished.
    pub fn rotation_pending(&self) -> bool {
        self.pending_key_check.is_some()
    }

    /// Derive the master key for a new credential and record it as pending,
    /// keeping the salt.
    ///
    /// The returned material must be persisted before any recording key is
    /// re-wrapped. If a change is already pending, `new_credential` must be
    /// the one it was started with (`RotationMismatch` otherwise), so an
    /// interrupted change can only be resumed, never redirected.
    pub fn begin_rekey(&self, new_credential: &SecretString) -> CryptoResult<(Self, MasterKey)> {
        let master = derive_master_key(new_credential, &self.salt, &self.kdf)?;
        let check = key_check(&master, &self.salt)?;
        if let Some(pending) = &self.pending_key_check {
            if !ct_eq(&check, pending) {
                return Err(CryptoError::RotationMismatch);
            }
        }
        Ok((
            Self {
                pending_key_check: Some(check),
                ..self.clone()
            },
            master,
        ))
    }

    /// Promote the pending key check once every recording key is re-wrapped.
    /// Returns `None` when no change is pending.
    pub fn complete_rekey(&self) -> Option<Self> {
        let pending = self.pending_key_check?;
        Some(Self {
            key_check: pending,
            pending_key_check: None,
            ..self.clone()
        })
    }

    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| CryptoError::MalformedBlob(format!("key material serialization: {e}")))
    }

    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| CryptoError::MalformedBlob(format!("key material: {e}")))
    }
}

fn ct_eq(a: &[u8; KEY_CHECK_SIZE], b: &[u8; KEY_CHECK_SIZE]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn key_check(master: &MasterKey, salt: &[u8; SALT_SIZE]) -> CryptoResult<[u8; KEY_CHECK_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), master.as_bytes());
    let mut okm = [0u8; KEY_CHECK_SIZE];
    hkdf.expand(KEY_CHECK_DOMAIN, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}
