//! Key derivation: Argon2id credential → master key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, SALT_SIZE};

/// Largest Argon2id memory cost this client will attempt (1 GiB).
pub const MAX_SUPPORTED_MEM_KIB: u32 = 1024 * 1024;

/// A 256-bit master key derived from the user's credential via Argon2id.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        crate::error::expect_len("master key", KEY_SIZE, bytes.len())?;
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id parameters for KDF.
///
/// Stored next to every salt so data encrypted by one client version stays
/// decryptable by the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub mem_cost_kib: u32,
    /// Time cost / iterations
    pub time_cost: u32,
    /// Parallelism
    pub parallelism: u32,
}

impl KdfParams {
    /// Production parameters: 64 MiB, 3 passes, 4 lanes.
    pub const V1: KdfParams = KdfParams {
        mem_cost_kib: 65536,
        time_cost: 3,
        parallelism: 4,
    };
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::V1
    }
}

/// Derive a 256-bit master key from a credential and salt using Argon2id.
///
/// The salt is 16 random bytes generated once per account; it is stored in
/// the clear alongside the key material. Unsupported parameters are an
/// error, never a reason to fall back to cheaper ones.
pub fn derive_master_key(
    credential: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> CryptoResult<MasterKey> {
    let bytes = derive_key_bytes(credential.expose_secret().as_bytes(), salt, params)?;
    Ok(MasterKey::from_bytes(bytes))
}

/// Raw Argon2id derivation shared by the master key and export wrapping keys.
pub(crate) fn derive_key_bytes(
    secret: &[u8],
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> CryptoResult<[u8; KEY_SIZE]> {
    if params.mem_cost_kib > MAX_SUPPORTED_MEM_KIB {
        return Err(CryptoError::KeyDerivation(format!(
            "memory cost {} KiB exceeds device limit {} KiB",
            params.mem_cost_kib, MAX_SUPPORTED_MEM_KIB
        )));
    }

    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    if let Err(e) = argon2.hash_password_into(secret, salt, &mut key) {
        key.zeroize();
        return Err(CryptoError::KeyDerivation(format!("Argon2id failed: {e}")));
    }
    Ok(key)
}
