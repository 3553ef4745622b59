//! Platform secure key store capability

use std::collections::HashMap;
use std::sync::Mutex;

use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

/// Hardware- or OS-backed storage for small secrets (the cached master key).
///
/// Implementations: `MemoryKeyStore` here, the OS keychain in `amira-storage`.
pub trait SecureKeyStore: Send + Sync {
    fn store(&self, key_id: &str, secret: &[u8]) -> CryptoResult<()>;
    fn retrieve(&self, key_id: &str) -> CryptoResult<Option<Zeroizing<Vec<u8>>>>;
    /// Deleting an absent key is not an error.
    fn delete(&self, key_id: &str) -> CryptoResult<()>;
}

/// Process-local key store. Contents are zeroized when removed or dropped.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> CryptoResult<std::sync::MutexGuard<'_, HashMap<String, Zeroizing<Vec<u8>>>>> {
        self.entries
            .lock()
            .map_err(|_| CryptoError::KeyStore("memory key store poisoned".into()))
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn store(&self, key_id: &str, secret: &[u8]) -> CryptoResult<()> {
        self.entries()?
            .insert(key_id.to_string(), Zeroizing::new(secret.to_vec()));
        Ok(())
    }

    fn retrieve(&self, key_id: &str) -> CryptoResult<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.entries()?.get(key_id).cloned())
    }

    fn delete(&self, key_id: &str) -> CryptoResult<()> {
        self.entries()?.remove(key_id);
        Ok(())
    }
}
