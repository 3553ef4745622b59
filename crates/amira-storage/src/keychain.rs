//! Platform keychain as a `SecureKeyStore`.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS / iOS: Keychain Services
//! - Linux: Secret Service (D-Bus)
//! - Windows: Credential Manager
//!
//! Secrets are stored base64-encoded since keyring entries hold strings.

use amira_crypto::{CryptoError, CryptoResult, SecureKeyStore};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::{Zeroize, Zeroizing};

const SERVICE_NAME: &str = "amira";

#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    /// Check if the platform keychain is reachable.
    pub fn is_available(&self) -> bool {
        keyring::Entry::new(&self.service, "__amira_availability__").is_ok()
    }

    fn entry(&self, key_id: &str) -> CryptoResult<keyring::Entry> {
        keyring::Entry::new(&self.service, key_id)
            .map_err(|e| CryptoError::KeyStore(format!("keychain entry creation: {e}")))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureKeyStore for KeyringStore {
    fn store(&self, key_id: &str, secret: &[u8]) -> CryptoResult<()> {
        let encoded = Zeroizing::new(STANDARD.encode(secret));
        self.entry(key_id)?
            .set_password(&encoded)
            .map_err(|e| CryptoError::KeyStore(format!("keychain store for '{key_id}': {e}")))?;
        tracing::debug!(key = key_id, "stored secret in platform keychain");
        Ok(())
    }

    fn retrieve(&self, key_id: &str) -> CryptoResult<Option<Zeroizing<Vec<u8>>>> {
        match self.entry(key_id)?.get_password() {
            Ok(mut encoded) => {
                let decoded = STANDARD.decode(encoded.as_bytes());
                encoded.zeroize();
                decoded
                    .map(|bytes| Some(Zeroizing::new(bytes)))
                    .map_err(|e| CryptoError::KeyStore(format!("keychain entry '{key_id}' not base64: {e}")))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CryptoError::KeyStore(format!("keychain get for '{key_id}': {e}"))),
        }
    }

    fn delete(&self, key_id: &str) -> CryptoResult<()> {
        match self.entry(key_id)?.delete_credential() {
            Ok(()) => {
                tracing::debug!(key = key_id, "deleted secret from platform keychain");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CryptoError::KeyStore(format!("keychain delete for '{key_id}': {e}"))),
        }
    }
}
