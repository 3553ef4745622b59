//! amira-crypto: client-side end-to-end encryption for Amira voice journals
//!
//! Architecture: envelope encryption with AES-256-GCM
//!
//! Pipeline: PCM audio → encrypt (RecordingKey) → wrap RecordingKey (MasterKey) → AMRB container → local store / upload
//!
//! Key hierarchy:
//! ```text
//! Credential ──Argon2id(salt, KdfParams::V1)──► Master Key (256-bit, never persisted in clear)
//!   ├── key check (HKDF-SHA256, domain="amira-key-check"), stored with the salt
//!   └── Recording Key (per recording, 256-bit random, wrapped by master key)
//!       ├── Audio AEAD: AES-256-GCM (iv=random 96-bit, AAD=schema||created_at||blob_id)
//!       └── Metadata AEAD: AES-256-GCM (iv=random 96-bit, AAD="amira-metadata-v1"||blob_id)
//!
//! Export password ──Argon2id(package salt)──► wrapping key for portable packages
//! ```

mod aead;
pub mod blob;
mod encoding;
pub mod error;
pub mod export;
pub mod kdf;
pub mod keys;
pub mod keystore;
pub mod manager;
pub mod material;

pub use blob::{decrypt, encrypt, EncryptedBlob, SealedField, SCHEMA_VERSION};
pub use error::{CryptoError, CryptoResult};
pub use export::{export_package, import_package, ExportPackage};
pub use kdf::{derive_master_key, KdfParams, MasterKey};
pub use keys::{generate_recording_key, rewrap_key, unwrap_key, wrap_key, RecordingKey, WRAPPED_KEY_SIZE};
pub use keystore::{MemoryKeyStore, SecureKeyStore};
pub use manager::{KeyManager, KeyRotation, RewrapOutcome};
pub use material::UserKeyMaterial;

/// Size of a master or recording key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a KDF salt
pub const SALT_SIZE: usize = 16;
