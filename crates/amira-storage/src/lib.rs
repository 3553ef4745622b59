//! amira-storage: local encrypted blob store, platform keychain, remote recordings bucket

pub mod blob_store;
pub mod durable;
pub mod error;
pub mod keychain;
pub mod material;
pub mod remote;

pub use blob_store::{validate_blob_id, LocalBlobStore};
pub use durable::{secure_erase, write_atomic};
pub use error::{StorageError, StorageResult};
pub use keychain::KeyringStore;
pub use material::{load_key_material, save_key_material};
pub use remote::{
    blob_object, check_endpoint, check_health, memory_remote, open_remote, record_object,
    remote_root, RemoteCredentials,
};
