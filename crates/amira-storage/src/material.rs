//! On-disk user key material (salt + KDF parameters + key check).

use std::path::Path;

use amira_crypto::UserKeyMaterial;

use crate::durable::write_atomic;
use crate::error::{StorageError, StorageResult};

/// Load key material, or `None` if the account has not been initialised.
pub fn load_key_material(path: &Path) -> StorageResult<Option<UserKeyMaterial>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(UserKeyMaterial::from_bytes(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Save key material atomically.
///
/// The salt is fixed for the life of an account: replacing existing material
/// that carries a different salt is refused.
pub fn save_key_material(path: &Path, material: &UserKeyMaterial) -> StorageResult<()> {
    if let Some(existing) = load_key_material(path)? {
        if existing.salt != material.salt {
            return Err(StorageError::SaltChanged);
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_atomic(path, &material.to_bytes()?)?;
    tracing::debug!(path = %path.display(), "key material saved");
    Ok(())
}
