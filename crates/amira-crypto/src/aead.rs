//! AES-256-GCM with detached tags, shared by key wrapping and the blob engine.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

/// Output of one sealing operation.
pub(crate) struct Sealed {
    pub iv: [u8; IV_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

/// Fill `buf` from the OS CSPRNG.
pub(crate) fn fill_random(buf: &mut [u8]) -> CryptoResult<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::EntropyUnavailable(e.to_string()))
}

/// Encrypt under `key` with a fresh random 96-bit IV.
pub(crate) fn seal(key: &[u8; KEY_SIZE], aad: &[u8], plaintext: &[u8]) -> CryptoResult<Sealed> {
    let cipher = Aes256Gcm::new(key.into());

    let mut iv = [0u8; IV_SIZE];
    fill_random(&mut iv)?;

    let mut buffer = plaintext.to_vec();
    let tag = match cipher.encrypt_in_place_detached(Nonce::from_slice(&iv), aad, &mut buffer) {
        Ok(tag) => tag,
        Err(_) => {
            buffer.zeroize();
            return Err(CryptoError::Encryption);
        }
    };

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());
    Ok(Sealed {
        iv,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Verify and decrypt. Returns `None` on any authentication failure; the
/// working buffer is wiped before returning so nothing partial escapes.
pub(crate) fn open(
    key: &[u8; KEY_SIZE],
    iv: &[u8; IV_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; TAG_SIZE],
) -> Option<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new(key.into());
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    match cipher.decrypt_in_place_detached(
        Nonce::from_slice(iv),
        aad,
        buffer.as_mut_slice(),
        Tag::from_slice(tag),
    ) {
        Ok(()) => Some(buffer),
        // Zeroizing wipes the buffer on drop
        Err(_) => None,
    }
}
