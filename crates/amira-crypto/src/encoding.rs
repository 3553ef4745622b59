//! Base64 helpers for JSON headers and packages.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{CryptoError, CryptoResult};

pub(crate) fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub(crate) fn base64_decode(s: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(s)
        .map_err(|e| CryptoError::MalformedBlob(format!("base64 decode: {e}")))
}

/// Decode into a fixed-size array, rejecting any other length.
pub(crate) fn base64_decode_array<const N: usize>(what: &'static str, s: &str) -> CryptoResult<[u8; N]> {
    let bytes = base64_decode(s)?;
    crate::error::expect_len(what, N, bytes.len())?;
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// `#[serde(with = "b64")]` for byte vectors.
pub(crate) mod b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::base64_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        super::base64_decode(&s).map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "b64_array")]` for fixed-size arrays.
pub(crate) mod b64_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(bytes: &[u8; N], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::base64_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(d: D) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(d)?;
        super::base64_decode_array("base64 field", &s).map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "b64_array_opt")]` for optional fixed-size arrays.
pub(crate) mod b64_array_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &Option<[u8; N]>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&super::base64_encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        d: D,
    ) -> Result<Option<[u8; N]>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| super::base64_decode_array("base64 field", &s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
