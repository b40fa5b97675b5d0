//! HMAC-SHA256 and SHA-256 helpers.

use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 output length.
pub const TAG_LEN: usize = 32;

/// HMAC-SHA256 of `message` under `key`.
pub fn authenticate(key: &[u8], message: &[u8]) -> Result<[u8; TAG_LEN]> {
    authenticate_parts(key, &[message])
}

/// HMAC-SHA256 over the concatenation of `parts`.
pub fn authenticate_parts(key: &[u8], parts: &[&[u8]]) -> Result<[u8; TAG_LEN]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| Error::InvalidLength {
            expected: TAG_LEN,
            actual: key.len(),
        })?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time tag check.
pub fn verify(key: &[u8], message: &[u8], tag: &[u8]) -> bool {
    match authenticate(key, message) {
        Ok(expected) => tag.len() == TAG_LEN && bool::from(expected[..].ct_eq(tag)),
        Err(_) => false,
    }
}

/// SHA-256 digest.
pub fn digest(message: &[u8]) -> [u8; 32] {
    Sha256::digest(message).into()
}
