//! Session key derivation.
//!
//! Both sides of a session derive the same two keys from the ECDH shared
//! secret:
//!
//! - AEAD key: `SHA-1(shared_secret)[0..16]`, used with AES-128-GCM
//! - Auth key: `HMAC-SHA256(key = aead_key, "session info")`, used to tag the
//!   handshake response
//!
//! The SHA-1 truncation is fixed by the vehicle firmware and cannot change
//! without breaking interoperability.

use crate::keys::KeyMaterial;
use crate::{mac, Result};
use sha1::{Digest, Sha1};
use zeroize::Zeroizing;

/// AES-128 key length.
pub const AEAD_KEY_LEN: usize = 16;

/// HMAC-SHA256 key length for the handshake tag.
pub const AUTH_KEY_LEN: usize = 32;

/// Label mixed into the auth key.
pub const SESSION_INFO_LABEL: &[u8] = b"session info";

/// Keys shared with one peer for one handshake.
pub struct SessionKeys {
    /// AES-128-GCM key for command payloads.
    pub aead_key: Zeroizing<[u8; AEAD_KEY_LEN]>,
    /// HMAC key for the handshake response tag.
    pub auth_key: Zeroizing<[u8; AUTH_KEY_LEN]>,
    /// Raw ECDH output.
    pub shared_secret: Zeroizing<[u8; 32]>,
}

impl core::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SessionKeys([REDACTED])")
    }
}

/// Truncated SHA-1 of the shared secret.
pub fn aead_key_from_shared_secret(shared_secret: &[u8]) -> Zeroizing<[u8; AEAD_KEY_LEN]> {
    let digest = Sha1::digest(shared_secret);
    let mut key = Zeroizing::new([0u8; AEAD_KEY_LEN]);
    key.copy_from_slice(&digest[..AEAD_KEY_LEN]);
    key
}

/// HMAC-SHA256 over [`SESSION_INFO_LABEL`] keyed with the AEAD key.
pub fn auth_key_from_aead_key(
    aead_key: &[u8; AEAD_KEY_LEN],
) -> Result<Zeroizing<[u8; AUTH_KEY_LEN]>> {
    Ok(Zeroizing::new(mac::authenticate(aead_key, SESSION_INFO_LABEL)?))
}

/// Run ECDH against `peer_public` and derive both session keys.
///
/// # Errors
///
/// Fails if `local` has no private scalar or `peer_public` is not a valid
/// uncompressed P-256 point.
///
/// # Example
/// ```
/// use vcp_crypto::{kdf, KeyMaterial};
///
/// let ours = KeyMaterial::generate();
/// let theirs = KeyMaterial::generate();
///
/// let a = kdf::derive_session_keys(&ours, theirs.public_key()).unwrap();
/// let b = kdf::derive_session_keys(&theirs, ours.public_key()).unwrap();
/// assert_eq!(*a.aead_key, *b.aead_key);
/// ```
pub fn derive_session_keys(local: &KeyMaterial, peer_public: &[u8]) -> Result<SessionKeys> {
    let shared_secret = local.exchange(peer_public)?;
    let aead_key = aead_key_from_shared_secret(&*shared_secret);
    let auth_key = auth_key_from_aead_key(&aead_key)?;
    Ok(SessionKeys {
        aead_key,
        auth_key,
        shared_secret,
    })
}
