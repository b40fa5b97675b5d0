//! AES-128-GCM (NIST SP 800-38D) for command payloads.
//!
//! Nonces are 96-bit and random per message; the 16-byte tag is appended to
//! the ciphertext.

use crate::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

/// AES-128 key length.
pub const KEY_LEN: usize = 16;

/// GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// GCM tag length.
pub const TAG_LEN: usize = 16;

/// Handshake challenge length.
pub const CHALLENGE_LEN: usize = 16;

/// Fresh random nonce.
pub fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Fresh random handshake challenge.
pub fn random_challenge() -> [u8; CHALLENGE_LEN] {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut challenge);
    challenge
}

/// Encrypt with AES-128-GCM.
///
/// # Arguments
/// * `key` - 16-byte session AEAD key
/// * `nonce` - 12-byte nonce (unique per key)
/// * `plaintext` - Data to encrypt
/// * `aad` - Associated data bound into the tag
///
/// # Returns
/// Ciphertext with appended 16-byte tag.
///
/// # Example
/// ```
/// use vcp_crypto::aead;
///
/// let key = [0x42; 16];
/// let nonce = aead::random_nonce();
/// let sealed = aead::seal(&key, &nonce, b"unlock", b"aad").unwrap();
/// assert_eq!(sealed.len(), 6 + aead::TAG_LEN);
/// ```
pub fn seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key));
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::Encryption("AES-128-GCM encryption failed".into()))
}

/// Decrypt and verify with AES-128-GCM.
///
/// # Errors
/// Returns [`Error::Authentication`] if the tag does not verify or the
/// input is shorter than a tag.
pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext_and_tag: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if ciphertext_and_tag.len() < TAG_LEN {
        return Err(Error::Authentication("ciphertext shorter than tag".into()));
    }
    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext_and_tag,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| Error::Authentication("AES-128-GCM tag mismatch".into()))
}
