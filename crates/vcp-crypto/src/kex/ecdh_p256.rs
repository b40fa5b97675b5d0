//! ECDH over NIST P-256 (secp256r1).
//!
//! The vehicle controller only speaks P-256, so this is the sole key
//! agreement in the crate. Public points travel in uncompressed SEC1 form
//! (`0x04 ‖ x ‖ y`, 65 bytes); compressed points are rejected.
//!
//! # Security
//!
//! - `SecretKey` zeroizes itself on drop; shared secrets are returned in
//!   `Zeroizing` wrappers.
//! - Peer points are validated on the curve before use.

use crate::{Error, Result};
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use zeroize::Zeroizing;

/// Uncompressed public point length.
pub const PUBLIC_KEY_LEN: usize = 65;

/// Private scalar length.
pub const SCALAR_LEN: usize = 32;

/// Uncompressed-point tag byte.
pub const UNCOMPRESSED_TAG: u8 = 0x04;

/// Generate a fresh private scalar from the OS RNG.
pub fn generate_secret() -> SecretKey {
    SecretKey::random(&mut rand::rngs::OsRng)
}

/// Import a 32-byte big-endian private scalar.
///
/// # Errors
///
/// Returns an error for wrong lengths, zero, or values not below the group order.
pub fn secret_from_scalar(scalar: &[u8]) -> Result<SecretKey> {
    if scalar.len() != SCALAR_LEN {
        return Err(Error::InvalidLength {
            expected: SCALAR_LEN,
            actual: scalar.len(),
        });
    }
    SecretKey::from_slice(scalar)
        .map_err(|_| Error::InvalidPrivateKey("scalar out of range for P-256".into()))
}

/// Encode a public key as an uncompressed 65-byte point.
pub fn encode_public(public: &PublicKey) -> [u8; PUBLIC_KEY_LEN] {
    let point = public.to_encoded_point(false);
    let mut out = [0u8; PUBLIC_KEY_LEN];
    out.copy_from_slice(point.as_bytes());
    out
}

/// Parse and validate an uncompressed 65-byte point.
///
/// # Errors
///
/// Returns an error if the length is wrong, the tag is not `0x04`, or the
/// point is not on the curve.
pub fn decode_public(bytes: &[u8]) -> Result<PublicKey> {
    if bytes.len() != PUBLIC_KEY_LEN {
        return Err(Error::InvalidLength {
            expected: PUBLIC_KEY_LEN,
            actual: bytes.len(),
        });
    }
    if bytes[0] != UNCOMPRESSED_TAG {
        return Err(Error::InvalidPublicKey(
            "P-256 public key must use uncompressed format (0x04 prefix)".into(),
        ));
    }
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| Error::InvalidPublicKey("point is not on P-256".into()))
}

/// Compute the 32-byte ECDH shared secret (x-coordinate of `d · Q`).
///
/// # Errors
///
/// Returns an error if `peer_public` is not a valid uncompressed point.
pub fn exchange(secret: &SecretKey, peer_public: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let peer = decode_public(peer_public)?;

    let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());

    let mut result = Zeroizing::new([0u8; 32]);
    result.copy_from_slice(shared.raw_secret_bytes().as_slice());
    Ok(result)
}
