//! Cryptographic primitives for the vehicle command protocol.
//!
//! - Key containers (SEC1, PKCS #8, SPKI) in DER and PEM
//! - ECDH over P-256
//! - Session key derivation (truncated SHA-1, HMAC-SHA256)
//! - AES-128-GCM for command payloads
//! - HMAC-SHA256 tags for the handshake
//!
//! Secrets live in `Zeroizing` wrappers, tag comparisons are constant-time,
//! and nothing here logs key material.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod der;
pub mod error;
pub mod kdf;
pub mod kex;
pub mod keys;
pub mod mac;
pub mod pem;

pub use error::{Error, Result};
pub use kdf::SessionKeys;
pub use keys::{ContainerKind, KeyMaterial};
