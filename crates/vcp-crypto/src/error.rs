//! Error types for key handling and cryptographic operations.

use thiserror::Error;

/// Result type alias for cryptographic operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Cryptographic operation errors.
///
/// Messages never include key bytes; at most they name the offending
/// container element or length.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed DER element (truncated, bad length, wrong tag).
    #[error("Invalid DER: {0}")]
    InvalidDer(String),

    /// Malformed PEM armour.
    #[error("Invalid PEM: {0}")]
    InvalidPem(String),

    /// Container names an algorithm or curve other than P-256.
    #[error("Unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Operation needs a private scalar but the key is public-only.
    #[error("Key material has no private component")]
    MissingPrivateKey,

    /// Tag or signature did not verify.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// AEAD encryption failed.
    #[error("AEAD encryption failed: {0}")]
    Encryption(String),

    /// Invalid input length.
    #[error("Invalid input length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length received in bytes.
        actual: usize,
    },

    /// Invalid private key.
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Invalid public key.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
}

impl Error {
    /// True for tag/signature mismatches.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// True for malformed input: containers, armour, lengths or key encodings.
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            Self::InvalidDer(_)
                | Self::InvalidPem(_)
                | Self::UnsupportedAlgorithm(_)
                | Self::InvalidLength { .. }
                | Self::InvalidPrivateKey(_)
                | Self::InvalidPublicKey(_)
        )
    }
}
