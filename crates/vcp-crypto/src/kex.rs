//! Key agreement.
//!
//! Only ECDH over P-256 is defined for the vehicle link.

pub mod ecdh_p256;

pub use self::ecdh_p256::{exchange, PUBLIC_KEY_LEN, SCALAR_LEN};
