//! Transport layer errors.

use thiserror::Error;
use vcp_core::{Domain, ErrorKind, Fault};

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Link kept rejecting blocks at the minimum block length.
    #[error("Link rejected {0}-byte blocks at the minimum block length")]
    BlockSizeExhausted(usize),

    /// Link rejected both write modes.
    #[error("Link supports neither write mode")]
    WriteModeExhausted,

    /// Message exceeds the framing ceiling.
    #[error("Message of {size} bytes exceeds the {max}-byte limit")]
    MessageTooLarge {
        /// Message size.
        size: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// Link or connection closed.
    #[error("Disconnected")]
    Disconnected,

    /// A bounded wait expired.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Link I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Connection was not opened for this domain.
    #[error("No session for domain {0:?}")]
    UnknownDomain(Domain),

    /// Protocol error from core.
    #[error("Protocol error: {0}")]
    Protocol(#[from] vcp_core::Error),
}

impl From<vcp_crypto::Error> for Error {
    fn from(e: vcp_crypto::Error) -> Self {
        Self::Protocol(e.into())
    }
}

impl Error {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MessageTooLarge { .. } => ErrorKind::Format,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::UnknownDomain(_) => ErrorKind::State,
            Self::BlockSizeExhausted(_)
            | Self::WriteModeExhausted
            | Self::Disconnected
            | Self::Io(_) => ErrorKind::Transport,
            Self::Protocol(e) => e.kind(),
        }
    }

    /// True if repeating the handshake may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Protocol(vcp_core::Error::Rejected(fault)) => {
                matches!(fault, Fault::Busy | Fault::Timeout) || fault.requires_resync()
            }
            _ => matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Auth),
        }
    }
}
