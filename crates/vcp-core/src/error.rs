//! Error types for envelope and session operations.

use crate::fault::Fault;
use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Where in the protocol an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Schema loading and validation.
    Schema,
    /// Routable envelope encode/decode.
    Envelope,
    /// Session info encode/decode.
    SessionInfo,
    /// Handshake request or response processing.
    Handshake,
    /// Outbound command sealing.
    Command,
    /// Inbound response opening.
    Response,
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Schema => "schema",
            Self::Envelope => "envelope",
            Self::SessionInfo => "session info",
            Self::Handshake => "handshake",
            Self::Command => "command",
            Self::Response => "response",
        })
    }
}

/// Coarse classification used by callers to pick a recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; the operation fails, the session is unaffected.
    Format,
    /// Authentication failed; the session must handshake again.
    Auth,
    /// A bounded wait expired.
    Timeout,
    /// A response counter was already seen; only that message is dropped.
    Replay,
    /// The controller refused the request.
    Rejected,
    /// The call is not valid in the current session state.
    State,
    /// The link failed or closed.
    Transport,
}

/// Protocol operation errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed envelope, session info or schema.
    #[error("Malformed {stage}: {reason}")]
    Format {
        /// Stage that rejected the input.
        stage: Stage,
        /// Offending field or structural problem.
        reason: String,
    },

    /// Tag or AEAD verification failed.
    #[error("Authentication failed during {0}")]
    Authentication(Stage),

    /// No handshake response arrived in time.
    #[error("Handshake timeout")]
    HandshakeTimeout,

    /// Response counter not above the last accepted one.
    #[error("Replayed response: counter {counter} <= last accepted {last}")]
    Replay {
        /// Counter carried by the response.
        counter: u32,
        /// Highest counter accepted so far.
        last: u32,
    },

    /// Controller switched epoch; the session needs a new handshake.
    #[error("Controller epoch changed")]
    EpochChanged,

    /// Controller answered with a fault.
    #[error("Rejected by controller: {0}")]
    Rejected(Fault),

    /// Controller does not know the local public key.
    #[error("Local key is not paired with the controller")]
    KeyNotPaired,

    /// Session is not established.
    #[error("Handshake required")]
    HandshakeRequired,

    /// Send counter reached its maximum for this epoch.
    #[error("Command counter exhausted")]
    CounterExhausted,

    /// Invalid state transition.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] vcp_crypto::Error),
}

impl Error {
    pub(crate) fn format(stage: Stage, reason: impl Into<String>) -> Self {
        Self::Format {
            stage,
            reason: reason.into(),
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Format { .. } => ErrorKind::Format,
            Self::Authentication(_) | Self::EpochChanged => ErrorKind::Auth,
            Self::HandshakeTimeout => ErrorKind::Timeout,
            Self::Replay { .. } => ErrorKind::Replay,
            Self::Rejected(_) | Self::KeyNotPaired => ErrorKind::Rejected,
            Self::HandshakeRequired | Self::CounterExhausted | Self::InvalidState(_) => {
                ErrorKind::State
            }
            Self::Crypto(e) if e.is_authentication() => ErrorKind::Auth,
            Self::Crypto(e) if e.is_format() => ErrorKind::Format,
            Self::Crypto(_) => ErrorKind::State,
        }
    }

    /// True if the session was torn down and must handshake again.
    pub fn is_session_fatal(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }
}
