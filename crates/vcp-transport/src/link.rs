//! The short-range link the framer writes blocks to.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Characteristic write mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Write with response; each block is acknowledged.
    #[default]
    WithAck,
    /// Write without response.
    FireAndForget,
}

impl WriteMode {
    /// The other mode.
    pub fn other(self) -> Self {
        match self {
            Self::WithAck => Self::FireAndForget,
            Self::FireAndForget => Self::WithAck,
        }
    }
}

/// Block write failures reported by a link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Block longer than the link accepts.
    #[error("block too large for link")]
    Oversize,
    /// Link does not support the requested write mode.
    #[error("write mode not supported")]
    UnsupportedMode,
    /// Link is down.
    #[error("link disconnected")]
    Disconnected,
    /// Other failure.
    #[error("link I/O: {0}")]
    Io(String),
}

/// A block-oriented link with a small MTU.
///
/// Inbound data does not flow through this trait: the link owner pushes
/// received fragments into the `mpsc` channel handed to
/// [`crate::VehicleConnection::open`], and closes it on disconnect.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Negotiated MTU in bytes.
    fn mtu(&self) -> usize;

    /// Write one block, resolving when the link accepted it.
    async fn write_block(&self, block: &[u8], mode: WriteMode) -> Result<(), LinkError>;
}
