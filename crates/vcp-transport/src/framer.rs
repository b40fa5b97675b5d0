//! Outbound block framer.
//!
//! Each message is prefixed with its length as a big-endian `u16` and split
//! into blocks of the current block length. The framer adapts to the link:
//!
//! - `Oversize` halves the block length (floor [`MIN_BLOCK_LENGTH`]) and
//!   restarts the message from its first block.
//! - `UnsupportedMode` switches write mode once and restarts.
//!
//! Adapted values persist for later messages. Messages are written one at a
//! time by a single writer task, in enqueue order.

use crate::error::{Error, Result};
use crate::link::{Link, LinkError, WriteMode};
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Length prefix size.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Smallest block length the framer will adapt down to.
pub const MIN_BLOCK_LENGTH: usize = 20;

/// Per-write link overhead subtracted from the MTU.
pub const LINK_OVERHEAD: usize = 3;

/// Default message ceiling, shared with the reassembler.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Framer and reassembler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FramerConfig {
    /// Initial block length; defaults to MTU minus link overhead.
    pub block_length: Option<usize>,
    /// Largest message accepted in either direction.
    pub max_message_size: usize,
    /// Initial write mode.
    pub write_mode: WriteMode,
    /// Outbound queue depth.
    pub queue_capacity: usize,
    /// Inbound silence after which a partial message is discarded.
    pub inbound_silence_ms: u64,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            block_length: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            write_mode: WriteMode::WithAck,
            queue_capacity: 16,
            inbound_silence_ms: 1000,
        }
    }
}

impl FramerConfig {
    /// Inbound silence threshold.
    pub fn inbound_silence(&self) -> Duration {
        Duration::from_millis(self.inbound_silence_ms)
    }
}

/// Largest block length usable on a link with `mtu`.
pub fn block_ceiling(mtu: usize) -> usize {
    mtu.saturating_sub(LINK_OVERHEAD).max(MIN_BLOCK_LENGTH)
}

/// Prefix `message` with its length.
///
/// # Errors
///
/// Returns `MessageTooLarge` if the message exceeds `max` or the 16-bit
/// prefix.
pub fn encode_frame(message: &[u8], max: usize) -> Result<Vec<u8>> {
    let limit = max.min(u16::MAX as usize);
    if message.len() > limit {
        return Err(Error::MessageTooLarge {
            size: message.len(),
            max: limit,
        });
    }
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + message.len());
    frame.extend_from_slice(&(message.len() as u16).to_be_bytes());
    frame.extend_from_slice(message);
    Ok(frame)
}

/// Adaptive link parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerState {
    block_length: usize,
    ceiling: usize,
    write_mode: WriteMode,
}

impl FramerState {
    /// Initial state for a link with `mtu`.
    pub fn new(mtu: usize, config: &FramerConfig) -> Self {
        let ceiling = block_ceiling(mtu);
        Self {
            block_length: config
                .block_length
                .unwrap_or(ceiling)
                .clamp(MIN_BLOCK_LENGTH, ceiling),
            ceiling,
            write_mode: config.write_mode,
        }
    }

    /// Current block length.
    pub fn block_length(&self) -> usize {
        self.block_length
    }

    /// Current write mode.
    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// MTU renegotiated. A larger MTU resets the block length to the new
    /// ceiling; a smaller one clamps it.
    pub fn set_mtu(&mut self, mtu: usize) {
        let ceiling = block_ceiling(mtu);
        self.block_length = if ceiling > self.ceiling {
            ceiling
        } else {
            self.block_length.min(ceiling)
        };
        self.ceiling = ceiling;
    }

    /// Fold in what one write learned. Writes only ever shrink the block
    /// length; a larger MTU applied meanwhile discards that.
    fn merge(&mut self, before: &FramerState, after: &FramerState) {
        self.write_mode = after.write_mode;
        if self.ceiling <= before.ceiling {
            self.block_length = self.block_length.min(after.block_length);
        }
    }

    fn shrink(&mut self) -> bool {
        if self.block_length <= MIN_BLOCK_LENGTH {
            return false;
        }
        self.block_length = (self.block_length / 2).max(MIN_BLOCK_LENGTH);
        true
    }
}

/// Write one frame to `link`, adapting `state` as the link pushes back.
///
/// # Errors
///
/// - `BlockSizeExhausted` when the link rejects blocks at the minimum length
/// - `WriteModeExhausted` when the link rejects both write modes
/// - `Disconnected` / `Io` on link failure
pub async fn write_message<L: Link + ?Sized>(
    link: &L,
    state: &mut FramerState,
    frame: &[u8],
) -> Result<()> {
    let mut mode_switched = false;
    'message: loop {
        for block in frame.chunks(state.block_length) {
            match link.write_block(block, state.write_mode).await {
                Ok(()) => {}
                Err(LinkError::Oversize) => {
                    let rejected = state.block_length;
                    if !state.shrink() {
                        return Err(Error::BlockSizeExhausted(rejected));
                    }
                    warn!(rejected, block_length = state.block_length, "link rejected block size");
                    continue 'message;
                }
                Err(LinkError::UnsupportedMode) => {
                    if mode_switched {
                        return Err(Error::WriteModeExhausted);
                    }
                    mode_switched = true;
                    state.write_mode = state.write_mode.other();
                    warn!(mode = ?state.write_mode, "switching write mode");
                    continue 'message;
                }
                Err(LinkError::Disconnected) => return Err(Error::Disconnected),
                Err(LinkError::Io(e)) => return Err(Error::Io(e)),
            }
        }
        return Ok(());
    }
}

struct Job {
    frame: Vec<u8>,
    done: oneshot::Sender<Result<()>>,
}

/// Completion handle for an enqueued message.
#[derive(Debug)]
pub struct WriteTicket(oneshot::Receiver<Result<()>>);

impl WriteTicket {
    /// Resolve once every block of the message was accepted by the link.
    pub async fn wait(self) -> Result<()> {
        self.0.await.unwrap_or(Err(Error::Disconnected))
    }
}

/// Framer handle. Dropping it stops the writer task.
pub struct Framer {
    jobs: mpsc::Sender<Job>,
    state: Arc<Mutex<FramerState>>,
    max_message_size: usize,
    writer: JoinHandle<()>,
}

impl Framer {
    /// Start the writer task for `link`.
    pub fn spawn<L: Link>(link: Arc<L>, config: &FramerConfig) -> Self {
        let state = Arc::new(Mutex::new(FramerState::new(link.mtu(), config)));
        let (jobs, mut rx) = mpsc::channel::<Job>(config.queue_capacity.max(1));

        let writer = tokio::spawn({
            let state = Arc::clone(&state);
            async move {
                while let Some(job) = rx.recv().await {
                    let before = *state.lock().unwrap_or_else(PoisonError::into_inner);
                    let mut local = before;
                    let result = write_message(link.as_ref(), &mut local, &job.frame).await;
                    state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .merge(&before, &local);
                    if let Err(e) = &result {
                        debug!(error = %e, "frame write failed");
                    }
                    // Receiver may have given up waiting.
                    let _ = job.done.send(result);
                }
            }
        });

        Self {
            jobs,
            state,
            max_message_size: config.max_message_size,
            writer,
        }
    }

    /// Queue `message` behind previously enqueued ones.
    ///
    /// # Errors
    ///
    /// `MessageTooLarge` before anything is queued, `Disconnected` if the
    /// writer is gone.
    pub async fn enqueue(&self, message: &[u8]) -> Result<WriteTicket> {
        let frame = encode_frame(message, self.max_message_size)?;
        let (done, rx) = oneshot::channel();
        self.jobs
            .send(Job { frame, done })
            .await
            .map_err(|_| Error::Disconnected)?;
        Ok(WriteTicket(rx))
    }

    /// Enqueue and wait for the write to complete.
    pub async fn send(&self, message: &[u8]) -> Result<()> {
        self.enqueue(message).await?.wait().await
    }

    /// Current block length.
    pub fn block_length(&self) -> usize {
        self.snapshot().block_length
    }

    /// Current write mode.
    pub fn write_mode(&self) -> WriteMode {
        self.snapshot().write_mode
    }

    /// Apply a renegotiated MTU.
    pub fn set_mtu(&self, mtu: usize) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_mtu(mtu);
    }

    /// Stop the writer; queued messages fail with `Disconnected`.
    pub fn shutdown(&self) {
        self.writer.abort();
    }

    fn snapshot(&self) -> FramerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Framer {
    fn drop(&mut self) {
        self.writer.abort();
    }
}
