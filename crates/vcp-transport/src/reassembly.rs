//! Inbound fragment reassembly.

use crate::framer::{FramerConfig, LENGTH_PREFIX_LEN};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Rebuilds length-prefixed messages from link fragments.
///
/// Fragments may split a message anywhere, including inside the prefix, and
/// one fragment may complete several messages. A gap longer than the silence
/// threshold discards whatever partial message is buffered.
#[derive(Debug)]
pub struct Reassembler {
    buffer: Vec<u8>,
    last_fragment: Option<Instant>,
    max_message_size: usize,
    silence: Duration,
}

impl Reassembler {
    /// New reassembler.
    pub fn new(max_message_size: usize, silence: Duration) -> Self {
        Self {
            buffer: Vec::new(),
            last_fragment: None,
            max_message_size,
            silence,
        }
    }

    /// From framer configuration.
    pub fn from_config(config: &FramerConfig) -> Self {
        Self::new(config.max_message_size, config.inbound_silence())
    }

    /// Bytes of an incomplete message currently held.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial message.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feed one fragment received at `now`; returns completed messages in
    /// arrival order.
    pub fn push(&mut self, fragment: &[u8], now: Instant) -> Vec<Vec<u8>> {
        if let Some(last) = self.last_fragment {
            if !self.buffer.is_empty() && now.saturating_duration_since(last) > self.silence {
                debug!(discarded = self.buffer.len(), "stale partial message");
                self.buffer.clear();
            }
        }
        self.last_fragment = Some(now);
        self.buffer.extend_from_slice(fragment);

        let mut messages = Vec::new();
        while self.buffer.len() >= LENGTH_PREFIX_LEN {
            let len = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
            if len > self.max_message_size {
                warn!(len, max = self.max_message_size, "declared length over limit, resyncing");
                self.buffer.clear();
                break;
            }
            let end = LENGTH_PREFIX_LEN + len;
            if self.buffer.len() < end {
                break;
            }
            messages.push(self.buffer[LENGTH_PREFIX_LEN..end].to_vec());
            self.buffer.drain(..end);
        }
        messages
    }
}

/// Run a reassembler between a fragment channel and a message channel.
///
/// The task ends when either side closes; dropping `messages` then signals
/// disconnect downstream.
pub fn spawn_inbound(
    mut fragments: mpsc::Receiver<Vec<u8>>,
    messages: mpsc::Sender<Vec<u8>>,
    config: &FramerConfig,
) -> JoinHandle<()> {
    let mut reassembler = Reassembler::from_config(config);
    tokio::spawn(async move {
        while let Some(fragment) = fragments.recv().await {
            for message in reassembler.push(&fragment, Instant::now()) {
                if messages.send(message).await.is_err() {
                    return;
                }
            }
        }
        debug!("inbound fragment stream closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn frame(body: &[u8]) -> Vec<u8> {
        crate::framer::encode_frame(body, 1024).unwrap()
    }

    fn reassembler() -> Reassembler {
        Reassembler::new(1024, Duration::from_secs(1))
    }

    #[test]
    fn test_split_inside_prefix() {
        let mut r = reassembler();
        let now = Instant::now();
        let f = frame(b"hello");
        assert!(r.push(&f[..1], now).is_empty());
        assert!(r.push(&f[1..4], now).is_empty());
        assert_eq!(r.push(&f[4..], now), vec![b"hello".to_vec()]);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn test_several_messages_in_one_fragment() {
        let mut r = reassembler();
        let mut data = frame(b"one");
        data.extend(frame(b""));
        data.extend(frame(b"three"));
        data.extend(&frame(b"four")[..3]);
        let out = r.push(&data, Instant::now());
        assert_eq!(out, vec![b"one".to_vec(), Vec::new(), b"three".to_vec()]);
        assert_eq!(r.buffered(), 3);
    }

    #[test]
    fn test_oversized_declaration_resyncs() {
        let mut r = Reassembler::new(16, Duration::from_secs(1));
        let now = Instant::now();
        assert!(r.push(&[0x00, 0x20, 1, 2, 3], now).is_empty());
        assert_eq!(r.buffered(), 0);
        assert_eq!(r.push(&frame(b"ok"), now), vec![b"ok".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_partial_discarded() {
        let mut r = reassembler();
        let stale = frame(&[0xAB; 40]);
        assert!(r.push(&stale[..10], Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(1500)).await;

        let fresh = frame(b"fresh");
        assert_eq!(r.push(&fresh, Instant::now()), vec![b"fresh".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_under_threshold_keeps_partial() {
        let mut r = reassembler();
        let f = frame(&[7; 30]);
        r.push(&f[..10], Instant::now());
        tokio::time::advance(Duration::from_millis(900)).await;
        assert_eq!(r.push(&f[10..], Instant::now()), vec![vec![7; 30]]);
    }

    proptest! {
        #[test]
        fn prop_any_split_reassembles(
            bodies in vec(vec(any::<u8>(), 0..200), 1..5),
            cuts in vec(1usize..64, 1..40),
        ) {
            let stream: Vec<u8> = bodies.iter().flat_map(|b| frame(b)).collect();
            let mut r = reassembler();
            let now = Instant::now();
            let mut out = Vec::new();
            let mut rest = &stream[..];
            for cut in cuts.iter().cycle() {
                if rest.is_empty() {
                    break;
                }
                let (head, tail) = rest.split_at((*cut).min(rest.len()));
                out.extend(r.push(head, now));
                rest = tail;
            }
            prop_assert_eq!(out, bodies);
            prop_assert_eq!(r.buffered(), 0);
        }
    }

    #[tokio::test]
    async fn test_inbound_task() {
        let (frag_tx, frag_rx) = mpsc::channel(8);
        let (msg_tx, mut msg_rx) = mpsc::channel(8);
        let task = spawn_inbound(frag_rx, msg_tx, &FramerConfig::default());

        let f = frame(b"routed");
        for chunk in f.chunks(3) {
            frag_tx.send(chunk.to_vec()).await.unwrap();
        }
        assert_eq!(msg_rx.recv().await.unwrap(), b"routed".to_vec());

        drop(frag_tx);
        task.await.unwrap();
        assert!(msg_rx.recv().await.is_none());
    }
}
