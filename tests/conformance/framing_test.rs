//! Block framing and reassembly conformance.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use vcp_transport::framer::{self, FramerState, MIN_BLOCK_LENGTH};
use vcp_transport::mock::MockLink;
use vcp_transport::{Framer, FramerConfig, Reassembler};

const MTU: usize = 185;

fn message(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn reassemble(blocks: &[(Vec<u8>, vcp_transport::WriteMode)]) -> Vec<Vec<u8>> {
    let mut reassembler = Reassembler::new(1024, Duration::from_secs(1));
    let now = Instant::now();
    blocks.iter().flat_map(|(b, _)| reassembler.push(b, now)).collect()
}

#[tokio::test]
async fn test_roundtrip_at_every_block_length() {
    for len in [0, 1, 19, 20, 181, 182, 183, 500, 1024] {
        let body = message(len);
        let frame = framer::encode_frame(&body, 1024).unwrap();
        for block_length in MIN_BLOCK_LENGTH..=MTU - 3 {
            let link = MockLink::new(MTU);
            let config = FramerConfig {
                block_length: Some(block_length),
                ..FramerConfig::default()
            };
            let mut state = FramerState::new(MTU, &config);
            framer::write_message(&link, &mut state, &frame).await.unwrap();

            let writes = link.writes();
            assert_eq!(writes.len(), frame.len().div_ceil(block_length));
            assert_eq!(reassemble(&writes), vec![body.clone()]);
        }
    }
}

#[tokio::test]
async fn test_adapts_down_to_twenty_byte_writes() {
    let link = Arc::new(MockLink::new(MTU).with_max_write(20));
    let framer = Framer::spawn(Arc::clone(&link), &FramerConfig::default());
    let body = message(64);

    framer.send(&body).await.unwrap();

    assert_eq!(framer.block_length(), 20);
    let writes = link.writes();
    assert!(writes.len() >= 4);
    assert!(writes.iter().all(|(b, _)| b.len() <= 20));
    assert!(link.rejected() > 0);
    assert_eq!(reassemble(&writes), vec![body]);
}

#[tokio::test(start_paused = true)]
async fn test_stale_partial_discarded_after_silence() {
    let mut reassembler = Reassembler::from_config(&FramerConfig::default());
    let first = framer::encode_frame(&message(80), 1024).unwrap();
    let second = framer::encode_frame(b"after the gap", 1024).unwrap();

    assert!(reassembler.push(&first[..30], Instant::now()).is_empty());
    tokio::time::advance(Duration::from_millis(1001)).await;

    let out = reassembler.push(&second, Instant::now());
    assert_eq!(out, vec![b"after the gap".to_vec()]);
    assert_eq!(reassembler.buffered(), 0);
}

#[tokio::test]
async fn test_oversized_message_never_reaches_link() {
    let link = Arc::new(MockLink::new(MTU));
    let config = FramerConfig {
        max_message_size: 256,
        ..FramerConfig::default()
    };
    let framer = Framer::spawn(Arc::clone(&link), &config);
    assert!(framer.send(&message(257)).await.is_err());
    framer.send(&message(256)).await.unwrap();
    assert_eq!(reassemble(&link.writes()), vec![message(256)]);
}
