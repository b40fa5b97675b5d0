#![no_main]

use libfuzzer_sys::fuzz_target;
use std::time::Duration;
use tokio::time::Instant;
use vcp_transport::Reassembler;

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let mut reassembler = Reassembler::new(1024, Duration::from_secs(1));
    let now = Instant::now();
    for fragment in rest.chunks(usize::from(split).max(1)) {
        for message in reassembler.push(fragment, now) {
            assert!(message.len() <= 1024);
        }
    }
    assert!(reassembler.buffered() < 1024 + 2);
});
