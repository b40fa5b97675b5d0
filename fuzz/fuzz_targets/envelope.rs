#![no_main]

use libfuzzer_sys::fuzz_target;
use vcp_core::EnvelopeCodec;

fuzz_target!(|data: &[u8]| {
    let codec = EnvelopeCodec::default();
    if let Ok(envelope) = codec.decode(data) {
        let bytes = codec.encode(&envelope).expect("re-encode decoded envelope");
        assert_eq!(codec.decode(&bytes).expect("decode re-encoded envelope"), envelope);
    }
    let _ = codec.decode_session_info(data);
});
