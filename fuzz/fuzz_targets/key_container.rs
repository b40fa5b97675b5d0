#![no_main]

use libfuzzer_sys::fuzz_target;
use vcp_crypto::keys;

fuzz_target!(|data: &[u8]| {
    // Any accepted container must re-encode and decode to the same key.
    if let Ok(key) = keys::decode(data) {
        let kind = if key.has_private() {
            keys::ContainerKind::Sec1
        } else {
            keys::ContainerKind::Spki
        };
        let der = keys::encode_der(&key, kind).expect("re-encode accepted key");
        let again = keys::decode_der(&der, kind).expect("decode re-encoded key");
        assert_eq!(again, key);
    }
});
