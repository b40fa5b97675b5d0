//! Envelope codec conformance: schema-driven layouts and hostile input.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use vcp_core::envelope::{Destination, SignatureData};
use vcp_core::schema::ROUTABLE_MESSAGE;
use vcp_core::{
    metadata, Domain, Envelope, EnvelopeCodec, ErrorKind, Schema, Session, SessionConfig,
    SessionInfo, State,
};
use vcp_crypto::{kdf, mac, KeyMaterial};

// Field 6 (to_destination) holding domain 2, then field 51 (uuid).
const HANDCRAFTED: &str = "320208029a031011111111111111111111111111111111";

#[test]
fn test_decodes_handcrafted_bytes() {
    let envelope = EnvelopeCodec::default()
        .decode(&hex::decode(HANDCRAFTED).unwrap())
        .unwrap();
    assert_eq!(envelope.to, Some(Destination::Domain(Domain::VehicleSecurity)));
    assert_eq!(envelope.uuid, Some([0x11; 16]));
}

#[test]
fn test_skips_fields_from_newer_firmware() {
    let mut bytes = hex::decode(HANDCRAFTED).unwrap();
    // field 99, varint 1; field 98, three bytes
    bytes.extend_from_slice(&[0x98, 0x06, 0x01, 0x92, 0x06, 0x03, 0xAA, 0xBB, 0xCC]);
    let envelope = EnvelopeCodec::default().decode(&bytes).unwrap();
    assert_eq!(envelope.uuid, Some([0x11; 16]));
}

#[test]
fn test_rejects_duplicate_fields() {
    let mut bytes = hex::decode(HANDCRAFTED).unwrap();
    bytes.extend_from_slice(&hex::decode("32020803").unwrap());
    let err = EnvelopeCodec::default().decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

fn renumbered() -> Schema {
    let json = Schema::routable().to_json().unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
    for field in value["messages"][ROUTABLE_MESSAGE]["fields"]
        .as_array_mut()
        .unwrap()
    {
        let number = field["number"].as_u64().unwrap();
        field["number"] = (number + 100).into();
    }
    Schema::from_json(&value.to_string()).unwrap()
}

#[test]
fn test_renumbered_schema_is_incompatible_with_builtin() {
    let custom = EnvelopeCodec::new(renumbered()).unwrap();
    let envelope = Envelope {
        to: Some(Destination::Domain(Domain::Infotainment)),
        uuid: Some([0x22; 16]),
        ..Envelope::default()
    };
    let bytes = custom.encode(&envelope).unwrap();
    assert_eq!(custom.decode(&bytes).unwrap(), envelope);
    // Every field is unknown to the built-in layout.
    assert_eq!(EnvelopeCodec::default().decode(&bytes).unwrap(), Envelope::default());
}

#[test]
fn test_handshake_over_custom_schema() {
    let codec = Arc::new(EnvelopeCodec::new(renumbered()).unwrap());
    let client = Arc::new(KeyMaterial::generate());
    let vehicle = KeyMaterial::generate();
    let config = SessionConfig {
        verifier_name: "VIN".to_string(),
        ..SessionConfig::default()
    };
    let mut session = Session::new(
        Domain::Infotainment,
        client,
        [0x01; 16],
        Arc::clone(&codec),
        config,
    );
    session.connect().unwrap();

    let request = session.start_handshake().unwrap();
    let request = codec.decode(&codec.encode(&request).unwrap()).unwrap();
    let hs = request.handshake_request.unwrap();

    let info = codec
        .encode_session_info(&SessionInfo {
            counter: 41,
            public_key: *vehicle.public_key(),
            epoch: [0x33; 16],
            clock_time: 5,
            status: Default::default(),
        })
        .unwrap();
    let keys = kdf::derive_session_keys(&vehicle, &hs.public_key).unwrap();
    let input =
        metadata::handshake_tag_input(Domain::Infotainment, "VIN", &hs.challenge, &info).unwrap();
    let reply = Envelope {
        request_uuid: Some(hs.challenge),
        session_info: Some(info),
        signature: Some(SignatureData {
            session_info_tag: Some(mac::authenticate(&*keys.auth_key, &input).unwrap()),
            ..SignatureData::default()
        }),
        ..Envelope::default()
    };
    let reply = codec.decode(&codec.encode(&reply).unwrap()).unwrap();

    session.process_handshake_response(&reply, Instant::now()).unwrap();
    assert_eq!(session.state(), State::Established);
    assert_eq!(session.context().unwrap().counter(), 41);
}

proptest! {
    #[test]
    fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let codec = EnvelopeCodec::default();
        let _ = codec.decode(&bytes);
        let _ = codec.decode_session_info(&bytes);
    }

    #[test]
    fn prop_decoded_envelopes_reencode(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        let codec = EnvelopeCodec::default();
        if let Ok(envelope) = codec.decode(&bytes) {
            let again = codec.decode(&codec.encode(&envelope).unwrap()).unwrap();
            prop_assert_eq!(again, envelope);
        }
    }
}
