//! Handshake vector: fixed keys, epoch and challenge through tag
//! verification and session establishment.

use std::sync::Arc;
use std::time::Instant;
use vcp_core::envelope::{SignatureData, UUID_LEN};
use vcp_core::{metadata, Domain, Envelope, EnvelopeCodec, ErrorKind, Session, SessionConfig, State};
use vcp_crypto::{aead, kdf, mac, KeyMaterial};

const SCALAR: &str = "c9afa9d845ba75166b5c215767b1d6934e50c3db36e89b127b8a622b120f6721";
const VEHICLE_PUBLIC: &str = "04ead218590119e8876b29146ff89ca61770c4edbbf97d38ce385ed281d8a6b23028af61281fd35e2fa7002523acc85a429cb06ee6648325389f59edfce1405141";
const EPOCH: &str = "4c2b9e0f1d3a5b7c8e9fa0b1c2d3e4f5";
const VERIFIER: &str = "VCPTEST0000000001";
const AEAD_KEY: &str = "26808bd01de8021d96070b550dab61ec";
const AUTH_KEY: &str = "2f3706ab488949952b305b06b92a37b9dcdee0659dd347a46e53e6af663fa7e2";
// counter 7, vehicle key, epoch, clock 1000, status ok
const SESSION_INFO: &str = "0807124104ead218590119e8876b29146ff89ca61770c4edbbf97d38ce385ed281d8a6b23028af61281fd35e2fa7002523acc85a429cb06ee6648325389f59edfce14051411a104c2b9e0f1d3a5b7c8e9fa0b1c2d3e4f520e8072800";
const TAG: &str = "36fb52ff67430d2bba203c71ceb8f6417bd3bfb033d876dc7b4572ab87a8be5b";

fn challenge() -> [u8; UUID_LEN] {
    core::array::from_fn(|i| 0xA0 + i as u8)
}

fn client() -> Arc<KeyMaterial> {
    Arc::new(KeyMaterial::from_scalar(&hex::decode(SCALAR).unwrap()).unwrap())
}

fn auth_key() -> Vec<u8> {
    hex::decode(AUTH_KEY).unwrap()
}

#[test]
fn test_session_info_encoding() {
    let codec = EnvelopeCodec::default();
    let info = codec.decode_session_info(&hex::decode(SESSION_INFO).unwrap()).unwrap();
    assert_eq!(info.counter, 7);
    assert_eq!(hex::encode(info.epoch), EPOCH);
    assert_eq!(info.clock_time, 1000);
    assert_eq!(hex::encode(codec.encode_session_info(&info).unwrap()), SESSION_INFO);
}

#[test]
fn test_keys_from_vector() {
    let keys = kdf::derive_session_keys(&client(), &hex::decode(VEHICLE_PUBLIC).unwrap()).unwrap();
    assert_eq!(hex::encode(*keys.aead_key), AEAD_KEY);
    assert_eq!(hex::encode(*keys.auth_key), AUTH_KEY);
}

#[test]
fn test_tag_vector() {
    let input = metadata::handshake_tag_input(
        Domain::VehicleSecurity,
        VERIFIER,
        &challenge(),
        &hex::decode(SESSION_INFO).unwrap(),
    )
    .unwrap();
    let tag = mac::authenticate(&auth_key(), &input).unwrap();
    assert_eq!(hex::encode(tag), TAG);
    assert!(mac::verify(&auth_key(), &input, &tag));
}

#[test]
fn test_any_input_mutation_breaks_tag() {
    let input = metadata::handshake_tag_input(
        Domain::VehicleSecurity,
        VERIFIER,
        &challenge(),
        &hex::decode(SESSION_INFO).unwrap(),
    )
    .unwrap();
    let tag = hex::decode(TAG).unwrap();
    for i in 0..input.len() {
        let mut mutated = input.clone();
        mutated[i] ^= 0x01;
        assert!(!mac::verify(&auth_key(), &mutated, &tag), "byte {i}");
    }
    for i in 0..tag.len() {
        let mut mutated = tag.clone();
        mutated[i] ^= 0x80;
        assert!(!mac::verify(&auth_key(), &input, &mutated), "tag byte {i}");
    }
}

fn session() -> Session {
    let mut session = Session::new(
        Domain::VehicleSecurity,
        client(),
        [0x10; 16],
        Arc::new(EnvelopeCodec::default()),
        SessionConfig {
            verifier_name: VERIFIER.to_string(),
            ttl_secs: None,
        },
    );
    session.connect().unwrap();
    session
}

fn response(challenge: [u8; UUID_LEN], info: Vec<u8>) -> Envelope {
    let domain = Domain::VehicleSecurity;
    let input = metadata::handshake_tag_input(domain, VERIFIER, &challenge, &info).unwrap();
    Envelope {
        request_uuid: Some(challenge),
        session_info: Some(info),
        signature: Some(SignatureData {
            session_info_tag: Some(mac::authenticate(&auth_key(), &input).unwrap()),
            ..SignatureData::default()
        }),
        ..Envelope::default()
    }
}

#[test]
fn test_session_commits_vector_keys() {
    let mut session = session();
    let request = session.start_handshake().unwrap();
    let challenge = request.uuid.unwrap();
    let reply = response(challenge, hex::decode(SESSION_INFO).unwrap());
    session.process_handshake_response(&reply, Instant::now()).unwrap();

    assert_eq!(session.state(), State::Established);
    let ctx = session.context().unwrap();
    assert_eq!(ctx.counter(), 7);
    assert_eq!(hex::encode(ctx.epoch()), EPOCH);
    assert_eq!(hex::encode(ctx.peer_public()), VEHICLE_PUBLIC);

    // The committed AEAD key is the one the vector derives.
    let prepared = session.seal_command(b"honk", Instant::now()).unwrap();
    let meta = prepared.envelope.aead().unwrap();
    assert_eq!(meta.counter, 8);
    assert_eq!(meta.expires_at, None);
    let key: [u8; 16] = hex::decode(AEAD_KEY).unwrap().try_into().unwrap();
    let aad = metadata::command_aad(8, &meta.epoch, Domain::VehicleSecurity, &[0x10; 16], None);
    let sealed = prepared.envelope.payload.as_ref().unwrap();
    let opened = aead::open(&key, &meta.nonce, sealed, &aad).unwrap();
    assert_eq!(&opened[..], b"honk");
}

#[test]
fn test_session_rejects_mutated_session_info() {
    let info = hex::decode(SESSION_INFO).unwrap();
    for i in [1, 3, 40, 70, 75, 85, 88] {
        let mut session = session();
        let challenge = session.start_handshake().unwrap().uuid.unwrap();
        let mut reply = response(challenge, info.clone());
        reply.session_info.as_mut().unwrap()[i] ^= 0x01;

        let err = session.process_handshake_response(&reply, Instant::now()).unwrap_err();
        assert!(
            matches!(err.kind(), ErrorKind::Auth | ErrorKind::Format),
            "byte {i}: {err}"
        );
        assert_eq!(session.state(), State::Connected);
        assert!(session.context().is_none());
    }
}
