//! Key container, key derivation and AEAD conformance.

use proptest::prelude::*;
use vcp_crypto::{aead, kdf, keys, ContainerKind, Error, KeyMaterial};

// OpenSSL-generated containers for the scalar below.
const SCALAR: &str = "c9afa9d845ba75166b5c215767b1d6934e50c3db36e89b127b8a622b120f6721";
const SEC1_DER: &str = "30770201010420c9afa9d845ba75166b5c215767b1d6934e50c3db36e89b127b8a622b120f6721a00a06082a8648ce3d030107a1440342000460fed4ba255a9d31c961eb74c6356d68c049b8923b61fa6ce669622e60f29fb67903fe1008b8bc99a41ae9e95628bc64f2f1b20c2d7e9f5177a3c294d4462299";
const PKCS8_DER: &str = "308187020100301306072a8648ce3d020106082a8648ce3d030107046d306b0201010420c9afa9d845ba75166b5c215767b1d6934e50c3db36e89b127b8a622b120f6721a1440342000460fed4ba255a9d31c961eb74c6356d68c049b8923b61fa6ce669622e60f29fb67903fe1008b8bc99a41ae9e95628bc64f2f1b20c2d7e9f5177a3c294d4462299";
const SPKI_DER: &str = "3059301306072a8648ce3d020106082a8648ce3d0301070342000460fed4ba255a9d31c961eb74c6356d68c049b8923b61fa6ce669622e60f29fb67903fe1008b8bc99a41ae9e95628bc64f2f1b20c2d7e9f5177a3c294d4462299";
const PEER_PUBLIC: &str = "04ead218590119e8876b29146ff89ca61770c4edbbf97d38ce385ed281d8a6b23028af61281fd35e2fa7002523acc85a429cb06ee6648325389f59edfce1405141";

fn vector_key() -> KeyMaterial {
    KeyMaterial::from_scalar(&hex::decode(SCALAR).unwrap()).unwrap()
}

#[test]
fn test_every_container_decodes_to_the_same_key() {
    let expected = vector_key();
    for blob in [SEC1_DER, PKCS8_DER] {
        assert_eq!(keys::decode(&hex::decode(blob).unwrap()).unwrap(), expected);
    }
    let public = keys::decode(&hex::decode(SPKI_DER).unwrap()).unwrap();
    assert_eq!(public.public_key(), expected.public_key());
}

#[test]
fn test_export_matches_openssl() {
    let key = vector_key();
    for (kind, blob) in [
        (ContainerKind::Sec1, SEC1_DER),
        (ContainerKind::Pkcs8, PKCS8_DER),
        (ContainerKind::Spki, SPKI_DER),
    ] {
        assert_eq!(hex::encode(&*keys::encode_der(&key, kind).unwrap()), blob, "{kind:?}");
    }
}

#[test]
fn test_pem_roundtrip_for_every_kind() {
    let key = vector_key();
    for kind in [ContainerKind::Sec1, ContainerKind::Pkcs8, ContainerKind::Spki] {
        let pem = keys::encode(&key, kind).unwrap();
        assert!(pem.starts_with(&format!("-----BEGIN {}-----", kind.label())));
        let decoded = keys::decode(pem.as_bytes()).unwrap();
        assert_eq!(decoded.public_key(), key.public_key());
        assert_eq!(decoded.has_private(), kind.is_private());
    }
}

#[test]
fn test_derivation_is_deterministic() {
    let key = vector_key();
    let peer = hex::decode(PEER_PUBLIC).unwrap();
    let a = kdf::derive_session_keys(&key, &peer).unwrap();
    let b = kdf::derive_session_keys(&key, &peer).unwrap();
    assert_eq!(*a.aead_key, *b.aead_key);
    assert_eq!(*a.auth_key, *b.auth_key);
    assert_eq!(hex::encode(*a.aead_key), "26808bd01de8021d96070b550dab61ec");
}

#[test]
fn test_derivation_is_symmetric() {
    let client = KeyMaterial::generate();
    let vehicle = KeyMaterial::generate();
    let a = kdf::derive_session_keys(&client, vehicle.public_key()).unwrap();
    let b = kdf::derive_session_keys(&vehicle, client.public_key()).unwrap();
    assert_eq!(*a.aead_key, *b.aead_key);
    assert_eq!(*a.auth_key, *b.auth_key);
}

#[test]
fn test_invalid_peer_point_rejected() {
    let mut peer = hex::decode(PEER_PUBLIC).unwrap();
    peer[64] ^= 0x01;
    assert!(kdf::derive_session_keys(&vector_key(), &peer).is_err());
    assert!(kdf::derive_session_keys(&vector_key(), &peer[..33]).is_err());
}

fn flip(bytes: &mut [u8], bit: usize) {
    let bit = bit % (bytes.len() * 8);
    bytes[bit / 8] ^= 1 << (bit % 8);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_aead_detects_any_flip(
        key in any::<[u8; 16]>(),
        nonce in any::<[u8; 12]>(),
        plaintext in proptest::collection::vec(any::<u8>(), 0..64),
        aad in proptest::collection::vec(any::<u8>(), 1..40),
        bit in any::<usize>(),
        target in 0u8..4,
    ) {
        let sealed = aead::seal(&key, &nonce, &plaintext, &aad).unwrap();
        prop_assert_eq!(&*aead::open(&key, &nonce, &sealed, &aad).unwrap(), &plaintext);

        let (mut sealed, mut nonce, mut aad) = (sealed, nonce, aad);
        match target {
            0 => {
                let body = sealed.len() - aead::TAG_LEN;
                if body == 0 {
                    flip(&mut sealed, bit);
                } else {
                    flip(&mut sealed[..body], bit);
                }
            }
            1 => {
                let body = sealed.len() - aead::TAG_LEN;
                flip(&mut sealed[body..], bit);
            }
            2 => flip(&mut nonce, bit),
            _ => flip(&mut aad, bit),
        }
        let result = aead::open(&key, &nonce, &sealed, &aad);
        prop_assert!(matches!(result, Err(Error::Authentication(_))));
    }
}
