//! End-to-end sessions against the simulated vehicle.

use std::sync::Arc;
use vcp_core::{Domain, ErrorKind, Fault, SessionConfig, State};
use vcp_crypto::{keys, ContainerKind, KeyMaterial};
use vcp_transport::mock::{loopback, Behaviour, MockLink, MockVehicle};
use vcp_transport::{handshake_with_retry, ConnectionConfig, RetryPolicy, VehicleConnection};

const VERIFIER: &str = "VCPTEST0000000001";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> ConnectionConfig {
    ConnectionConfig {
        session: SessionConfig {
            verifier_name: VERIFIER.to_string(),
            ..SessionConfig::default()
        },
        handshake_timeout_ms: 1_000,
        response_timeout_ms: 1_000,
        ..ConnectionConfig::default()
    }
}

fn open(
    vehicle: MockVehicle,
    link: MockLink,
    key: KeyMaterial,
) -> (VehicleConnection, Arc<MockLink>) {
    init_tracing();
    let (link, fragments, _vehicle) = loopback(link, vehicle, 20);
    let conn = VehicleConnection::open(
        Arc::clone(&link),
        fragments,
        Arc::new(key),
        &[Domain::VehicleSecurity, Domain::Infotainment],
        config(),
    )
    .unwrap();
    (conn, link)
}

#[tokio::test]
async fn test_counters_advance_by_one_per_command() {
    let (conn, _link) = open(
        MockVehicle::new(VERIFIER).with_counter(100),
        MockLink::new(64),
        KeyMaterial::generate(),
    );
    conn.handshake_all().await.unwrap();

    let mut seen = Vec::new();
    for i in 0..25u8 {
        let domain = if i % 2 == 0 {
            Domain::VehicleSecurity
        } else {
            Domain::Infotainment
        };
        let response = conn.send_command(domain, &[i; 40]).await.unwrap();
        assert_eq!(response.payload.as_deref().map(|p| p.to_vec()), Some(vec![i; 40]));
        seen.push((domain, response.counter.unwrap()));
    }

    let security: Vec<u32> = seen
        .iter()
        .filter(|(d, _)| *d == Domain::VehicleSecurity)
        .map(|(_, c)| *c)
        .collect();
    assert_eq!(security, (101..=113).collect::<Vec<_>>());
    assert_eq!(conn.counter(Domain::VehicleSecurity).await.unwrap(), Some(113));
    assert_eq!(conn.counter(Domain::Infotainment).await.unwrap(), Some(112));
}

#[tokio::test]
async fn test_key_loaded_from_pem() {
    let pem = keys::encode(&KeyMaterial::generate(), ContainerKind::Pkcs8).unwrap();
    let key = keys::decode(pem.as_bytes()).unwrap();
    let (conn, _link) = open(MockVehicle::new(VERIFIER), MockLink::new(185), key);

    conn.handshake(Domain::Infotainment).await.unwrap();
    let response = conn.send_command(Domain::Infotainment, b"flash lights").await.unwrap();
    assert_eq!(response.payload.unwrap().as_slice(), b"flash lights");
}

#[tokio::test]
async fn test_public_only_key_cannot_handshake() {
    let public = KeyMaterial::from_public(KeyMaterial::generate().public_key()).unwrap();
    let (conn, _link) = open(MockVehicle::new(VERIFIER), MockLink::new(185), public);
    assert!(conn.handshake(Domain::VehicleSecurity).await.is_err());
    assert_eq!(conn.state(Domain::VehicleSecurity).await.unwrap(), State::Connected);
}

#[tokio::test]
async fn test_recovers_from_epoch_change() {
    let vehicle = MockVehicle::new(VERIFIER);
    let behaviour = vehicle.behaviour();
    let (conn, _link) = open(vehicle, MockLink::new(185), KeyMaterial::generate());
    conn.handshake(Domain::VehicleSecurity).await.unwrap();

    behaviour.set(Behaviour::ChangeEpoch);
    let err = conn.send_command(Domain::VehicleSecurity, b"lock").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);

    behaviour.set(Behaviour::Honest);
    handshake_with_retry(&conn, Domain::VehicleSecurity, RetryPolicy::default())
        .await
        .unwrap();
    conn.send_command(Domain::VehicleSecurity, b"lock").await.unwrap();
}

#[tokio::test]
async fn test_busy_fault_leaves_other_domain_alone() {
    let vehicle = MockVehicle::new(VERIFIER);
    let behaviour = vehicle.behaviour();
    let (conn, _link) = open(vehicle, MockLink::new(185), KeyMaterial::generate());
    conn.handshake_all().await.unwrap();

    behaviour.set(Behaviour::Fault(Fault::Busy));
    let err = conn.send_command(Domain::Infotainment, b"x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);

    behaviour.set(Behaviour::Honest);
    conn.send_command(Domain::VehicleSecurity, b"y").await.unwrap();
    conn.send_command(Domain::Infotainment, b"z").await.unwrap();
}

#[tokio::test]
async fn test_close_ends_every_session() {
    let key = KeyMaterial::generate();
    let (conn, _link) = open(MockVehicle::new(VERIFIER), MockLink::new(185), key);
    conn.handshake_all().await.unwrap();
    conn.close().await;
    for domain in [Domain::VehicleSecurity, Domain::Infotainment] {
        assert_eq!(conn.state(domain).await.unwrap(), State::Closed);
        assert!(conn.send_command(domain, b"x").await.is_err());
    }
}
