//! Async driver tying sessions, framer and reassembler to one link.
//!
//! One [`Session`] per domain sits behind a `tokio::sync::Mutex`. Sealing a
//! command, handing it to the framer and committing its counter happen under
//! that lock, so counters reach the link in increasing order. Responses are
//! routed back to the waiting caller by request UUID.

use crate::error::{Error, Result};
use crate::framer::{Framer, FramerConfig};
use crate::link::Link;
use crate::reassembly;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use vcp_core::envelope::{Destination, UUID_LEN};
use vcp_core::{CommandResponse, Domain, Envelope, EnvelopeCodec, Session, SessionConfig, State};
use vcp_crypto::{aead, KeyMaterial};

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Framing and reassembly.
    pub framer: FramerConfig,
    /// Per-domain session settings.
    pub session: SessionConfig,
    /// Bound on waiting for a handshake response.
    pub handshake_timeout_ms: u64,
    /// Bound on waiting for a command response.
    pub response_timeout_ms: u64,
    /// Reassembled messages buffered ahead of the dispatcher.
    pub inbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            framer: FramerConfig::default(),
            session: SessionConfig::default(),
            handshake_timeout_ms: 5_000,
            response_timeout_ms: 10_000,
            inbound_capacity: 32,
        }
    }
}

impl ConnectionConfig {
    /// Load from JSON; missing fields take defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// A caller waiting for the response to one request.
struct Waiter {
    domain: Domain,
    tx: oneshot::Sender<Envelope>,
}

type PendingMap = HashMap<[u8; UUID_LEN], Waiter>;
type Pending = Arc<StdMutex<PendingMap>>;

fn lock(pending: &Pending) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Whether `envelope` is addressed to `routing_address` from `domain`.
/// Absent addressing fields are not held against the response.
fn addressed_to(envelope: &Envelope, routing_address: &[u8; 16], domain: Domain) -> bool {
    let to_ok = match envelope.to {
        Some(Destination::RoutingAddress(address)) => address == *routing_address,
        Some(Destination::Domain(_)) => false,
        None => true,
    };
    let from_ok = match envelope.from {
        Some(Destination::Domain(from)) => from == domain,
        Some(Destination::RoutingAddress(_)) => false,
        None => true,
    };
    to_ok && from_ok
}

/// Removes a pending entry when the waiting call ends early.
struct PendingGuard<'a> {
    pending: &'a Pending,
    uuid: [u8; UUID_LEN],
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.uuid);
    }
}

/// A connection to one vehicle over one link.
pub struct VehicleConnection {
    config: ConnectionConfig,
    codec: Arc<EnvelopeCodec>,
    framer: Framer,
    sessions: BTreeMap<Domain, Arc<Mutex<Session>>>,
    pending: Pending,
    routing_address: [u8; 16],
    tasks: Vec<JoinHandle<()>>,
}

impl VehicleConnection {
    /// Open sessions for `domains` over `link`.
    ///
    /// `fragments` carries bytes received from the link; closing it marks
    /// every session `Closed`. Must be called inside a Tokio runtime.
    pub fn open<L: Link>(
        link: Arc<L>,
        fragments: mpsc::Receiver<Vec<u8>>,
        local: Arc<KeyMaterial>,
        domains: &[Domain],
        config: ConnectionConfig,
    ) -> Result<Self> {
        let codec = Arc::new(EnvelopeCodec::default());
        Self::with_codec(link, fragments, local, domains, codec, config)
    }

    /// Like [`VehicleConnection::open`] with a custom envelope codec.
    pub fn with_codec<L: Link>(
        link: Arc<L>,
        fragments: mpsc::Receiver<Vec<u8>>,
        local: Arc<KeyMaterial>,
        domains: &[Domain],
        codec: Arc<EnvelopeCodec>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let routing_address = aead::random_challenge();

        let mut sessions = BTreeMap::new();
        for &domain in domains {
            let mut session = Session::new(
                domain,
                Arc::clone(&local),
                routing_address,
                Arc::clone(&codec),
                config.session.clone(),
            );
            session.connect()?;
            sessions.insert(domain, Arc::new(Mutex::new(session)));
        }

        let framer = Framer::spawn(link, &config.framer);
        let pending: Pending = Arc::default();

        let (messages_tx, mut messages_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let inbound = reassembly::spawn_inbound(fragments, messages_tx, &config.framer);

        let dispatcher = tokio::spawn({
            let codec = Arc::clone(&codec);
            let pending = Arc::clone(&pending);
            let sessions: Vec<_> = sessions.values().cloned().collect();
            async move {
                while let Some(bytes) = messages_rx.recv().await {
                    let envelope = match codec.decode(&bytes) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!(error = %e, "dropping undecodable message");
                            continue;
                        }
                    };
                    let Some(uuid) = envelope.request_uuid else {
                        debug!("unsolicited message");
                        continue;
                    };
                    let mut waiting = lock(&pending);
                    let Some(waiter) = waiting.get(&uuid) else {
                        debug!("unsolicited message");
                        continue;
                    };
                    if !addressed_to(&envelope, &routing_address, waiter.domain) {
                        debug!(
                            domain = ?waiter.domain,
                            to = ?envelope.to,
                            from = ?envelope.from,
                            "dropping misrouted response"
                        );
                        continue;
                    }
                    if let Some(waiter) = waiting.remove(&uuid) {
                        // Caller may have timed out already.
                        drop(waiter.tx.send(envelope));
                    }
                }

                info!("link closed");
                lock(&pending).clear();
                for session in sessions {
                    session.lock().await.close();
                }
            }
        });

        info!(key = %local.fingerprint(), domains = sessions.len(), "connection opened");
        Ok(Self {
            config,
            codec,
            framer,
            sessions,
            pending,
            routing_address,
            tasks: vec![inbound, dispatcher],
        })
    }

    /// Routing address identifying this client in responses.
    pub fn routing_address(&self) -> &[u8; 16] {
        &self.routing_address
    }

    /// Domains this connection holds sessions for.
    pub fn domains(&self) -> impl Iterator<Item = Domain> + '_ {
        self.sessions.keys().copied()
    }

    /// Apply a renegotiated link MTU.
    pub fn set_mtu(&self, mtu: usize) {
        self.framer.set_mtu(mtu);
    }

    /// Current block length used by the framer.
    pub fn block_length(&self) -> usize {
        self.framer.block_length()
    }

    fn session(&self, domain: Domain) -> Result<&Arc<Mutex<Session>>> {
        self.sessions.get(&domain).ok_or(Error::UnknownDomain(domain))
    }

    /// State of the `domain` session.
    pub async fn state(&self, domain: Domain) -> Result<State> {
        Ok(self.session(domain)?.lock().await.state())
    }

    /// Counter of the last command sent on `domain`, if established.
    pub async fn counter(&self, domain: Domain) -> Result<Option<u32>> {
        let session = self.session(domain)?.lock().await;
        Ok(session.context().map(|ctx| ctx.counter()))
    }

    fn register(
        &self,
        domain: Domain,
        uuid: [u8; UUID_LEN],
    ) -> (oneshot::Receiver<Envelope>, PendingGuard<'_>) {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(uuid, Waiter { domain, tx });
        (
            rx,
            PendingGuard {
                pending: &self.pending,
                uuid,
            },
        )
    }

    /// Handshake with `domain` and wait for the session to be established.
    ///
    /// # Errors
    ///
    /// `HandshakeTimeout` if no response arrives in time; the session is then
    /// back in `Connected`. Tag failures and faults come back from the
    /// session unchanged.
    pub async fn handshake(&self, domain: Domain) -> Result<()> {
        let session = self.session(domain)?;

        let (rx, _guard, ticket) = {
            let mut session = session.lock().await;
            let request = session.start_handshake()?;
            let challenge = request
                .uuid
                .ok_or(vcp_core::Error::InvalidState("handshake without challenge"))?;
            let bytes = self.codec.encode(&request)?;
            let (rx, guard) = self.register(domain, challenge);
            match self.framer.enqueue(&bytes).await {
                Ok(ticket) => (rx, guard, ticket),
                Err(e) => {
                    session.handshake_timed_out();
                    return Err(e);
                }
            }
        };

        let outcome = timeout(self.config.handshake_timeout(), async {
            ticket.wait().await?;
            rx.await.map_err(|_| Error::Disconnected)
        })
        .await;

        let mut session = session.lock().await;
        match outcome {
            Ok(Ok(response)) => {
                session.process_handshake_response(&response, Instant::now().into_std())?;
                Ok(())
            }
            Ok(Err(e)) => {
                session.handshake_timed_out();
                Err(e)
            }
            Err(_) => {
                session.handshake_timed_out();
                Err(vcp_core::Error::HandshakeTimeout.into())
            }
        }
    }

    /// Handshake every domain in turn.
    pub async fn handshake_all(&self) -> Result<()> {
        for domain in self.sessions.keys() {
            self.handshake(*domain).await?;
        }
        Ok(())
    }

    /// Seal `payload` for `domain`, send it and return the opened response.
    ///
    /// # Errors
    ///
    /// - `HandshakeRequired` before the session is established
    /// - `MessageTooLarge` if the sealed envelope exceeds the framing limit;
    ///   the counter is not consumed
    /// - `Timeout` when no response arrives in time
    /// - whatever [`Session::open_response`] reports for the response
    pub async fn send_command(&self, domain: Domain, payload: &[u8]) -> Result<CommandResponse> {
        let session = self.session(domain)?;

        let (rx, _guard, ticket, counter) = {
            let mut session = session.lock().await;
            let prepared = session.prepare_command(payload, Instant::now().into_std())?;
            let bytes = self.codec.encode(&prepared.envelope)?;
            let (rx, guard) = self.register(domain, prepared.request_uuid);
            let ticket = self.framer.enqueue(&bytes).await?;
            session.commit_command(&prepared)?;
            (rx, guard, ticket, prepared.counter)
        };
        debug!(?domain, counter, "command queued");

        let response = timeout(self.config.response_timeout(), async {
            ticket.wait().await?;
            rx.await.map_err(|_| Error::Disconnected)
        })
        .await
        .map_err(|_| Error::Timeout("command response"))??;

        let mut session = session.lock().await;
        Ok(session.open_response(&response)?)
    }

    /// Close every session and stop background tasks.
    pub async fn close(&self) {
        for session in self.sessions.values() {
            session.lock().await.close();
        }
        self.framer.shutdown();
        for task in &self.tasks {
            task.abort();
        }
        lock(&self.pending).clear();
    }
}

impl Drop for VehicleConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
