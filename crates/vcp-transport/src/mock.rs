//! In-memory link and vehicle simulator.
//!
//! Compiled for this crate's tests and behind the `mock` feature for
//! downstream integration tests.

use crate::framer::encode_frame;
use crate::link::{Link, LinkError, WriteMode};
use crate::reassembly::Reassembler;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use vcp_core::envelope::{
    AeadMetadata, Destination, MessageStatus, SessionInfoStatus, SignatureData,
};
use vcp_core::{metadata, Domain, Envelope, EnvelopeCodec, Fault, OperationStatus, SessionInfo};
use vcp_crypto::{aead, kdf, mac, KeyMaterial};

/// A link that records accepted blocks.
///
/// Writes are refused the way a real link would: over `max_write` bytes is
/// `Oversize`, an unlisted mode is `UnsupportedMode`.
#[derive(Debug)]
pub struct MockLink {
    mtu: usize,
    max_write: Mutex<Option<usize>>,
    modes: Vec<WriteMode>,
    writes: Mutex<Vec<(Vec<u8>, WriteMode)>>,
    rejected: AtomicUsize,
    connected: AtomicBool,
    stalled: AtomicBool,
    tap: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl MockLink {
    /// Link accepting any block up to `mtu - 3` in either mode.
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            max_write: Mutex::new(None),
            modes: vec![WriteMode::WithAck, WriteMode::FireAndForget],
            writes: Mutex::new(Vec::new()),
            rejected: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
            stalled: AtomicBool::new(false),
            tap: None,
        }
    }

    /// Refuse blocks longer than `max`.
    pub fn with_max_write(self, max: usize) -> Self {
        self.set_max_write(Some(max));
        self
    }

    /// Accept only `modes`.
    pub fn with_modes(mut self, modes: &[WriteMode]) -> Self {
        self.modes = modes.to_vec();
        self
    }

    /// Also forward every accepted block to the returned receiver.
    pub fn with_tap(mut self) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tap = Some(tx);
        (self, rx)
    }

    /// Change the write limit.
    pub fn set_max_write(&self, max: Option<usize>) {
        *self.max_write.lock().unwrap_or_else(PoisonError::into_inner) = max;
    }

    /// Accepted blocks, in order.
    pub fn writes(&self) -> Vec<(Vec<u8>, WriteMode)> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of refused writes.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    /// Forget recorded writes and rejections.
    pub fn clear(&self) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.rejected.store(0, Ordering::SeqCst);
    }

    /// Fail every later write.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Never complete any later write.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Link for MockLink {
    fn mtu(&self) -> usize {
        self.mtu
    }

    async fn write_block(&self, block: &[u8], mode: WriteMode) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LinkError::Disconnected);
        }
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let max = *self.max_write.lock().unwrap_or_else(PoisonError::into_inner);
        let refused = if !self.modes.contains(&mode) {
            Some(LinkError::UnsupportedMode)
        } else if max.is_some_and(|max| block.len() > max) {
            Some(LinkError::Oversize)
        } else {
            None
        };
        if let Some(e) = refused {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }

        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((block.to_vec(), mode));
        if let Some(tap) = &self.tap {
            // Vehicle may already be gone.
            let _ = tap.send(block.to_vec());
        }
        Ok(())
    }
}

/// How the simulated vehicle answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behaviour {
    /// Answer correctly.
    #[default]
    Honest,
    /// Corrupt the handshake tag.
    BadTag,
    /// Never answer.
    Silent,
    /// Answer every request with this fault.
    Fault(Fault),
    /// Seal responses under a different epoch.
    ChangeEpoch,
    /// Resend the previous command response.
    ReplayLast,
    /// Report the client key as unknown.
    Unpaired,
    /// Answer as if from another domain.
    Misroute,
}

/// Shared switch for a running vehicle's behaviour.
#[derive(Debug, Clone, Default)]
pub struct BehaviourHandle(Arc<Mutex<Behaviour>>);

impl BehaviourHandle {
    /// Change behaviour for subsequent requests.
    pub fn set(&self, behaviour: Behaviour) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = behaviour;
    }

    /// Current behaviour.
    pub fn get(&self) -> Behaviour {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Controller simulator for end-to-end tests.
///
/// Holds one client session per domain, echoes command plaintext back in a
/// sealed response and enforces counter monotonicity.
pub struct MockVehicle {
    key: KeyMaterial,
    verifier_name: String,
    epoch: [u8; 16],
    clock_time: u32,
    initial_counter: u32,
    counters: BTreeMap<Domain, u32>,
    codec: EnvelopeCodec,
    behaviour: BehaviourHandle,
    last_response: Option<Envelope>,
}

impl MockVehicle {
    /// Vehicle identified by `verifier_name` with a fresh key and epoch.
    pub fn new(verifier_name: &str) -> Self {
        Self {
            key: KeyMaterial::generate(),
            verifier_name: verifier_name.to_string(),
            epoch: aead::random_challenge(),
            clock_time: 1000,
            initial_counter: 0,
            counters: BTreeMap::new(),
            codec: EnvelopeCodec::default(),
            behaviour: BehaviourHandle::default(),
            last_response: None,
        }
    }

    /// Counter reported in session info before any command.
    pub fn with_counter(mut self, counter: u32) -> Self {
        self.initial_counter = counter;
        self
    }

    /// Vehicle public key.
    pub fn public_key(&self) -> &[u8; 65] {
        self.key.public_key()
    }

    /// Current epoch.
    pub fn epoch(&self) -> &[u8; 16] {
        &self.epoch
    }

    /// Handle for changing behaviour while running.
    pub fn behaviour(&self) -> BehaviourHandle {
        self.behaviour.clone()
    }

    /// Highest command counter accepted for `domain`.
    pub fn last_counter(&self, domain: Domain) -> u32 {
        self.counters
            .get(&domain)
            .copied()
            .unwrap_or(self.initial_counter)
    }

    /// Answer one request; `None` means stay silent.
    pub fn handle(&mut self, request: &Envelope) -> Option<Envelope> {
        let behaviour = self.behaviour.get();
        if behaviour == Behaviour::Silent {
            return None;
        }
        let Some(Destination::Domain(domain)) = request.to else {
            return None;
        };
        let Some(Destination::RoutingAddress(address)) = request.from else {
            return None;
        };

        let from = match behaviour {
            Behaviour::Misroute if domain == Domain::VehicleSecurity => Domain::Infotainment,
            Behaviour::Misroute => Domain::VehicleSecurity,
            _ => domain,
        };
        let reply = Envelope {
            to: Some(Destination::RoutingAddress(address)),
            from: Some(Destination::Domain(from)),
            request_uuid: request.uuid,
            ..Envelope::default()
        };
        let fault = |fault: Fault| Envelope {
            status: Some(MessageStatus {
                operation: OperationStatus::Error,
                fault,
            }),
            ..reply.clone()
        };

        if let Behaviour::Fault(f) = behaviour {
            return Some(fault(f));
        }

        if let Some(hs) = request.handshake_request {
            let status = if behaviour == Behaviour::Unpaired {
                SessionInfoStatus::KeyNotOnWhitelist
            } else {
                SessionInfoStatus::Ok
            };
            let info = SessionInfo {
                counter: self.last_counter(domain),
                public_key: *self.key.public_key(),
                epoch: self.epoch,
                clock_time: self.clock_time,
                status,
            };
            let Ok(raw_info) = self.codec.encode_session_info(&info) else {
                return Some(fault(Fault::Internal));
            };
            let Ok(keys) = kdf::derive_session_keys(&self.key, &hs.public_key) else {
                return Some(fault(Fault::InvalidSignature));
            };
            let tag =
                metadata::handshake_tag_input(domain, &self.verifier_name, &hs.challenge, &raw_info)
                    .ok()
                    .and_then(|input| mac::authenticate(&*keys.auth_key, &input).ok());
            let Some(mut tag) = tag else {
                return Some(fault(Fault::Internal));
            };
            if behaviour == Behaviour::BadTag {
                tag[0] ^= 0x01;
            }
            debug!(?domain, counter = info.counter, "mock vehicle answered handshake");
            return Some(Envelope {
                session_info: Some(raw_info),
                signature: Some(SignatureData {
                    session_info_tag: Some(tag),
                    ..SignatureData::default()
                }),
                ..reply
            });
        }

        if behaviour == Behaviour::ReplayLast {
            if let Some(last) = &self.last_response {
                return Some(Envelope {
                    request_uuid: request.uuid,
                    ..last.clone()
                });
            }
        }

        let (Some(meta), Some(sealed)) = (request.aead(), request.payload.as_deref()) else {
            return Some(fault(Fault::Decoding));
        };
        let Some(client) = request.signature.as_ref().and_then(|s| s.signer_public_key) else {
            return Some(fault(Fault::UnknownKeyId));
        };
        let Ok(keys) = kdf::derive_session_keys(&self.key, &client) else {
            return Some(fault(Fault::UnknownKeyId));
        };
        let aad =
            metadata::command_aad(meta.counter, &meta.epoch, domain, &address, meta.expires_at);
        let Ok(plaintext) = aead::open(&keys.aead_key, &meta.nonce, sealed, &aad) else {
            return Some(fault(Fault::InvalidSignature));
        };
        if meta.epoch != self.epoch {
            return Some(fault(Fault::IncorrectEpoch));
        }
        if meta.counter <= self.last_counter(domain) {
            return Some(fault(Fault::InvalidTokenOrCounter));
        }
        self.counters.insert(domain, meta.counter);

        let mut epoch = self.epoch;
        if behaviour == Behaviour::ChangeEpoch {
            epoch[0] ^= 0xFF;
        }
        let nonce = aead::random_nonce();
        let aad = metadata::command_aad(meta.counter, &epoch, domain, &address, None);
        let Ok(body) = aead::seal(&keys.aead_key, &nonce, &plaintext, &aad) else {
            return Some(fault(Fault::Internal));
        };
        let response = Envelope {
            payload: Some(body),
            status: Some(MessageStatus {
                operation: OperationStatus::Ok,
                fault: Fault::None,
            }),
            signature: Some(SignatureData {
                aead: Some(AeadMetadata {
                    epoch,
                    nonce,
                    counter: meta.counter,
                    expires_at: None,
                }),
                ..SignatureData::default()
            }),
            ..reply
        };
        self.last_response = Some(response.clone());
        Some(response)
    }

    /// Serve requests read from `blocks`, answering in `fragment_size`
    /// chunks on `fragments`.
    pub fn spawn(
        mut self,
        mut blocks: mpsc::UnboundedReceiver<Vec<u8>>,
        fragments: mpsc::Sender<Vec<u8>>,
        fragment_size: usize,
    ) -> JoinHandle<()> {
        let mut reassembler = Reassembler::new(1024, Duration::from_secs(1));
        tokio::spawn(async move {
            while let Some(block) = blocks.recv().await {
                for message in reassembler.push(&block, Instant::now()) {
                    let Ok(request) = self.codec.decode(&message) else {
                        debug!("mock vehicle ignored undecodable request");
                        continue;
                    };
                    let Some(response) = self.handle(&request) else {
                        continue;
                    };
                    let Ok(bytes) = self.codec.encode(&response) else {
                        continue;
                    };
                    let Ok(frame) = encode_frame(&bytes, 1024) else {
                        continue;
                    };
                    for chunk in frame.chunks(fragment_size.max(1)) {
                        if fragments.send(chunk.to_vec()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        })
    }
}

/// Wire `vehicle` behind `link`.
///
/// Returns the shared link, the fragment receiver to hand to
/// [`crate::VehicleConnection::open`] and the vehicle task.
pub fn loopback(
    link: MockLink,
    vehicle: MockVehicle,
    fragment_size: usize,
) -> (Arc<MockLink>, mpsc::Receiver<Vec<u8>>, JoinHandle<()>) {
    let (link, blocks) = link.with_tap();
    let (fragments_tx, fragments_rx) = mpsc::channel(64);
    let task = vehicle.spawn(blocks, fragments_tx, fragment_size);
    (Arc::new(link), fragments_rx, task)
}
