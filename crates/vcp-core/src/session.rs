//! Per-domain session state machine.
//!
//! ```text
//! Idle ──connect──▶ Connected ──start_handshake──▶ Handshaking ──response ok──▶ Established
//!                       ▲                              │  ▲                         │
//!                       └──── timeout / bad response ──┘  └── auth failure / epoch ─┘
//!        any ──close──▶ Closed
//! ```
//!
//! The machine is sans-IO: callers hand it decoded envelopes and a clock
//! reading and get envelopes back. Counter bookkeeping happens here so the
//! connection layer only has to keep seal-then-enqueue under one lock.

use crate::envelope::{
    AeadMetadata, Destination, Domain, Envelope, EnvelopeCodec, HandshakeRequest, SessionInfo,
    SessionInfoStatus, SignatureData, EPOCH_LEN, ROUTING_ADDRESS_LEN, UUID_LEN,
};
use crate::error::{Error, Result, Stage};
use crate::fault::OperationStatus;
use crate::metadata;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use vcp_crypto::kex::PUBLIC_KEY_LEN;
use vcp_crypto::{aead, kdf, mac, KeyMaterial, SessionKeys};
use zeroize::Zeroizing;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a sealed command in controller clock seconds; `None`
    /// sends commands without an expiry.
    pub ttl_secs: Option<u32>,
    /// Controller identity mixed into the handshake tag.
    pub verifier_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: Some(15),
            verifier_name: String::new(),
        }
    }
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not yet connected.
    Idle,
    /// Link up, no keys.
    Connected,
    /// Waiting for a handshake response, or re-handshake required.
    Handshaking,
    /// Keys agreed; commands may be sent.
    Established,
    /// Link gone; terminal.
    Closed,
}

/// Keys and counters agreed with the controller for one domain.
pub struct SessionContext {
    keys: SessionKeys,
    peer_public: [u8; PUBLIC_KEY_LEN],
    epoch: [u8; EPOCH_LEN],
    counter: u32,
    last_received: u32,
    clock_time: u32,
    synced_at: Instant,
}

impl SessionContext {
    /// Last committed send counter.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Controller epoch.
    pub fn epoch(&self) -> &[u8; EPOCH_LEN] {
        &self.epoch
    }

    /// Controller public point.
    pub fn peer_public(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.peer_public
    }

    /// Highest response counter accepted.
    pub fn last_received(&self) -> u32 {
        self.last_received
    }

    /// Estimated controller clock at `now`.
    pub fn clock_at(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.synced_at).as_secs();
        let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
        self.clock_time.saturating_add(elapsed)
    }
}

impl core::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionContext")
            .field("counter", &self.counter)
            .field("last_received", &self.last_received)
            .field("clock_time", &self.clock_time)
            .finish_non_exhaustive()
    }
}

enum SessionState {
    Idle,
    Connected,
    /// `None` after an authentication failure: no request outstanding yet.
    Handshaking {
        challenge: Option<[u8; UUID_LEN]>,
    },
    Established(SessionContext),
    Closed,
}

/// A sealed command that has not yet been committed.
#[derive(Debug, Clone)]
pub struct PreparedCommand {
    /// Envelope to encode and send.
    pub envelope: Envelope,
    /// Counter this command consumes.
    pub counter: u32,
    /// Epoch the counter belongs to.
    pub epoch: [u8; EPOCH_LEN],
    /// UUID the response will echo.
    pub request_uuid: [u8; UUID_LEN],
}

/// Opened controller response.
#[derive(Debug)]
pub struct CommandResponse {
    /// Controller outcome.
    pub status: OperationStatus,
    /// Decrypted payload, if any.
    pub payload: Option<Zeroizing<Vec<u8>>>,
    /// Counter carried by the response, if sealed.
    pub counter: Option<u32>,
}

/// Session with one controller domain.
pub struct Session {
    config: SessionConfig,
    domain: Domain,
    local: Arc<KeyMaterial>,
    routing_address: [u8; ROUTING_ADDRESS_LEN],
    codec: Arc<EnvelopeCodec>,
    state: SessionState,
}

impl Session {
    /// New idle session.
    pub fn new(
        domain: Domain,
        local: Arc<KeyMaterial>,
        routing_address: [u8; ROUTING_ADDRESS_LEN],
        codec: Arc<EnvelopeCodec>,
        config: SessionConfig,
    ) -> Self {
        Self {
            config,
            domain,
            local,
            routing_address,
            codec,
            state: SessionState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        match self.state {
            SessionState::Idle => State::Idle,
            SessionState::Connected => State::Connected,
            SessionState::Handshaking { .. } => State::Handshaking,
            SessionState::Established(_) => State::Established,
            SessionState::Closed => State::Closed,
        }
    }

    /// Domain this session talks to.
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Local routing address.
    pub fn routing_address(&self) -> &[u8; ROUTING_ADDRESS_LEN] {
        &self.routing_address
    }

    /// Established context, if any.
    pub fn context(&self) -> Option<&SessionContext> {
        match &self.state {
            SessionState::Established(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// True once a handshake has succeeded and no failure has reset it.
    pub fn is_established(&self) -> bool {
        matches!(self.state, SessionState::Established(_))
    }

    /// `Idle → Connected`.
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Connected;
                Ok(())
            }
            SessionState::Closed => Err(Error::InvalidState("session closed")),
            _ => Err(Error::InvalidState("already connected")),
        }
    }

    /// Build a handshake request and move to `Handshaking`.
    ///
    /// A new request supersedes any outstanding one; an established session
    /// may handshake again to refresh its keys.
    pub fn start_handshake(&mut self) -> Result<Envelope> {
        match self.state {
            SessionState::Idle => return Err(Error::InvalidState("not connected")),
            SessionState::Closed => return Err(Error::InvalidState("session closed")),
            _ => {}
        }
        if !self.local.has_private() {
            return Err(vcp_crypto::Error::MissingPrivateKey.into());
        }

        let challenge = aead::random_challenge();
        let envelope = Envelope {
            to: Some(Destination::Domain(self.domain)),
            from: Some(Destination::RoutingAddress(self.routing_address)),
            handshake_request: Some(HandshakeRequest {
                public_key: *self.local.public_key(),
                challenge,
            }),
            uuid: Some(challenge),
            ..Envelope::default()
        };

        debug!(domain = ?self.domain, key = %self.local.fingerprint(), "handshake started");
        self.state = SessionState::Handshaking {
            challenge: Some(challenge),
        };
        Ok(envelope)
    }

    /// Challenge of the outstanding handshake request.
    pub fn pending_challenge(&self) -> Option<&[u8; UUID_LEN]> {
        match &self.state {
            SessionState::Handshaking { challenge } => challenge.as_ref(),
            _ => None,
        }
    }

    /// Verify a handshake response and move to `Established`.
    ///
    /// Any failure reverts to `Connected` and retains nothing from the
    /// response.
    pub fn process_handshake_response(&mut self, response: &Envelope, now: Instant) -> Result<()> {
        let challenge = match self.state {
            SessionState::Handshaking {
                challenge: Some(challenge),
            } => challenge,
            _ => return Err(Error::InvalidState("no handshake outstanding")),
        };

        match self.establish(&challenge, response, now) {
            Ok(ctx) => {
                info!(
                    domain = ?self.domain,
                    counter = ctx.counter,
                    clock = ctx.clock_time,
                    "session established"
                );
                self.state = SessionState::Established(ctx);
                Ok(())
            }
            Err(e) => {
                warn!(domain = ?self.domain, error = %e, "handshake failed");
                self.state = SessionState::Connected;
                Err(e)
            }
        }
    }

    fn establish(
        &self,
        challenge: &[u8; UUID_LEN],
        response: &Envelope,
        now: Instant,
    ) -> Result<SessionContext> {
        if let Some(fault) = response.fault() {
            return Err(Error::Rejected(fault));
        }
        if response.request_uuid.as_ref() != Some(challenge) {
            return Err(Error::Authentication(Stage::Handshake));
        }

        let raw_info = response
            .session_info
            .as_deref()
            .ok_or_else(|| Error::format(Stage::Handshake, "missing session info"))?;
        let tag = response
            .signature
            .as_ref()
            .and_then(|s| s.session_info_tag)
            .ok_or_else(|| Error::format(Stage::Handshake, "missing session info tag"))?;

        let info: SessionInfo = self.codec.decode_session_info(raw_info)?;
        if info.status == SessionInfoStatus::KeyNotOnWhitelist {
            return Err(Error::KeyNotPaired);
        }

        let keys = kdf::derive_session_keys(&self.local, &info.public_key)?;
        let input = metadata::handshake_tag_input(
            self.domain,
            &self.config.verifier_name,
            challenge,
            raw_info,
        )?;
        if !mac::verify(&*keys.auth_key, &input, &tag) {
            return Err(Error::Authentication(Stage::Handshake));
        }

        Ok(SessionContext {
            keys,
            peer_public: info.public_key,
            epoch: info.epoch,
            counter: info.counter,
            last_received: info.counter,
            clock_time: info.clock_time,
            synced_at: now,
        })
    }

    /// Handshake wait expired: `Handshaking → Connected`.
    pub fn handshake_timed_out(&mut self) {
        if matches!(self.state, SessionState::Handshaking { .. }) {
            debug!(domain = ?self.domain, "handshake timed out");
            self.state = SessionState::Connected;
        }
    }

    fn established(&self) -> Result<&SessionContext> {
        match &self.state {
            SessionState::Established(ctx) => Ok(ctx),
            SessionState::Connected | SessionState::Handshaking { .. } => {
                Err(Error::HandshakeRequired)
            }
            SessionState::Idle => Err(Error::InvalidState("not connected")),
            SessionState::Closed => Err(Error::InvalidState("session closed")),
        }
    }

    /// Seal `payload` under the next counter without consuming it.
    ///
    /// Pair with [`Session::commit_command`] once the envelope is handed to
    /// the framer.
    pub fn prepare_command(&self, payload: &[u8], now: Instant) -> Result<PreparedCommand> {
        let ctx = self.established()?;
        let counter = ctx.counter.checked_add(1).ok_or(Error::CounterExhausted)?;
        let expires_at = self
            .config
            .ttl_secs
            .map(|ttl| ctx.clock_at(now).saturating_add(ttl));

        let nonce = aead::random_nonce();
        let aad = metadata::command_aad(
            counter,
            &ctx.epoch,
            self.domain,
            &self.routing_address,
            expires_at,
        );
        let sealed = aead::seal(&ctx.keys.aead_key, &nonce, payload, &aad)?;
        let request_uuid = aead::random_challenge();

        let envelope = Envelope {
            to: Some(Destination::Domain(self.domain)),
            from: Some(Destination::RoutingAddress(self.routing_address)),
            payload: Some(sealed),
            signature: Some(SignatureData {
                signer_public_key: Some(*self.local.public_key()),
                aead: Some(AeadMetadata {
                    epoch: ctx.epoch,
                    nonce,
                    counter,
                    expires_at,
                }),
                session_info_tag: None,
            }),
            uuid: Some(request_uuid),
            ..Envelope::default()
        };

        Ok(PreparedCommand {
            envelope,
            counter,
            epoch: ctx.epoch,
            request_uuid,
        })
    }

    /// Consume the counter of a prepared command. Never rolled back.
    pub fn commit_command(&mut self, prepared: &PreparedCommand) -> Result<()> {
        let SessionState::Established(ctx) = &mut self.state else {
            return Err(Error::HandshakeRequired);
        };
        if prepared.epoch != ctx.epoch || ctx.counter.checked_add(1) != Some(prepared.counter) {
            return Err(Error::InvalidState("stale prepared command"));
        }
        ctx.counter = prepared.counter;
        Ok(())
    }

    /// Prepare and immediately commit a command.
    pub fn seal_command(&mut self, payload: &[u8], now: Instant) -> Result<PreparedCommand> {
        let prepared = self.prepare_command(payload, now)?;
        self.commit_command(&prepared)?;
        Ok(prepared)
    }

    /// Verify and decrypt a controller response.
    ///
    /// Tag failures and epoch changes drop the keys and require a new
    /// handshake; replays and controller faults only reject the message.
    pub fn open_response(&mut self, response: &Envelope) -> Result<CommandResponse> {
        let ctx = self.established()?;

        if let Some(fault) = response.fault() {
            debug!(
                domain = ?self.domain,
                %fault,
                resync = fault.requires_resync(),
                "controller fault"
            );
            return Err(Error::Rejected(fault));
        }
        let status = response.status.map(|s| s.operation).unwrap_or_default();

        let Some(meta) = response.aead().copied() else {
            if response.payload.as_ref().is_some_and(|p| !p.is_empty()) {
                return Err(Error::format(Stage::Response, "unsealed payload"));
            }
            return Ok(CommandResponse {
                status,
                payload: None,
                counter: None,
            });
        };

        let sealed = response
            .payload
            .as_deref()
            .ok_or_else(|| Error::format(Stage::Response, "sealed response without payload"))?;
        let aad = metadata::command_aad(
            meta.counter,
            &meta.epoch,
            self.domain,
            &self.routing_address,
            meta.expires_at,
        );

        let plaintext = match aead::open(&ctx.keys.aead_key, &meta.nonce, sealed, &aad) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                self.invalidate("response failed authentication");
                return Err(Error::Authentication(Stage::Response));
            }
        };

        if meta.epoch != ctx.epoch {
            self.invalidate("controller epoch changed");
            return Err(Error::EpochChanged);
        }
        if meta.counter <= ctx.last_received {
            return Err(Error::Replay {
                counter: meta.counter,
                last: ctx.last_received,
            });
        }

        if let SessionState::Established(ctx) = &mut self.state {
            ctx.last_received = meta.counter;
        }
        Ok(CommandResponse {
            status,
            payload: Some(plaintext),
            counter: Some(meta.counter),
        })
    }

    fn invalidate(&mut self, reason: &'static str) {
        warn!(domain = ?self.domain, reason, "session invalidated");
        self.state = SessionState::Handshaking { challenge: None };
    }

    /// Link lost: move to `Closed` and drop all keys.
    pub fn close(&mut self) {
        if !matches!(self.state, SessionState::Closed) {
            debug!(domain = ?self.domain, "session closed");
        }
        self.state = SessionState::Closed;
    }
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("domain", &self.domain)
            .field("state", &self.state())
            .field("key", &self.local.fingerprint())
            .finish()
    }
}
