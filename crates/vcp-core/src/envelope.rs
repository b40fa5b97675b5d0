//! Typed routable envelope and its codec.
//!
//! [`EnvelopeCodec`] converts between [`Envelope`] / [`SessionInfo`] and bytes
//! through a [`Schema`]. The built-in schema matches controller firmware; an
//! embedding application can supply its own (see [`Schema::from_json`]) as
//! long as it keeps the field names used here.

use crate::error::{Error, Result, Stage};
use crate::fault::{Fault, OperationStatus};
use crate::record::{self, Record, Value};
use crate::schema::{
    Schema, AEAD_METADATA, DESTINATION, MESSAGE_STATUS, ROUTABLE_MESSAGE, SESSION_INFO,
    SESSION_INFO_REQUEST, SIGNATURE_DATA,
};
use vcp_crypto::kex::PUBLIC_KEY_LEN;

/// Epoch identifier length.
pub const EPOCH_LEN: usize = 16;
/// Routing address length.
pub const ROUTING_ADDRESS_LEN: usize = 16;
/// Request UUID length.
pub const UUID_LEN: usize = 16;
/// Handshake tag length.
pub const SESSION_INFO_TAG_LEN: usize = 32;

/// Controller subsystem a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    /// Broadcast (0).
    Broadcast,
    /// Locks, immobiliser, keys (2).
    VehicleSecurity,
    /// Climate, media, charging (3).
    Infotainment,
}

impl Domain {
    /// Convert to wire format.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Broadcast => 0,
            Self::VehicleSecurity => 2,
            Self::Infotainment => 3,
        }
    }

    /// Convert from wire format.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Broadcast),
            2 => Some(Self::VehicleSecurity),
            3 => Some(Self::Infotainment),
            _ => None,
        }
    }
}

/// One end of a routable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Controller domain.
    Domain(Domain),
    /// Client routing address, random per connection.
    RoutingAddress([u8; ROUTING_ADDRESS_LEN]),
}

/// Parameters bound into a sealed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AeadMetadata {
    /// Controller epoch the counter belongs to.
    pub epoch: [u8; EPOCH_LEN],
    /// AES-GCM nonce.
    pub nonce: [u8; vcp_crypto::aead::NONCE_LEN],
    /// Monotonic message counter.
    pub counter: u32,
    /// Controller clock time after which the message is stale.
    pub expires_at: Option<u32>,
}

/// Signer identity and authentication material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureData {
    /// Sender public point.
    pub signer_public_key: Option<[u8; PUBLIC_KEY_LEN]>,
    /// Present on sealed payloads.
    pub aead: Option<AeadMetadata>,
    /// Present on handshake responses.
    pub session_info_tag: Option<[u8; SESSION_INFO_TAG_LEN]>,
}

/// Handshake request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Client public point.
    pub public_key: [u8; PUBLIC_KEY_LEN],
    /// Fresh random challenge; the response must echo it.
    pub challenge: [u8; UUID_LEN],
}

/// Controller status attached to a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStatus {
    /// Overall outcome.
    pub operation: OperationStatus,
    /// Failure reason when `operation` is [`OperationStatus::Error`].
    pub fault: Fault,
}

/// Controller session state carried inside a handshake response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Last counter the controller accepted.
    pub counter: u32,
    /// Controller public point.
    pub public_key: [u8; PUBLIC_KEY_LEN],
    /// Current epoch.
    pub epoch: [u8; EPOCH_LEN],
    /// Controller clock in seconds since epoch start.
    pub clock_time: u32,
    /// Key-recognition status.
    pub status: SessionInfoStatus,
}

/// Whether the controller recognises the client key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionInfoStatus {
    /// Key is paired.
    #[default]
    Ok,
    /// Key is not on the controller whitelist.
    KeyNotOnWhitelist,
    /// Unknown status code.
    Other(u32),
}

impl SessionInfoStatus {
    /// Convert to wire format.
    pub fn to_u32(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::KeyNotOnWhitelist => 1,
            Self::Other(code) => code,
        }
    }

    /// Convert from wire format.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::KeyNotOnWhitelist,
            code => Self::Other(code),
        }
    }
}

/// A routable message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Receiver.
    pub to: Option<Destination>,
    /// Sender.
    pub from: Option<Destination>,
    /// Sealed or plaintext payload.
    pub payload: Option<Vec<u8>>,
    /// Controller status on responses.
    pub status: Option<MessageStatus>,
    /// Signer and authentication data.
    pub signature: Option<SignatureData>,
    /// Handshake request body.
    pub handshake_request: Option<HandshakeRequest>,
    /// Encoded [`SessionInfo`], kept raw because the handshake tag covers these exact bytes.
    pub session_info: Option<Vec<u8>>,
    /// UUID of the request this message answers.
    pub request_uuid: Option<[u8; UUID_LEN]>,
    /// UUID of this message.
    pub uuid: Option<[u8; UUID_LEN]>,
    /// Controller-defined flags.
    pub flags: Option<u32>,
}

impl Envelope {
    /// Fault reported by the controller, if any.
    pub fn fault(&self) -> Option<Fault> {
        self.status.map(|s| s.fault).filter(|f| f.is_fault())
    }

    /// AEAD metadata, if the payload is sealed.
    pub fn aead(&self) -> Option<&AeadMetadata> {
        self.signature.as_ref().and_then(|s| s.aead.as_ref())
    }
}

/// Schema-driven envelope encoder/decoder.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    schema: Schema,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self {
            schema: Schema::routable(),
        }
    }
}

impl EnvelopeCodec {
    /// Codec over a custom schema.
    ///
    /// # Errors
    /// Fails if the schema is inconsistent or lacks a message type the
    /// envelope uses.
    pub fn new(schema: Schema) -> Result<Self> {
        schema.validate()?;
        schema.require(&[
            ROUTABLE_MESSAGE,
            DESTINATION,
            SIGNATURE_DATA,
            AEAD_METADATA,
            SESSION_INFO_REQUEST,
            MESSAGE_STATUS,
            SESSION_INFO,
        ])?;
        Ok(Self { schema })
    }

    /// Schema in use.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Encode a routable message.
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        record::encode(
            &self.schema,
            ROUTABLE_MESSAGE,
            &envelope_to_record(envelope),
            Stage::Envelope,
        )
    }

    /// Decode a routable message.
    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        let record = record::decode(&self.schema, ROUTABLE_MESSAGE, bytes, Stage::Envelope)?;
        envelope_from_record(&record)
    }

    /// Encode session info.
    pub fn encode_session_info(&self, info: &SessionInfo) -> Result<Vec<u8>> {
        let record = Record::new()
            .with("counter", Value::Varint(info.counter.into()))
            .with("public_key", Value::Bytes(info.public_key.to_vec()))
            .with("epoch", Value::Bytes(info.epoch.to_vec()))
            .with("clock_time", Value::Varint(info.clock_time.into()))
            .with("status", Value::Varint(info.status.to_u32().into()));
        record::encode(&self.schema, SESSION_INFO, &record, Stage::SessionInfo)
    }

    /// Decode session info.
    pub fn decode_session_info(&self, bytes: &[u8]) -> Result<SessionInfo> {
        let stage = Stage::SessionInfo;
        let record = record::decode(&self.schema, SESSION_INFO, bytes, stage)?;
        Ok(SessionInfo {
            counter: opt_u32(&record, "counter", stage)?.unwrap_or(0),
            public_key: required_array(&record, "public_key", stage)?,
            epoch: required_array(&record, "epoch", stage)?,
            clock_time: opt_u32(&record, "clock_time", stage)?.unwrap_or(0),
            status: SessionInfoStatus::from_u32(opt_u32(&record, "status", stage)?.unwrap_or(0)),
        })
    }
}

fn destination_to_record(destination: &Destination) -> Record {
    match destination {
        Destination::Domain(domain) => {
            Record::new().with("domain", Value::Varint(domain.to_u8().into()))
        }
        Destination::RoutingAddress(address) => {
            Record::new().with("routing_address", Value::Bytes(address.to_vec()))
        }
    }
}

fn envelope_to_record(envelope: &Envelope) -> Record {
    let signature = envelope.signature.as_ref().map(|sig| {
        let aead = sig.aead.map(|meta| {
            Record::new()
                .with("epoch", Value::Bytes(meta.epoch.to_vec()))
                .with("nonce", Value::Bytes(meta.nonce.to_vec()))
                .with("counter", Value::Varint(meta.counter.into()))
                .with_opt("expires_at", meta.expires_at.map(|t| Value::Varint(t.into())))
        });
        Value::Message(
            Record::new()
                .with_opt(
                    "signer_public_key",
                    sig.signer_public_key.map(|k| Value::Bytes(k.to_vec())),
                )
                .with_opt("aead", aead.map(Value::Message))
                .with_opt(
                    "session_info_tag",
                    sig.session_info_tag.map(|t| Value::Bytes(t.to_vec())),
                ),
        )
    });

    let status = envelope.status.map(|status| {
        Value::Message(
            Record::new()
                .with("operation_status", Value::Varint(status.operation.to_u32().into()))
                .with("fault", Value::Varint(status.fault.to_u32().into())),
        )
    });

    let handshake = envelope.handshake_request.map(|req| {
        Value::Message(
            Record::new()
                .with("public_key", Value::Bytes(req.public_key.to_vec()))
                .with("challenge", Value::Bytes(req.challenge.to_vec())),
        )
    });

    Record::new()
        .with_opt(
            "to_destination",
            envelope.to.as_ref().map(|d| Value::Message(destination_to_record(d))),
        )
        .with_opt(
            "from_destination",
            envelope.from.as_ref().map(|d| Value::Message(destination_to_record(d))),
        )
        .with_opt("payload", envelope.payload.clone().map(Value::Bytes))
        .with_opt("status", status)
        .with_opt("signature_data", signature)
        .with_opt("session_info_request", handshake)
        .with_opt("session_info", envelope.session_info.clone().map(Value::Bytes))
        .with_opt("request_uuid", envelope.request_uuid.map(|u| Value::Bytes(u.to_vec())))
        .with_opt("uuid", envelope.uuid.map(|u| Value::Bytes(u.to_vec())))
        .with_opt("flags", envelope.flags.map(|f| Value::Varint(f.into())))
}

fn envelope_from_record(record: &Record) -> Result<Envelope> {
    let stage = Stage::Envelope;

    let signature = match record.message("signature_data") {
        Some(sig) => Some(SignatureData {
            signer_public_key: opt_array(sig, "signer_public_key", stage)?,
            aead: match sig.message("aead") {
                Some(meta) => Some(AeadMetadata {
                    epoch: required_array(meta, "epoch", stage)?,
                    nonce: required_array(meta, "nonce", stage)?,
                    counter: opt_u32(meta, "counter", stage)?.unwrap_or(0),
                    expires_at: opt_u32(meta, "expires_at", stage)?,
                }),
                None => None,
            },
            session_info_tag: opt_array(sig, "session_info_tag", stage)?,
        }),
        None => None,
    };

    let status = match record.message("status") {
        Some(status) => {
            let code = opt_u32(status, "operation_status", stage)?.unwrap_or(0);
            Some(MessageStatus {
                operation: OperationStatus::from_u32(code).ok_or_else(|| {
                    Error::format(stage, format!("unknown operation status {code}"))
                })?,
                fault: Fault::from_u32(opt_u32(status, "fault", stage)?.unwrap_or(0)),
            })
        }
        None => None,
    };

    let handshake_request = match record.message("session_info_request") {
        Some(req) => Some(HandshakeRequest {
            public_key: required_array(req, "public_key", stage)?,
            challenge: required_array(req, "challenge", stage)?,
        }),
        None => None,
    };

    Ok(Envelope {
        to: record
            .message("to_destination")
            .map(destination_from_record)
            .transpose()?,
        from: record
            .message("from_destination")
            .map(destination_from_record)
            .transpose()?,
        payload: record.bytes("payload").map(<[u8]>::to_vec),
        status,
        signature,
        handshake_request,
        session_info: record.bytes("session_info").map(<[u8]>::to_vec),
        request_uuid: opt_array(record, "request_uuid", stage)?,
        uuid: opt_array(record, "uuid", stage)?,
        flags: opt_u32(record, "flags", stage)?,
    })
}

fn destination_from_record(record: &Record) -> Result<Destination> {
    let stage = Stage::Envelope;
    match (record.varint("domain"), record.bytes("routing_address")) {
        (Some(_), Some(_)) => Err(Error::format(
            stage,
            "destination carries both domain and routing address",
        )),
        (Some(code), None) => u8::try_from(code)
            .ok()
            .and_then(Domain::from_u8)
            .map(Destination::Domain)
            .ok_or_else(|| Error::format(stage, format!("unknown domain {code}"))),
        (None, Some(_)) => Ok(Destination::RoutingAddress(required_array(
            record,
            "routing_address",
            stage,
        )?)),
        (None, None) => Err(Error::format(stage, "empty destination")),
    }
}

fn opt_u32(record: &Record, name: &str, stage: Stage) -> Result<Option<u32>> {
    record
        .varint(name)
        .map(|v| {
            u32::try_from(v).map_err(|_| Error::format(stage, format!("{name} exceeds 32 bits")))
        })
        .transpose()
}

fn opt_array<const N: usize>(record: &Record, name: &str, stage: Stage) -> Result<Option<[u8; N]>> {
    record
        .bytes(name)
        .map(|b| {
            <[u8; N]>::try_from(b).map_err(|_| {
                Error::format(stage, format!("{name} must be {N} bytes, got {}", b.len()))
            })
        })
        .transpose()
}

fn required_array<const N: usize>(record: &Record, name: &str, stage: Stage) -> Result<[u8; N]> {
    opt_array(record, name, stage)?.ok_or_else(|| Error::format(stage, format!("missing {name}")))
}
