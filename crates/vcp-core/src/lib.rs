//! Core protocol engine for the vehicle command protocol.
//!
//! - Schema-driven envelope codec (protobuf wire format)
//! - Handshake and command authentication metadata
//! - Per-domain session state machine with counter, epoch and replay
//!   bookkeeping
//!
//! Everything here is sans-IO. Transport, timers and task management live in
//! `vcp-transport`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod error;
pub mod fault;
pub mod metadata;
pub mod record;
pub mod schema;
pub mod session;
pub mod wire;

pub use envelope::{Domain, Envelope, EnvelopeCodec, SessionInfo};
pub use error::{Error, ErrorKind, Result, Stage};
pub use fault::{Fault, OperationStatus};
pub use schema::Schema;
pub use session::{CommandResponse, PreparedCommand, Session, SessionConfig, State};
