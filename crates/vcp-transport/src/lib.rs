//! Link framing and async session driver for the vehicle command protocol.
//!
//! - [`framer`]: length-prefixed block framing with adaptive block size and
//!   write mode
//! - [`reassembly`]: inbound fragment reassembly with stale-buffer discard
//! - [`connection`]: per-domain sessions over one link, response routing and
//!   bounded waits
//!
//! The link itself is abstracted by [`Link`]; a recording implementation and
//! a vehicle simulator live in `mock` (tests and the `mock` feature).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod error;
pub mod framer;
pub mod link;
pub mod reassembly;
pub mod retry;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use connection::{ConnectionConfig, VehicleConnection};
pub use error::{Error, Result};
pub use framer::{Framer, FramerConfig};
pub use link::{Link, LinkError, WriteMode};
pub use reassembly::Reassembler;
pub use retry::{handshake_with_retry, RetryPolicy};
