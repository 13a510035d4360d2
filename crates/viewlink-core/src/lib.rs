//! viewlink core: transport-agnostic delivery contracts and error types.
//!
//! This crate defines the wire-level shapes exchanged between a host and the
//! embedded views it drives: the payload envelope, the handshake/broadcast
//! messages, and the location bootstrap format. It carries no runtime
//! dependencies so the same contracts can be used on either side of a frame.
//!
//! Panics, `unwrap` and `expect` are denied here. Every fallible path
//! surfaces as `ViewLinkError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

pub use error::{Result, ViewLinkError};
pub use protocol::bus::ViewMessage;
pub use protocol::envelope::{ContentBlock, Envelope, EnvelopeKind};
pub use protocol::message::{FrameMessage, HostMessage, PROTOCOL_VERSION};
