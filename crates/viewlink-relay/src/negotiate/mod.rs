//! Transport negotiation and the per-frame connection state machine.
//!
//! `Negotiator::connect` turns a new frame into a `ConnectionHandle` backed by
//! one task that owns the frame's listener, the handshake deadline, and the
//! chosen transport.

mod connection;
mod negotiator;
mod registry;
pub mod transport;

pub use connection::{ConnectionHandle, ConnectionSnapshot, ConnectionStatus};
pub use negotiator::{BusSink, NegotiationPolicy, Negotiator};
pub use registry::ConnectionRegistry;
pub use transport::{SendOutcome, Transport, TransportKind};
