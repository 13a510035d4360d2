//! Protocol modules.
//!
//! - `envelope`: the delivery envelope and its boundary validation.
//! - `message`: handshake and broadcast wire messages.
//! - `bus`: panel-to-panel messages relayed by a composite container.
//! - `bootstrap`: payloads embedded in a view location (no live protocol).
//!
//! All decoders are panic-free: malformed input is reported as
//! `ViewLinkError`, never by indexing or unwrapping.

pub mod bootstrap;
pub mod bus;
pub mod envelope;
pub mod message;
