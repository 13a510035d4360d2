//! viewlink relay library entry.
//!
//! Host side of the delivery protocol (negotiator, relay bus, composite
//! containers), the in-process delivery client, and the socket server that
//! mounts remote views as frames. Consumed by the binary (`main.rs`) and by
//! integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod app_state;
pub mod client;
pub mod config;
pub mod frame;
pub mod negotiate;
pub mod obs;
pub mod ops;
pub mod relay;
pub mod router;
pub mod transport;
