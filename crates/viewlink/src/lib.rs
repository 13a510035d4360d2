//! Top-level facade crate for viewlink.
//!
//! Re-exports the protocol contracts and the relay library so hosts and
//! embedded views can depend on a single crate.

pub mod core {
    pub use viewlink_core::*;
}

pub mod relay {
    pub use viewlink_relay::*;
}
