//! Socket transport for remote frames.
//!
//! Exposes the WS upgrade handler and the codec that decodes frame messages
//! once before they reach the negotiator.

pub mod codec;
pub mod ws;
