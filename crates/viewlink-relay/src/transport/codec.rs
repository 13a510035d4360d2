//! Decode-once codec for socket-backed frames.
//!
//! - Text frames => `FrameMessage`
//! - Binary frames are not part of the protocol
//! - Ping/Pong/Close are surfaced for lifecycle management

use axum::extract::ws::Message;
use viewlink_core::{
    error::{Result, ViewLinkError},
    protocol::message::{decode_frame_message, FrameMessage, HostMessage},
};

#[derive(Debug)]
pub enum Inbound {
    Frame(FrameMessage),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

pub fn decode(msg: Message) -> Result<Inbound> {
    match msg {
        Message::Text(s) => Ok(Inbound::Frame(decode_frame_message(&s)?)),
        Message::Binary(b) => Err(ViewLinkError::BadRequest(format!(
            "binary frames are not supported ({} bytes)",
            b.len()
        ))),
        Message::Ping(v) => Ok(Inbound::Ping(v)),
        Message::Pong(v) => Ok(Inbound::Pong(v)),
        Message::Close(_) => Ok(Inbound::Close),
    }
}

pub fn encode(msg: &HostMessage) -> Result<Message> {
    Ok(Message::Text(msg.to_text()?))
}
