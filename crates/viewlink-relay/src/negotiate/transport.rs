//! Transports: how an envelope reaches one frame.
//!
//! A transport is chosen once per frame instance and never re-dispatched per
//! message. The connection task only ever calls `send` on whatever was chosen.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;

use viewlink_core::error::Result;
use viewlink_core::protocol::envelope::Envelope;
use viewlink_core::protocol::message::{HostMessage, PROTOCOL_VERSION};

use crate::frame::FrameHandle;

/// Transport tag carried by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Negotiation still running.
    #[default]
    Unresolved,
    /// Announce / ack / request / reply.
    Handshake,
    /// Unsolicited send after each load signal.
    Broadcast,
    /// Payload taken from the view's own location; no live protocol.
    Direct,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Unresolved => "unresolved",
            TransportKind::Handshake => "handshake",
            TransportKind::Broadcast => "broadcast",
            TransportKind::Direct => "direct",
        }
    }
}

/// Result of handing an envelope to a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transport's send primitive accepted it.
    Sent,
    /// The frame cannot take it yet; the caller keeps it for later.
    Deferred,
}

pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    fn send(&mut self, envelope: &Envelope) -> Result<SendOutcome>;

    /// The frame asked for content. `true` means a held payload should go now.
    fn content_requested(&mut self, _request_id: u64) -> bool {
        false
    }

    /// The frame's load signal fired. `true` means the last payload should go now.
    fn frame_loaded(&mut self) -> bool {
        false
    }
}

/// Directed replies after the frame announced readiness.
pub struct HandshakeTransport {
    frame: Arc<dyn FrameHandle>,
    pending: VecDeque<u64>,
    served: bool,
}

impl HandshakeTransport {
    pub fn new(frame: Arc<dyn FrameHandle>) -> Self {
        Self {
            frame,
            pending: VecDeque::new(),
            served: false,
        }
    }

    /// Acknowledge the readiness announcement.
    pub fn ack(&self) -> Result<()> {
        self.frame.post(&HostMessage::Ack {
            protocol_version: PROTOCOL_VERSION,
        })
    }
}

impl Transport for HandshakeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Handshake
    }

    fn send(&mut self, envelope: &Envelope) -> Result<SendOutcome> {
        if !self.pending.is_empty() {
            // each open request is answered exactly once
            while let Some(request_id) = self.pending.pop_front() {
                self.frame.post(&HostMessage::Reply {
                    request_id,
                    envelope: envelope.clone(),
                })?;
            }
            self.served = true;
            return Ok(SendOutcome::Sent);
        }

        if self.served {
            self.frame.post(&HostMessage::Update {
                envelope: envelope.clone(),
            })?;
            return Ok(SendOutcome::Sent);
        }

        Ok(SendOutcome::Deferred)
    }

    fn content_requested(&mut self, request_id: u64) -> bool {
        if self.pending.contains(&request_id) {
            return false;
        }
        self.pending.push_back(request_id);
        true
    }
}

/// Unsolicited tool results, sent once the frame has loaded.
pub struct BroadcastTransport {
    frame: Arc<dyn FrameHandle>,
    loaded: bool,
}

impl BroadcastTransport {
    /// `loaded` carries a load signal seen while negotiation was still running.
    pub fn new(frame: Arc<dyn FrameHandle>, loaded: bool) -> Self {
        Self { frame, loaded }
    }
}

impl Transport for BroadcastTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Broadcast
    }

    fn send(&mut self, envelope: &Envelope) -> Result<SendOutcome> {
        if !self.loaded {
            return Ok(SendOutcome::Deferred);
        }
        self.frame.post(&HostMessage::ToolResult(envelope.clone()))?;
        Ok(SendOutcome::Sent)
    }

    fn frame_loaded(&mut self) -> bool {
        // reused frame: resend
        self.loaded = true;
        true
    }
}
