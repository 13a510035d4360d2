//! Host <-> frame wire messages.
//!
//! Two conventions share one channel, discriminated by `type`:
//! - handshake: `viewlink:ready` -> `viewlink:ack` -> `viewlink:request-content`
//!   -> `viewlink:reply`, then `viewlink:update` for re-deliveries.
//! - broadcast: unsolicited `mcp-app:tool-result` after the frame loads, no ack.
//!
//! `viewlink:bus` travels both ways and carries panel bus messages; it is not
//! a delivery and does not depend on the negotiated transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ViewLinkError};
use crate::protocol::bus::{ViewMessage, BUS_VERSION};
use crate::protocol::envelope::Envelope;

/// Handshake protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u8 = 1;

fn default_protocol_version() -> u8 {
    PROTOCOL_VERSION
}

fn default_bus_version() -> u8 {
    BUS_VERSION
}

/// Host -> frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostMessage {
    /// Acknowledges a readiness announcement.
    #[serde(rename = "viewlink:ack", rename_all = "camelCase")]
    Ack { protocol_version: u8 },
    /// Directed reply to exactly one content request.
    #[serde(rename = "viewlink:reply", rename_all = "camelCase")]
    Reply { request_id: u64, envelope: Envelope },
    /// Re-delivery over an established handshake.
    #[serde(rename = "viewlink:update")]
    Update { envelope: Envelope },
    /// Unsolicited delivery (legacy container convention).
    #[serde(rename = "mcp-app:tool-result")]
    ToolResult(Envelope),
    /// Panel bus message relayed from a sibling panel.
    #[serde(rename = "viewlink:bus", rename_all = "camelCase")]
    Bus {
        #[serde(default = "default_bus_version")]
        bus_version: u8,
        source_panel: String,
        message: ViewMessage,
    },
}

impl HostMessage {
    /// Wire `type` tag.
    pub fn type_str(&self) -> &'static str {
        match self {
            HostMessage::Ack { .. } => "viewlink:ack",
            HostMessage::Reply { .. } => "viewlink:reply",
            HostMessage::Update { .. } => "viewlink:update",
            HostMessage::ToolResult(_) => "mcp-app:tool-result",
            HostMessage::Bus { .. } => "viewlink:bus",
        }
    }

    /// Carried envelope, if any.
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            HostMessage::Ack { .. } | HostMessage::Bus { .. } => None,
            HostMessage::Reply { envelope, .. } | HostMessage::Update { envelope } => Some(envelope),
            HostMessage::ToolResult(envelope) => Some(envelope),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| ViewLinkError::BadRequest(format!("invalid host message: {e}")))
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| ViewLinkError::Internal(format!("host message encode failed: {e}")))
    }

    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ViewLinkError::Internal(format!("host message encode failed: {e}")))
    }
}

/// Frame -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FrameMessage {
    /// Readiness announcement.
    #[serde(rename = "viewlink:ready", rename_all = "camelCase")]
    Ready {
        #[serde(default = "default_protocol_version")]
        protocol_version: u8,
    },
    /// Explicit request for content, answered once.
    #[serde(rename = "viewlink:request-content", rename_all = "camelCase")]
    RequestContent { request_id: u64 },
    /// Panel bus message for the sibling panels.
    #[serde(rename = "viewlink:bus", rename_all = "camelCase")]
    Bus {
        #[serde(default = "default_bus_version")]
        bus_version: u8,
        message: ViewMessage,
    },
}

impl FrameMessage {
    pub fn ready() -> Self {
        FrameMessage::Ready {
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Panel bus message at the current bus version.
    pub fn bus(message: ViewMessage) -> Self {
        FrameMessage::Bus {
            bus_version: BUS_VERSION,
            message,
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| ViewLinkError::BadRequest(format!("invalid frame message: {e}")))
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| ViewLinkError::Internal(format!("frame message encode failed: {e}")))
    }

    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ViewLinkError::Internal(format!("frame message encode failed: {e}")))
    }
}

/// Decode a frame message from JSON text.
pub fn decode_frame_message(s: &str) -> Result<FrameMessage> {
    serde_json::from_str(s)
        .map_err(|e| ViewLinkError::BadRequest(format!("invalid frame message json: {e}")))
}
