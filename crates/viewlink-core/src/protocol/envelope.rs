//! Payload envelope: a tagged delivery plus an opaque structured payload.
//!
//! `structuredContent` belongs to the consuming widget and is never inspected
//! here. Only the tag fields (`kind`, `routingKey`) are checked, and only at
//! the boundary where raw values enter (`Envelope::from_value`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, ViewLinkError};

/// Wire value of [`EnvelopeKind::ToolResult`].
pub const TOOL_RESULT_KIND: &str = "tool-result";

/// Envelope tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnvelopeKind {
    #[default]
    #[serde(rename = "tool-result")]
    ToolResult,
}

impl EnvelopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::ToolResult => TOOL_RESULT_KIND,
        }
    }
}

/// One block of the unstructured `content` array (`{ type, text?, .. }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Block type (field name is `type` in JSON).
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Any other keys, preserved as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".into(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

/// Delivery envelope.
///
/// On receipt `kind` defaults to `tool-result` so frames accept the legacy
/// container message that omits it; hosts validate with [`Envelope::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Opaque widget payload. May be any JSON value, including `null`.
    #[serde(default)]
    pub structured_content: Value,
    /// Target child id; only set for composite delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
}

impl Envelope {
    pub fn tool_result(structured_content: Value) -> Self {
        Self {
            kind: EnvelopeKind::ToolResult,
            content: Vec::new(),
            structured_content,
            routing_key: None,
        }
    }

    pub fn with_content(mut self, content: Vec<ContentBlock>) -> Self {
        self.content = content;
        self
    }

    pub fn with_routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    /// Parse a raw value, checking the tag fields the protocol reads.
    pub fn from_value(value: Value) -> Result<Self> {
        {
            let obj = value
                .as_object()
                .ok_or_else(|| malformed("envelope must be an object"))?;

            match obj.get("kind") {
                None | Some(Value::Null) => return Err(malformed("missing kind")),
                Some(Value::String(k)) if k == TOOL_RESULT_KIND => {}
                Some(Value::String(k)) => return Err(malformed(format!("unsupported kind: {k}"))),
                Some(_) => return Err(malformed("kind must be a string")),
            }

            match obj.get("routingKey") {
                None | Some(Value::Null) | Some(Value::String(_)) => {}
                Some(_) => return Err(malformed("routingKey must be a string")),
            }

            match obj.get("content") {
                None | Some(Value::Array(_)) => {}
                Some(_) => return Err(malformed("content must be an array")),
            }
        }

        serde_json::from_value(value).map_err(|e| malformed(format!("invalid envelope: {e}")))
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| ViewLinkError::Internal(format!("envelope encode failed: {e}")))
    }
}

fn malformed(msg: impl Into<String>) -> ViewLinkError {
    ViewLinkError::MalformedEnvelope(msg.into())
}
