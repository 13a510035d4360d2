//! Panel bus messages.
//!
//! A panel inside a composite container can address its siblings (selection,
//! filtering, highlighting...). The container relays each message to every
//! other linked panel and stamps `source` with the sender's panel id, so a
//! frame cannot speak for another panel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Panel bus message version spoken by this crate.
pub const BUS_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Csv,
    Json,
}

/// One panel-to-panel message. `source` may be left empty by the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ViewMessage {
    Select {
        #[serde(default)]
        source: String,
        ids: Vec<String>,
    },
    Filter {
        #[serde(default)]
        source: String,
        field: String,
        #[serde(default)]
        value: Value,
    },
    Highlight {
        #[serde(default)]
        source: String,
        id: String,
    },
    Navigate {
        #[serde(default)]
        source: String,
        target: String,
        #[serde(default)]
        params: Map<String, Value>,
    },
    ExportRequest {
        #[serde(default)]
        source: String,
        format: ExportFormat,
    },
}

impl ViewMessage {
    /// Wire `type` tag.
    pub fn type_str(&self) -> &'static str {
        match self {
            ViewMessage::Select { .. } => "select",
            ViewMessage::Filter { .. } => "filter",
            ViewMessage::Highlight { .. } => "highlight",
            ViewMessage::Navigate { .. } => "navigate",
            ViewMessage::ExportRequest { .. } => "export-request",
        }
    }

    pub fn source(&self) -> &str {
        match self {
            ViewMessage::Select { source, .. }
            | ViewMessage::Filter { source, .. }
            | ViewMessage::Highlight { source, .. }
            | ViewMessage::Navigate { source, .. }
            | ViewMessage::ExportRequest { source, .. } => source,
        }
    }

    pub fn with_source(mut self, panel: impl Into<String>) -> Self {
        let panel = panel.into();
        match &mut self {
            ViewMessage::Select { source, .. }
            | ViewMessage::Filter { source, .. }
            | ViewMessage::Highlight { source, .. }
            | ViewMessage::Navigate { source, .. }
            | ViewMessage::ExportRequest { source, .. } => *source = panel,
        }
        self
    }
}
