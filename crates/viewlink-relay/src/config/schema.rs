use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use viewlink_core::error::{Result, ViewLinkError};

use crate::relay::PanelManifest;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    pub version: u32,

    #[serde(default)]
    pub negotiation: NegotiationSection,

    #[serde(default)]
    pub server: ServerSection,

    /// Composite manifest seeded into the bus at startup.
    #[serde(default)]
    pub panels: Vec<PanelManifest>,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ViewLinkError::UnsupportedVersion);
        }

        self.negotiation.validate()?;
        self.server.validate()?;

        let mut seen = HashSet::new();
        for p in &self.panels {
            if p.id.trim().is_empty() {
                return Err(ViewLinkError::BadRequest("panels[].id must not be empty".into()));
            }
            if !seen.insert(p.id.as_str()) {
                return Err(ViewLinkError::BadRequest(format!(
                    "duplicate panel id: {}",
                    p.id
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NegotiationSection {
    /// How long a new frame has to announce readiness before broadcast is used.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Outer bound callers apply while waiting for a first delivery.
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
}

impl Default for NegotiationSection {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            load_timeout_ms: default_load_timeout_ms(),
        }
    }
}

impl NegotiationSection {
    pub fn validate(&self) -> Result<()> {
        if !(50..=60000).contains(&self.handshake_timeout_ms) {
            return Err(ViewLinkError::BadRequest(
                "negotiation.handshake_timeout_ms must be between 50 and 60000".into(),
            ));
        }
        if self.load_timeout_ms > 600000 {
            return Err(ViewLinkError::BadRequest(
                "negotiation.load_timeout_ms must be at most 600000".into(),
            ));
        }
        if self.load_timeout_ms <= self.handshake_timeout_ms {
            return Err(ViewLinkError::BadRequest(
                "negotiation.load_timeout_ms must be greater than handshake_timeout_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

fn default_handshake_timeout_ms() -> u64 {
    3000
}
fn default_load_timeout_ms() -> u64 {
    15000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        if !(5000..=120000).contains(&self.ping_interval_ms) {
            return Err(ViewLinkError::BadRequest(
                "server.ping_interval_ms must be between 5000 and 120000".into(),
            ));
        }
        if !(10000..=600000).contains(&self.idle_timeout_ms) {
            return Err(ViewLinkError::BadRequest(
                "server.idle_timeout_ms must be between 10000 and 600000".into(),
            ));
        }
        if self.idle_timeout_ms <= self.ping_interval_ms {
            return Err(ViewLinkError::BadRequest(
                "server.idle_timeout_ms must be greater than ping_interval_ms".into(),
            ));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_ping_interval_ms() -> u64 {
    20000
}
fn default_idle_timeout_ms() -> u64 {
    60000
}
