//! Shared application state for the relay server.
//!
//! One `RelayBus` serves every socket frame; panels declared in config are
//! seeded into its replay cache so the first frame mounted under a panel id
//! gets that panel's payload.

use std::sync::Arc;

use tokio::sync::Mutex;

use viewlink_core::error::Result;

use crate::config::RelayConfig;
use crate::negotiate::{NegotiationPolicy, Negotiator};
use crate::obs::RelayMetrics;
use crate::relay::RelayBus;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
    negotiator: Arc<Negotiator>,
    bus: Arc<Mutex<RelayBus>>,
    metrics: Arc<RelayMetrics>,
}

struct AppStateInner {
    cfg: RelayConfig,
}

impl AppState {
    /// Build application state. Returns Result so main can fail without panicking.
    pub fn new(cfg: RelayConfig) -> Result<Self> {
        cfg.validate()?;

        let metrics = Arc::new(RelayMetrics::new());
        let negotiator = Arc::new(Negotiator::new(
            NegotiationPolicy::from(&cfg.negotiation),
            Arc::clone(&metrics),
        ));

        let mut bus = RelayBus::new(Arc::clone(&negotiator));
        for p in &cfg.panels {
            bus.deliver(&p.id, p.envelope());
            tracing::info!(panel = %p.id, source = %p.source_location, "panel seeded");
        }

        Ok(Self {
            inner: Arc::new(AppStateInner { cfg }),
            negotiator,
            bus: Arc::new(Mutex::new(bus)),
            metrics,
        })
    }

    pub fn cfg(&self) -> &RelayConfig {
        &self.inner.cfg
    }

    pub fn bus(&self) -> &Mutex<RelayBus> {
        &self.bus
    }

    pub fn negotiator(&self) -> Arc<Negotiator> {
        Arc::clone(&self.negotiator)
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.metrics)
    }
}
