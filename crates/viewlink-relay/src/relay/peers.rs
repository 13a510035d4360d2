//! Panel-to-panel relay.
//!
//! Every mounted child is a peer. A bus message from one peer goes to every
//! other peer the link filter lets through, never back to its sender. The
//! sender is identified by the id its connection was registered under, and
//! that id overwrites whatever `source` the frame put in the message.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use viewlink_core::protocol::bus::{ViewMessage, BUS_VERSION};
use viewlink_core::protocol::message::HostMessage;

use crate::negotiate::{BusSink, ConnectionHandle};
use crate::obs::RelayMetrics;

/// `(message, source_id, target_id) -> relay?`
pub type LinkFilter = Arc<dyn Fn(&ViewMessage, &str, &str) -> bool + Send + Sync>;

pub struct PeerRelay {
    peers: DashMap<String, ConnectionHandle>,
    filter: RwLock<Option<LinkFilter>>,
    metrics: Arc<RelayMetrics>,
}

impl PeerRelay {
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        Self {
            peers: DashMap::new(),
            filter: RwLock::new(None),
            metrics,
        }
    }

    pub(crate) fn link(&self, id: &str, conn: ConnectionHandle) {
        self.peers.insert(id.to_string(), conn);
    }

    pub(crate) fn unlink(&self, id: &str) {
        self.peers.remove(id);
    }

    pub(crate) fn clear(&self) {
        self.peers.clear();
    }

    /// Replace the link filter; `None` relays everything.
    pub fn set_filter(&self, filter: Option<LinkFilter>) {
        let mut slot = self.filter.write().unwrap_or_else(|e| e.into_inner());
        *slot = filter;
    }

    fn filter(&self) -> Option<LinkFilter> {
        self.filter.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Relay `message` from `source` to the other peers. Returns how many
    /// peers it was queued for.
    pub fn relay(&self, source: &str, message: ViewMessage) -> usize {
        let message = message.with_source(source);
        let filter = self.filter();

        let targets: Vec<(String, ConnectionHandle)> = self
            .peers
            .iter()
            .filter(|e| e.key() != source)
            .filter(|e| filter.as_ref().map_or(true, |f| f(&message, source, e.key().as_str())))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut sent = 0;
        for (target, conn) in targets {
            let msg = HostMessage::Bus {
                bus_version: BUS_VERSION,
                source_panel: source.to_string(),
                message: message.clone(),
            };
            if conn.relay(msg) {
                sent += 1;
                self.metrics.bus_relayed.inc();
            } else {
                tracing::debug!(%source, %target, "bus peer already closed");
            }
        }
        tracing::debug!(%source, kind = message.type_str(), peers = sent, "bus message relayed");
        sent
    }
}

impl BusSink for PeerRelay {
    fn publish(&self, source: &str, message: ViewMessage) {
        // a closed registration no longer speaks for its id
        if !self.peers.contains_key(source) {
            tracing::debug!(%source, "bus message from unlinked panel dropped");
            return;
        }
        self.relay(source, message);
    }
}
