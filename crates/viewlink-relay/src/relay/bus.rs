//! Composite relay bus: logical child id -> live frame connection.
//!
//! Ids are chosen by the container and outlive frames. The last envelope
//! addressed to an id is cached by id, so a child whose frame is destroyed and
//! recreated gets its payload replayed without the host resending it.
//!
//! Mounted children are also linked as bus peers, so panel bus messages
//! from one child reach its siblings (see `peers`).
//!
//! The bus is owned by exactly one container; all mutation goes through
//! `&mut self`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use viewlink_core::protocol::bus::ViewMessage;
use viewlink_core::protocol::envelope::Envelope;

use crate::frame::{FrameHandle, FrameId, FramePort};
use crate::negotiate::{BusSink, ConnectionHandle, Negotiator};
use crate::relay::peers::{LinkFilter, PeerRelay};

/// Where a delivery ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Queued on the child's live connection.
    Live,
    /// No live registration; cached for the next mount under this id.
    Cached,
    /// Malformed, sent to a live child which moved to `Error`; nothing cached.
    Rejected,
    /// Malformed and not addressed to a live child; nothing cached.
    Dropped,
}

impl Routed {
    pub fn as_str(self) -> &'static str {
        match self {
            Routed::Live => "live",
            Routed::Cached => "cached",
            Routed::Rejected => "rejected",
            Routed::Dropped => "dropped",
        }
    }
}

/// One mounted child.
pub struct ChildRegistration {
    pub id: String,
    frame: Arc<dyn FrameHandle>,
    connection: ConnectionHandle,
    last_delivered: Option<Envelope>,
}

impl ChildRegistration {
    pub fn frame_id(&self) -> FrameId {
        self.frame.id()
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Most recent envelope sent to this child.
    pub fn last_delivered(&self) -> Option<&Envelope> {
        self.last_delivered.as_ref()
    }

    fn teardown(&self) {
        self.connection.close();
    }
}

pub struct RelayBus {
    negotiator: Arc<Negotiator>,
    children: HashMap<String, ChildRegistration>,
    replay: HashMap<String, Envelope>,
    peers: Arc<PeerRelay>,
}

impl RelayBus {
    pub fn new(negotiator: Arc<Negotiator>) -> Self {
        let peers = Arc::new(PeerRelay::new(Arc::clone(negotiator.metrics())));
        Self {
            negotiator,
            children: HashMap::new(),
            replay: HashMap::new(),
            peers,
        }
    }

    /// Mount `port` under `id`, replacing any prior child for that id.
    ///
    /// The prior frame is torn down before the new one is adopted. If a
    /// payload was addressed to `id` before, it is queued for replay and goes
    /// out as soon as the new frame can take it.
    pub fn register(&mut self, id: impl Into<String>, port: FramePort) -> ConnectionHandle {
        let id = id.into();
        let frame_id = port.frame_id();

        if let Some(prev) = self.children.remove(&id) {
            tracing::debug!(child = %id, frame = %prev.frame_id(), "replacing child frame");
            prev.teardown();
        }

        // a frame backs at most one child
        let holders: Vec<String> = self
            .children
            .iter()
            .filter(|(_, c)| c.frame_id() == frame_id)
            .map(|(k, _)| k.clone())
            .collect();
        for other in holders {
            tracing::warn!(child = %other, frame = %frame_id, "frame re-registered under another id");
            self.unregister(&other);
        }

        let frame = Arc::clone(&port.handle);
        let sink: Arc<dyn BusSink> = self.peers.clone();
        let connection = self.negotiator.connect_with_bus(port, id.clone(), sink);
        self.peers.link(&id, connection.clone());

        let last_delivered = self.replay.get(&id).cloned();
        if let Some(env) = &last_delivered {
            tracing::debug!(child = %id, "replaying last payload");
            self.negotiator.metrics().replays.inc();
            connection.deliver(env.clone());
        }

        self.children.insert(
            id.clone(),
            ChildRegistration {
                id,
                frame,
                connection: connection.clone(),
                last_delivered,
            },
        );
        connection
    }

    /// Remove the child for `id`. Queued deliveries to it are discarded.
    /// The replay cache for `id` is kept.
    pub fn unregister(&mut self, id: &str) -> bool {
        match self.children.remove(id) {
            Some(child) => {
                self.peers.unlink(id);
                child.teardown();
                true
            }
            None => false,
        }
    }

    /// Remove the child for `id` only if `frame` still backs it.
    pub fn unregister_frame(&mut self, id: &str, frame: FrameId) -> bool {
        if self.children.get(id).map(|c| c.frame_id()) != Some(frame) {
            return false;
        }
        self.unregister(id)
    }

    /// Deliver to child `id`.
    ///
    /// The envelope is cached before anything is sent, so a mount racing this
    /// call always replays a consistent value.
    pub fn deliver(&mut self, id: &str, envelope: Envelope) -> Routed {
        let envelope = envelope.with_routing_key(id);
        self.replay.insert(id.to_string(), envelope.clone());

        let Some(child) = self.children.get_mut(id) else {
            tracing::debug!(child = %id, "no live child, payload cached");
            self.negotiator.metrics().dead_target.inc();
            return Routed::Cached;
        };

        child.last_delivered = Some(envelope.clone());
        if child.connection.deliver(envelope) {
            Routed::Live
        } else {
            // connection ended under us (frame went away)
            Routed::Cached
        }
    }

    /// Deliver a raw, not yet validated envelope.
    ///
    /// Malformed input never replaces the cached payload. Sent to a live
    /// child, it moves that child's connection to `Error` and is reported as
    /// `Rejected`.
    pub fn deliver_value(&mut self, id: &str, value: Value) -> Routed {
        match Envelope::from_value(value.clone()) {
            Ok(env) => self.deliver(id, env),
            Err(e) => {
                if let Some(child) = self.children.get(id) {
                    if child.connection.deliver_value(value) {
                        return Routed::Rejected;
                    }
                }
                tracing::warn!(child = %id, error = %e, "malformed envelope dropped");
                self.negotiator.metrics().malformed.inc();
                Routed::Dropped
            }
        }
    }

    /// Last payload addressed to `id`, whether or not a child is mounted.
    pub fn last_delivered(&self, id: &str) -> Option<&Envelope> {
        self.replay.get(id)
    }

    pub fn child(&self, id: &str) -> Option<&ChildRegistration> {
        self.children.get(id)
    }

    pub fn connection(&self, id: &str) -> Option<&ConnectionHandle> {
        self.children.get(id).map(|c| &c.connection)
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.children.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.children.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn negotiator(&self) -> &Arc<Negotiator> {
        &self.negotiator
    }

    pub fn peers(&self) -> &Arc<PeerRelay> {
        &self.peers
    }

    /// Restrict which siblings see which bus messages.
    pub fn set_link_filter<F>(&mut self, filter: F)
    where
        F: Fn(&ViewMessage, &str, &str) -> bool + Send + Sync + 'static,
    {
        let filter: LinkFilter = Arc::new(filter);
        self.peers.set_filter(Some(filter));
    }

    pub fn clear_link_filter(&mut self) {
        self.peers.set_filter(None);
    }

    /// Container unmount: close every child and forget every payload.
    pub fn teardown(&mut self) {
        self.peers.clear();
        for (_, child) in self.children.drain() {
            child.teardown();
        }
        self.replay.clear();
    }
}

impl Drop for RelayBus {
    fn drop(&mut self) {
        self.teardown();
    }
}
