//! Transport negotiation and the per-frame connection task.
//!
//! Per frame:
//! - readiness announced before the handshake deadline -> handshake transport
//! - deadline first -> broadcast transport (send on every load signal)
//! - the choice is final for the frame instance
//!
//! A frame that never announces and never loads stays `connecting`; callers
//! bound that with `ConnectionHandle::wait_delivered`.
//!
//! Panel bus messages from the frame bypass negotiation and go to the
//! connection's `BusSink`, if it has one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use viewlink_core::error::ViewLinkError;
use viewlink_core::protocol::bus::ViewMessage;
use viewlink_core::protocol::envelope::Envelope;
use viewlink_core::protocol::message::{FrameMessage, HostMessage, PROTOCOL_VERSION};

use crate::config::NegotiationSection;
use crate::frame::{FrameEvent, FrameHandle, FramePort};
use crate::negotiate::connection::{Command, ConnectionHandle, ConnectionSnapshot, ConnectionStatus};
use crate::negotiate::registry::ConnectionRegistry;
use crate::negotiate::transport::{BroadcastTransport, HandshakeTransport, SendOutcome, Transport};
use crate::obs::RelayMetrics;

/// Negotiation timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationPolicy {
    pub handshake_timeout: Duration,
    /// Outer bound for callers waiting on a first delivery; not enforced here.
    pub load_timeout: Duration,
}

impl Default for NegotiationPolicy {
    fn default() -> Self {
        Self::from(&NegotiationSection::default())
    }
}

impl From<&NegotiationSection> for NegotiationPolicy {
    fn from(cfg: &NegotiationSection) -> Self {
        Self {
            handshake_timeout: cfg.handshake_timeout(),
            load_timeout: cfg.load_timeout(),
        }
    }
}

/// Receives panel bus messages posted by connected frames.
pub trait BusSink: Send + Sync {
    /// `source` is the id the frame was connected under.
    fn publish(&self, source: &str, message: ViewMessage);
}

/// Where a connection forwards its frame's bus messages.
struct BusLink {
    source: String,
    sink: Arc<dyn BusSink>,
}

/// Creates connections, one per frame instance.
pub struct Negotiator {
    policy: NegotiationPolicy,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<RelayMetrics>,
}

impl Negotiator {
    pub fn new(policy: NegotiationPolicy, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            policy,
            registry: Arc::new(ConnectionRegistry::new()),
            metrics,
        }
    }

    pub fn policy(&self) -> NegotiationPolicy {
        self.policy
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Start negotiating with a newly created frame.
    ///
    /// A live connection for the same frame is closed first. Must be called
    /// from within a tokio runtime.
    pub fn connect(&self, port: FramePort) -> ConnectionHandle {
        self.spawn(port, None)
    }

    /// Like `connect`; bus messages from the frame are published to `sink`
    /// under `source`.
    pub fn connect_with_bus(
        &self,
        port: FramePort,
        source: impl Into<String>,
        sink: Arc<dyn BusSink>,
    ) -> ConnectionHandle {
        let link = BusLink {
            source: source.into(),
            sink,
        };
        self.spawn(port, Some(link))
    }

    fn spawn(&self, port: FramePort, bus: Option<BusLink>) -> ConnectionHandle {
        let FramePort { handle: frame, events } = port;
        let frame_id = frame.id();

        let (tx, commands) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let snap = ConnectionSnapshot::new(frame_id);
        let (state_tx, state_rx) = watch::channel(snap.clone());
        let conn = ConnectionHandle::new(frame_id, tx, state_rx, Arc::clone(&closed));

        let (created_seq, superseded) = self.registry.insert(frame_id, conn.clone());
        if let Some(prev) = superseded {
            tracing::debug!(frame = %frame_id, "superseding live connection");
            prev.close();
            self.metrics.superseded.inc();
        }
        self.metrics.live_connections.inc();

        let task = ConnectionTask {
            frame,
            events,
            commands,
            closed,
            state: state_tx,
            snap,
            transport: None,
            loaded: false,
            bus,
            registry: Arc::clone(&self.registry),
            created_seq,
            metrics: Arc::clone(&self.metrics),
        };

        let span = tracing::info_span!("frame", frame = %frame_id);
        tokio::spawn(task.run(self.policy.handshake_timeout).instrument(span));

        conn
    }
}

struct ConnectionTask {
    frame: Arc<dyn FrameHandle>,
    events: mpsc::UnboundedReceiver<FrameEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    closed: Arc<AtomicBool>,
    state: watch::Sender<ConnectionSnapshot>,
    snap: ConnectionSnapshot,
    transport: Option<Box<dyn Transport>>,
    /// Load signal seen before the transport was resolved.
    loaded: bool,
    bus: Option<BusLink>,
    registry: Arc<ConnectionRegistry>,
    created_seq: u64,
    metrics: Arc<RelayMetrics>,
}

impl ConnectionTask {
    async fn run(mut self, handshake_timeout: Duration) {
        self.snap.status = ConnectionStatus::Connecting;
        self.publish();

        let deadline = tokio::time::sleep(handshake_timeout);
        tokio::pin!(deadline);

        loop {
            if self.is_closed() {
                break;
            }

            tokio::select! {
                biased;

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(Command::Deliver(env)) => self.on_deliver(env),
                        Some(Command::DeliverRaw(v)) => match Envelope::from_value(v) {
                            Ok(env) => self.on_deliver(env),
                            Err(e) => self.on_malformed(e),
                        },
                        Some(Command::Relay(msg)) => self.on_relay(msg),
                        Some(Command::Close) | None => break,
                    }
                }

                ev = self.events.recv() => {
                    match ev {
                        Some(FrameEvent::Message(msg)) => self.on_message(msg),
                        Some(FrameEvent::Loaded) => self.on_loaded(),
                        Some(FrameEvent::Unloaded) | None => {
                            tracing::debug!("frame unloaded");
                            break;
                        }
                    }
                }

                _ = &mut deadline, if self.transport.is_none() => {
                    self.resolve_broadcast();
                }
            }
        }

        self.finish();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn publish(&self) {
        self.state.send_replace(self.snap.clone());
    }

    fn on_deliver(&mut self, env: Envelope) {
        self.snap.last_payload = Some(env);
        self.snap.last_error = None;
        if self.snap.status == ConnectionStatus::Error {
            self.snap.status = if self.transport.is_some() {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Connecting
            };
        }
        self.flush();
        self.publish();
    }

    fn on_malformed(&mut self, e: ViewLinkError) {
        tracing::warn!(error = %e, "malformed envelope dropped");
        self.metrics.malformed.inc();
        self.snap.status = ConnectionStatus::Error;
        self.snap.last_error = Some(e.to_string());
        self.publish();
    }

    fn on_message(&mut self, msg: FrameMessage) {
        match msg {
            FrameMessage::Ready { protocol_version } => self.on_ready(protocol_version),
            FrameMessage::RequestContent { request_id } => {
                let Some(transport) = self.transport.as_mut() else {
                    tracing::debug!(request_id, "content request before readiness ignored");
                    return;
                };
                if transport.content_requested(request_id) {
                    self.flush();
                    self.publish();
                } else {
                    tracing::debug!(request_id, transport = transport.kind().as_str(), "content request ignored");
                }
            }
            FrameMessage::Bus { message, .. } => match &self.bus {
                Some(link) => link.sink.publish(&link.source, message),
                None => tracing::debug!(kind = message.type_str(), "bus message without a bus ignored"),
            },
        }
    }

    /// Bus message from a sibling. Not a delivery; the transport is not involved.
    fn on_relay(&mut self, msg: HostMessage) {
        if let Err(e) = self.frame.post(&msg) {
            self.send_failed(e);
            self.publish();
        }
    }

    fn on_ready(&mut self, protocol_version: u8) {
        if let Some(transport) = &self.transport {
            // first binding is authoritative
            tracing::debug!(transport = transport.kind().as_str(), "repeated readiness announcement ignored");
            return;
        }
        if protocol_version != PROTOCOL_VERSION {
            tracing::warn!(protocol_version, "unsupported handshake version, waiting for broadcast fallback");
            return;
        }

        let handshake = HandshakeTransport::new(Arc::clone(&self.frame));
        if let Err(e) = handshake.ack() {
            self.send_failed(e);
        }
        self.resolve(Box::new(handshake));
    }

    fn on_loaded(&mut self) {
        match self.transport.as_mut() {
            None => self.loaded = true,
            Some(transport) => {
                if transport.frame_loaded() {
                    self.flush();
                    self.publish();
                }
            }
        }
    }

    fn resolve_broadcast(&mut self) {
        let broadcast = BroadcastTransport::new(Arc::clone(&self.frame), self.loaded);
        self.resolve(Box::new(broadcast));
    }

    fn resolve(&mut self, transport: Box<dyn Transport>) {
        let kind = transport.kind();
        tracing::info!(transport = kind.as_str(), "transport resolved");
        self.metrics.transport_selected.inc(&[("transport", kind.as_str())]);

        self.transport = Some(transport);
        self.snap.transport = kind;
        self.snap.status = ConnectionStatus::Connected;
        self.flush();
        self.publish();
    }

    /// Hand the latest payload to the transport if it can take it now.
    fn flush(&mut self) {
        if self.is_closed() {
            return;
        }
        let (Some(transport), Some(env)) = (self.transport.as_mut(), self.snap.last_payload.as_ref()) else {
            return;
        };

        let kind = transport.kind();
        match transport.send(env) {
            Ok(SendOutcome::Sent) => {
                self.snap.deliveries += 1;
                self.snap.status = ConnectionStatus::Delivered;
                self.metrics.deliveries.inc(&[("transport", kind.as_str())]);
                tracing::debug!(transport = kind.as_str(), deliveries = self.snap.deliveries, "delivered");
            }
            Ok(SendOutcome::Deferred) => {}
            Err(e) => self.send_failed(e),
        }
    }

    fn send_failed(&mut self, e: ViewLinkError) {
        tracing::warn!(error = %e, "frame send failed");
        self.metrics.send_failures.inc();
        self.snap.last_error = Some(e.to_string());
    }

    fn finish(mut self) {
        self.closed.store(true, Ordering::Release);
        self.snap.status = ConnectionStatus::Closed;
        self.publish();

        self.registry.remove_if(self.snap.frame, self.created_seq);
        self.metrics.live_connections.dec();
        tracing::debug!("connection closed");
    }
}

