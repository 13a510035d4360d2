//! Delivery client: the embedded view's half of the protocol.
//!
//! Widgets read a `ViewState` synchronously; `data` stays `None` until a
//! delivery arrives, and the widget shows its connecting/fallback state until
//! then.
//!
//! Panel bus messages from siblings are not deliveries: they never touch the
//! view state and fan out to `subscribe_bus` receivers in every mode.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use viewlink_core::error::Result;
use viewlink_core::protocol::bootstrap::location_payload;
use viewlink_core::protocol::bus::ViewMessage;
use viewlink_core::protocol::envelope::{ContentBlock, Envelope};
use viewlink_core::protocol::message::{FrameMessage, HostMessage};

use crate::negotiate::transport::{SendOutcome, Transport, TransportKind};

/// What a widget renders from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    /// `structuredContent` of the latest delivery (may be `Some(Value::Null)`).
    pub data: Option<Value>,
    pub content: Option<Vec<ContentBlock>>,
    pub is_connected: bool,
    pub transport: TransportKind,
}

impl ViewState {
    /// Interpret `data` with the widget's own schema.
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Synchronous transport: writes the envelope straight into the view state.
pub struct DirectTransport {
    state: watch::Sender<ViewState>,
}

impl DirectTransport {
    pub fn new(state: watch::Sender<ViewState>) -> Self {
        Self { state }
    }

    /// Write `envelope` into the view state. Cannot defer or fail.
    pub fn apply(&self, envelope: &Envelope) {
        let env = envelope.clone();
        self.state.send_modify(|s| {
            s.is_connected = true;
            s.transport = TransportKind::Direct;
            s.data = Some(env.structured_content);
            s.content = Some(env.content);
        });
    }
}

impl Transport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    fn send(&mut self, envelope: &Envelope) -> Result<SendOutcome> {
        self.apply(envelope);
        Ok(SendOutcome::Sent)
    }
}

/// Sibling messages buffered per bus subscriber before it starts lagging.
const BUS_BUFFER: usize = 64;

pub struct DeliveryClient {
    state: watch::Sender<ViewState>,
    bus: broadcast::Sender<ViewMessage>,
    next_request_id: u64,
}

impl Default for DeliveryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryClient {
    /// Client for the live protocol.
    pub fn new() -> Self {
        let (state, _) = watch::channel(ViewState::default());
        let (bus, _) = broadcast::channel(BUS_BUFFER);
        Self {
            state,
            bus,
            next_request_id: 1,
        }
    }

    /// Client bootstrapped from the view's location.
    ///
    /// A payload in the fragment resolves immediately over the direct
    /// transport; otherwise (or if it does not decode) the live protocol is used.
    pub fn from_location(location: &str) -> Self {
        let client = Self::new();
        match location_payload(location) {
            Ok(Some(data)) => {
                DirectTransport::new(client.state.clone()).apply(&Envelope::tool_result(data));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "location payload ignored, using live protocol"),
        }
        client
    }

    /// Readiness announcement to post once the view is ready.
    pub fn announce(&self) -> FrameMessage {
        FrameMessage::ready()
    }

    /// Bus message to post to the host for the sibling panels.
    pub fn publish(&self, message: ViewMessage) -> FrameMessage {
        FrameMessage::bus(message)
    }

    /// Apply a host message. Returns the reply to post back, if any.
    pub fn handle(&mut self, msg: HostMessage) -> Option<FrameMessage> {
        let transport = self.state.borrow().transport;

        match msg {
            HostMessage::Ack { .. } => {
                if transport != TransportKind::Unresolved {
                    tracing::debug!(transport = transport.as_str(), "ack ignored");
                    return None;
                }
                self.state.send_modify(|s| {
                    s.is_connected = true;
                    s.transport = TransportKind::Handshake;
                });
                let request_id = self.next_request_id;
                self.next_request_id += 1;
                Some(FrameMessage::RequestContent { request_id })
            }
            HostMessage::Reply { envelope, .. } | HostMessage::Update { envelope } => {
                if transport != TransportKind::Handshake {
                    tracing::debug!(transport = transport.as_str(), "handshake delivery ignored");
                    return None;
                }
                self.apply(envelope, TransportKind::Handshake);
                None
            }
            HostMessage::ToolResult(envelope) => {
                if !matches!(transport, TransportKind::Unresolved | TransportKind::Broadcast) {
                    tracing::debug!(transport = transport.as_str(), "broadcast delivery ignored");
                    return None;
                }
                self.apply(envelope, TransportKind::Broadcast);
                None
            }
            HostMessage::Bus { message, .. } => {
                match self.bus.send(message) {
                    Ok(n) => tracing::trace!(subscribers = n, "bus message received"),
                    Err(_) => tracing::debug!("bus message without subscribers dropped"),
                }
                None
            }
        }
    }

    /// Apply a raw inbound value. Anything that is not a protocol message is ignored.
    pub fn handle_value(&mut self, value: Value) -> Option<FrameMessage> {
        if !value.is_object() {
            return None;
        }
        match HostMessage::from_value(value) {
            Ok(msg) => self.handle(msg),
            Err(e) => {
                tracing::debug!(error = %e, "non-protocol message ignored");
                None
            }
        }
    }

    /// Current state (synchronous accessor).
    pub fn view(&self) -> ViewState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    /// Sibling bus messages from now on.
    pub fn subscribe_bus(&self) -> broadcast::Receiver<ViewMessage> {
        self.bus.subscribe()
    }

    fn apply(&mut self, envelope: Envelope, transport: TransportKind) {
        self.state.send_modify(|s| {
            s.is_connected = true;
            s.transport = transport;
            s.data = Some(envelope.structured_content);
            s.content = Some(envelope.content);
        });
    }
}
