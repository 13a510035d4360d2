//! In-memory frame pair.
//!
//! Host messages cross the pair as `serde_json::Value`, the same plain-data
//! shape a structured-clone channel would carry, so anything delivered here
//! would also survive a real frame boundary.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use viewlink_core::error::{Result, ViewLinkError};
use viewlink_core::protocol::message::{FrameMessage, HostMessage};

use crate::client::{DeliveryClient, ViewState};
use crate::frame::{FrameEvent, FrameHandle, FrameId, FramePort};

/// Create a frame: the host-side port and the view-side end.
pub fn loopback() -> (FramePort, LoopbackView) {
    let id = FrameId::next();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

    let handle = Arc::new(LoopbackHandle { id, inbox: inbox_tx });
    let port = FramePort::new(handle, events_rx);
    let view = LoopbackView {
        id,
        events: events_tx,
        inbox: inbox_rx,
    };
    (port, view)
}

struct LoopbackHandle {
    id: FrameId,
    inbox: mpsc::UnboundedSender<Value>,
}

impl FrameHandle for LoopbackHandle {
    fn id(&self) -> FrameId {
        self.id
    }

    fn post(&self, msg: &HostMessage) -> Result<()> {
        let v = msg.to_value()?;
        self.inbox
            .send(v)
            .map_err(|_| ViewLinkError::DeadTarget(format!("{} is gone", self.id)))
    }
}

/// The frame's side of a loopback pair. Dropping it destroys the frame.
pub struct LoopbackView {
    id: FrameId,
    events: mpsc::UnboundedSender<FrameEvent>,
    inbox: mpsc::UnboundedReceiver<Value>,
}

impl LoopbackView {
    pub fn frame_id(&self) -> FrameId {
        self.id
    }

    /// Fire the native load signal.
    pub fn load(&self) {
        self.emit(FrameEvent::Loaded);
    }

    pub fn announce(&self) {
        self.send(FrameMessage::ready());
    }

    pub fn request_content(&self, request_id: u64) {
        self.send(FrameMessage::RequestContent { request_id });
    }

    pub fn send(&self, msg: FrameMessage) {
        self.emit(FrameEvent::Message(msg));
    }

    /// Navigate away without dropping the view.
    pub fn unload(&self) {
        self.emit(FrameEvent::Unloaded);
    }

    fn emit(&self, ev: FrameEvent) {
        // host side gone: nothing is listening, nothing to do
        let _ = self.events.send(ev);
    }

    /// Next host message, skipping anything that does not decode.
    pub async fn recv(&mut self) -> Option<HostMessage> {
        loop {
            let raw = self.inbox.recv().await?;
            match HostMessage::from_value(raw) {
                Ok(msg) => return Some(msg),
                Err(e) => tracing::debug!(frame = %self.id, error = %e, "loopback dropped undecodable message"),
            }
        }
    }

    /// Like `recv`, without waiting.
    pub fn try_recv(&mut self) -> Option<HostMessage> {
        loop {
            let raw = self.inbox.try_recv().ok()?;
            if let Ok(msg) = HostMessage::from_value(raw) {
                return Some(msg);
            }
        }
    }

    /// Next raw value as posted by the host.
    pub async fn recv_raw(&mut self) -> Option<Value> {
        self.inbox.recv().await
    }
}

/// How a simulated view talks to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    /// Announces readiness and requests content.
    Handshake,
    /// Never announces; waits for unsolicited tool results.
    Legacy,
}

/// Run a `DeliveryClient` inside `view`: fire load, optionally announce, and
/// answer host messages until the host goes away.
///
/// Must be called from within a tokio runtime.
pub fn spawn_client(mut view: LoopbackView, mode: ClientMode) -> watch::Receiver<ViewState> {
    let mut client = DeliveryClient::new();
    let state = client.subscribe();

    tokio::spawn(async move {
        view.load();
        if mode == ClientMode::Handshake {
            view.send(client.announce());
        }
        while let Some(raw) = view.recv_raw().await {
            if let Some(reply) = client.handle_value(raw) {
                view.send(reply);
            }
        }
    });

    state
}
