//! Connection handle and observable state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use viewlink_core::error::{Result, ViewLinkError};
use viewlink_core::protocol::envelope::Envelope;
use viewlink_core::protocol::message::HostMessage;

use crate::frame::FrameId;
use crate::negotiate::transport::TransportKind;

/// Lifecycle of one host/frame pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Delivered,
    /// Last delivery attempt failed structural validation. Not fatal.
    Error,
    /// Torn down. Terminal.
    Closed,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Delivered => "delivered",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Closed => "closed",
        }
    }
}

/// Point-in-time view of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub frame: FrameId,
    pub transport: TransportKind,
    pub status: ConnectionStatus,
    /// Successful sends so far (each reply, update or broadcast counts once).
    pub deliveries: u64,
    /// Latest accepted envelope, held or sent.
    pub last_payload: Option<Envelope>,
    pub last_error: Option<String>,
}

impl ConnectionSnapshot {
    pub(crate) fn new(frame: FrameId) -> Self {
        Self {
            frame,
            transport: TransportKind::Unresolved,
            status: ConnectionStatus::Disconnected,
            deliveries: 0,
            last_payload: None,
            last_error: None,
        }
    }
}

pub(crate) enum Command {
    Deliver(Envelope),
    DeliverRaw(Value),
    Relay(HostMessage),
    Close,
}

/// Cheap, cloneable handle to a running connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    frame: FrameId,
    tx: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionSnapshot>,
    closed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        frame: FrameId,
        tx: mpsc::UnboundedSender<Command>,
        state: watch::Receiver<ConnectionSnapshot>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            frame,
            tx,
            state,
            closed,
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    pub fn transport(&self) -> TransportKind {
        self.state.borrow().transport
    }

    /// Queue a delivery. Deliveries are applied in call order.
    /// Returns `false` if the connection is already closed.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(Command::Deliver(envelope)).is_ok()
    }

    /// Queue a raw delivery; it is validated by the connection and moves it
    /// to `Error` if malformed.
    pub fn deliver_value(&self, value: Value) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(Command::DeliverRaw(value)).is_ok()
    }

    /// Queue a bus message for the frame. It is posted as is, whatever the
    /// negotiated transport.
    pub fn relay(&self, msg: HostMessage) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(Command::Relay(msg)).is_ok()
    }

    /// Tear down. Anything still queued is discarded. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Command::Close);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.state.clone()
    }

    /// Wait until `pred` holds. Fails with `Closed` if the connection ends first.
    pub async fn wait_for<F>(&self, pred: F) -> Result<ConnectionSnapshot>
    where
        F: Fn(&ConnectionSnapshot) -> bool,
    {
        let mut rx = self.state.clone();
        loop {
            {
                let snap = rx.borrow_and_update();
                if pred(&snap) {
                    return Ok(snap.clone());
                }
                if snap.status == ConnectionStatus::Closed {
                    return Err(ViewLinkError::Closed);
                }
            }
            if rx.changed().await.is_err() {
                let snap = rx.borrow();
                if pred(&snap) {
                    return Ok(snap.clone());
                }
                return Err(ViewLinkError::Closed);
            }
        }
    }

    /// Outer "never loaded" bound: wait for the first successful send.
    ///
    /// The connection itself never gives up; this is where a caller turns a
    /// stalled `connecting` into a `TransportTimeout`.
    pub async fn wait_delivered(&self, within: Duration) -> Result<ConnectionSnapshot> {
        tokio::time::timeout(within, self.wait_for(|s| s.deliveries > 0))
            .await
            .map_err(|_| ViewLinkError::TransportTimeout {
                waited_ms: within.as_millis() as u64,
            })?
    }
}
