//! Embedded frames as the relay sees them.
//!
//! A frame is an outbound handle (`FrameHandle::post`) plus its own event
//! stream. Each frame owns its listener, so tearing a frame down detaches
//! exactly that frame's events and nothing else.

pub mod loopback;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use viewlink_core::error::Result;
use viewlink_core::protocol::message::{FrameMessage, HostMessage};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one frame instance. A reloaded or remounted frame gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        FrameId(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame-{}", self.0)
    }
}

/// Outbound half of a frame.
pub trait FrameHandle: Send + Sync {
    fn id(&self) -> FrameId;

    /// Hand a message to the frame. Errors mean the frame cannot take it
    /// (gone, closed socket); they never mean the frame rejected the content.
    fn post(&self, msg: &HostMessage) -> Result<()>;
}

/// What a frame tells its host.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// A decoded protocol message (readiness, content request).
    Message(FrameMessage),
    /// Native load signal. May fire again when the frame is reused.
    Loaded,
    /// Frame destroyed or navigated away.
    Unloaded,
}

/// A freshly created frame, ready to be handed to the negotiator.
pub struct FramePort {
    pub handle: Arc<dyn FrameHandle>,
    pub events: mpsc::UnboundedReceiver<FrameEvent>,
}

impl FramePort {
    pub fn new(handle: Arc<dyn FrameHandle>, events: mpsc::UnboundedReceiver<FrameEvent>) -> Self {
        Self { handle, events }
    }

    pub fn frame_id(&self) -> FrameId {
        self.handle.id()
    }
}
