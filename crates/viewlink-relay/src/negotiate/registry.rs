//! Live connection registry keyed by frame id.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::frame::FrameId;
use crate::negotiate::connection::ConnectionHandle;

#[derive(Clone)]
struct ConnectionEntry {
    conn: ConnectionHandle,
    created_seq: u64,
}

/// Live connections: `frame_id -> Connection`, at most one per frame.
///
/// Entries carry a creation sequence so a finishing connection task removes
/// only its own entry, never the one that superseded it.
#[derive(Default)]
pub struct ConnectionRegistry {
    conns: DashMap<FrameId, ConnectionEntry>,
    seq: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            conns: DashMap::new(),
            seq: AtomicU64::new(1),
        }
    }

    /// Insert a connection for `frame`.
    /// Returns (created_seq, superseded_connection).
    pub fn insert(&self, frame: FrameId, conn: ConnectionHandle) -> (u64, Option<ConnectionHandle>) {
        let created_seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let prev = self
            .conns
            .insert(frame, ConnectionEntry { conn, created_seq })
            .map(|entry| entry.conn);
        (created_seq, prev)
    }

    /// Remove the entry for `frame` if it is still the one created at `created_seq`.
    pub fn remove_if(&self, frame: FrameId, created_seq: u64) -> Option<ConnectionHandle> {
        self.conns
            .remove_if(&frame, |_, entry| entry.created_seq == created_seq)
            .map(|(_, entry)| entry.conn)
    }

    pub fn get(&self, frame: FrameId) -> Option<ConnectionHandle> {
        self.conns.get(&frame).map(|r| r.value().conn.clone())
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Close every live connection (host shutdown).
    pub fn close_all(&self) {
        let conns: Vec<ConnectionHandle> = self.conns.iter().map(|e| e.value().conn.clone()).collect();
        for c in conns {
            c.close();
        }
    }
}
