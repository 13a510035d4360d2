//! WebSocket-backed frames.
//!
//! A remote view connects to `/v1/frames/{slot}` and is mounted into the bus
//! under `slot`:
//! - the open socket is the frame's load signal
//! - text messages are decoded once into `FrameMessage`
//! - host messages go out as JSON text
//! - ping/pong + idle timeout as configured under `server`
//! - on disconnect the frame unloads and releases its slot (unless a newer
//!   socket already took it)
//! - a socket whose connection was closed from the host side (slot taken by
//!   a newer socket, bus teardown) is sent a Close and dropped

use std::sync::Arc;

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, Path, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use viewlink_core::error::{Result, ViewLinkError};
use viewlink_core::protocol::message::HostMessage;

use crate::app_state::AppState;
use crate::frame::{FrameEvent, FrameHandle, FrameId, FramePort};
use crate::negotiate::ConnectionStatus;
use crate::transport::codec::{decode, encode, Inbound};

/// Outbound half of a socket frame.
struct SocketFrame {
    id: FrameId,
    out: mpsc::UnboundedSender<Message>,
}

impl FrameHandle for SocketFrame {
    fn id(&self) -> FrameId {
        self.id
    }

    fn post(&self, msg: &HostMessage) -> Result<()> {
        let m = encode(msg)?;
        self.out
            .send(m)
            .map_err(|_| ViewLinkError::DeadTarget(format!("{} socket closed", self.id)))
    }
}

fn error_json(code: &str, msg: &str) -> String {
    json!({
        "type": "viewlink:error",
        "code": code,
        "msg": msg
    })
    .to_string()
}

// --------------------
// Entry
// --------------------
pub async fn ws_upgrade(
    State(app): State<AppState>,
    ws: WebSocketUpgrade,
    Path(slot): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| run_frame(app, slot, socket))
}

// --------------------
// Frame session loop
// --------------------
async fn run_frame(app: AppState, slot: String, socket: WebSocket) {
    let frame_id = FrameId::next();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let handle = Arc::new(SocketFrame {
        id: frame_id,
        out: out_tx.clone(),
    });

    let (mut ws_tx, mut ws_rx) = socket.split();

    let conn = app
        .bus()
        .lock()
        .await
        .register(slot.clone(), FramePort::new(handle, events_rx));
    let _ = events_tx.send(FrameEvent::Loaded);
    tracing::info!(%slot, frame = %frame_id, "frame socket connected");

    let srv = &app.cfg().server;
    let ping_every = Duration::from_millis(srv.ping_interval_ms);
    let idle_timeout = Duration::from_millis(srv.idle_timeout_ms);

    let mut ping_tick = tokio::time::interval(ping_every);
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_activity = Instant::now();

    let released = conn.wait_for(|s| s.status == ConnectionStatus::Closed);
    tokio::pin!(released);

    loop {
        tokio::select! {
            // outbound writer
            maybe_out = out_rx.recv() => {
                match maybe_out {
                    Some(m) => {
                        if ws_tx.send(m).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // inbound reader
            incoming = ws_rx.next() => {
                let Some(incoming) = incoming else { break; };
                let Ok(msg) = incoming else { break; };

                last_activity = Instant::now();

                match decode(msg) {
                    Ok(Inbound::Frame(m)) => {
                        let _ = events_tx.send(FrameEvent::Message(m));
                    }
                    Ok(Inbound::Ping(payload)) => {
                        let _ = out_tx.send(Message::Pong(payload));
                    }
                    Ok(Inbound::Pong(_)) => {}
                    Ok(Inbound::Close) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "undecodable frame message dropped");
                        let _ = out_tx.send(Message::Text(error_json(e.code().as_str(), &e.to_string())));
                    }
                }
            }

            // ping
            _ = ping_tick.tick() => {
                let _ = out_tx.send(Message::Ping(Vec::new()));
            }

            // host closed the connection
            _ = &mut released => {
                tracing::debug!(%slot, frame = %frame_id, "connection closed by host, dropping socket");
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }

            // idle timeout
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if last_activity.elapsed() >= idle_timeout {
                    let _ = ws_tx.send(Message::Text(error_json("TIMEOUT", "idle timeout"))).await;
                    break;
                }
            }
        }
    }

    let _ = events_tx.send(FrameEvent::Unloaded);
    app.bus().lock().await.unregister_frame(&slot, frame_id);
    tracing::info!(%slot, frame = %frame_id, "frame socket closed");
}
