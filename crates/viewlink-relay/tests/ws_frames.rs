//! Socket frames end to end: a real listener, the full router, and
//! tungstenite clients playing the embedded views.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use viewlink_relay::app_state::AppState;
use viewlink_relay::config;
use viewlink_relay::router::build_router;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CFG: &str = r##"
version: 1
panels:
  - id: "overview"
    source_location: "http://localhost:8000/counter/v1"
    structured_content: { count: 1 }
  - id: "notes"
    source_location: "http://localhost:8000/markdown/v1"
    structured_content: { content: "# Notes" }
"##;

const WAIT: Duration = Duration::from_secs(5);

async fn serve() -> String {
    let state = AppState::new(config::load_from_str(CFG).unwrap()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("ws://{addr}")
}

async fn open(base: &str, slot: &str) -> Socket {
    let (stream, _) = connect_async(format!("{base}/v1/frames/{slot}")).await.unwrap();
    stream
}

async fn send(ws: &mut Socket, v: Value) {
    ws.send(Message::Text(v.to_string().into())).await.unwrap();
}

/// Next text message as JSON, skipping keepalives.
async fn next_json(ws: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("no message in time")
            .expect("socket ended")
            .unwrap();
        match msg {
            Message::Text(t) => return serde_json::from_str(t.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

/// Announce and pull the current payload. Returns the delivered data.
async fn handshake(ws: &mut Socket) -> Value {
    send(ws, json!({ "type": "viewlink:ready", "protocolVersion": 1 })).await;
    assert_eq!(next_json(ws).await["type"], "viewlink:ack");

    send(ws, json!({ "type": "viewlink:request-content", "requestId": 1 })).await;
    let reply = next_json(ws).await;
    assert_eq!(reply["type"], "viewlink:reply");
    assert_eq!(reply["requestId"], 1);
    reply["envelope"]["structuredContent"].clone()
}

#[tokio::test]
async fn socket_frame_gets_seeded_payload_over_handshake() {
    let base = serve().await;
    let mut ws = open(&base, "overview").await;
    assert_eq!(handshake(&mut ws).await, json!({ "count": 1 }));
}

#[tokio::test]
async fn undecodable_text_is_answered_with_an_error() {
    let base = serve().await;
    let mut ws = open(&base, "overview").await;
    send(&mut ws, json!({ "type": "viewlink:nope" })).await;

    let err = next_json(&mut ws).await;
    assert_eq!(err["type"], "viewlink:error");
    assert_eq!(err["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn newer_socket_for_a_slot_closes_the_older_one() {
    let base = serve().await;
    let mut first = open(&base, "overview").await;
    handshake(&mut first).await;

    let mut second = open(&base, "overview").await;
    assert_eq!(handshake(&mut second).await, json!({ "count": 1 }));

    // displaced socket is closed by the server, not left idling
    loop {
        let next = tokio::time::timeout(WAIT, first.next()).await.expect("socket left open");
        match next {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("unexpected message: {other:?}"),
        }
    }

    // the slot stays with the newer socket
    send(&mut second, json!({ "type": "viewlink:request-content", "requestId": 2 })).await;
    assert_eq!(next_json(&mut second).await["requestId"], 2);
}

#[tokio::test]
async fn bus_messages_cross_between_socket_panels() {
    let base = serve().await;
    let mut overview = open(&base, "overview").await;
    let mut notes = open(&base, "notes").await;
    handshake(&mut overview).await;
    assert_eq!(handshake(&mut notes).await, json!({ "content": "# Notes" }));

    send(
        &mut overview,
        json!({
            "type": "viewlink:bus",
            "message": { "type": "highlight", "source": "notes", "id": "row-3" }
        }),
    )
    .await;

    let got = next_json(&mut notes).await;
    assert_eq!(got["type"], "viewlink:bus");
    assert_eq!(got["sourcePanel"], "overview");
    assert_eq!(got["message"], json!({ "type": "highlight", "source": "overview", "id": "row-3" }));
}
