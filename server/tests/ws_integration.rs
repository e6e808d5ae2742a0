//! End-to-end coverage over a real bound socket: echoes bytes through an
//! actual PTY, confirms the legacy no-id frame routes unambiguously, and
//! confirms the session registry is shared (so ownership, not connection
//! identity, is what isolates sessions).

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = muxd::serve(listener).await;
    });
    addr
}

async fn connect(addr: SocketAddr, owner: &str) -> WsStream {
    let url = format!("ws://{addr}/ws?owner={owner}");
    let (ws, _) = connect_async(url).await.expect("websocket connect failed");
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send failed");
}

async fn recv_json(ws: &mut WsStream) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("websocket error");
    match msg {
        Message::Text(text) => serde_json::from_str(&text.to_string()).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Keeps reading frames until one satisfies `pred`, or the read budget runs out.
async fn recv_until(ws: &mut WsStream, pred: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..50 {
        let msg = recv_json(ws).await;
        if pred(&msg) {
            return msg;
        }
    }
    panic!("never observed a matching frame");
}

#[tokio::test]
async fn echo_round_trip_through_pty() {
    let addr = spawn_server().await;
    let mut ws = connect(addr, "alice").await;

    send_json(&mut ws, json!({"type": "create"})).await;
    let created = recv_json(&mut ws).await;
    assert_eq!(created["type"], "session_created");
    assert_eq!(created["status"], "connecting");
    let session_id = created["session_id"].as_str().unwrap().to_string();

    send_json(
        &mut ws,
        json!({"type": "input", "session_id": session_id, "data": "echo muxcore-echo-check\n"}),
    )
    .await;

    let output = recv_until(&mut ws, |msg| {
        msg["type"] == "output" && msg["data"].as_str().unwrap_or("").contains("muxcore-echo-check")
    })
    .await;
    assert_eq!(output["session_id"], session_id);

    send_json(&mut ws, json!({"type": "close", "session_id": session_id})).await;
    let exit = recv_until(&mut ws, |msg| msg["type"] == "exit").await;
    assert_eq!(exit["session_id"], session_id);
}

#[tokio::test]
async fn backwards_compatible_frame_routes_to_sole_session() {
    let addr = spawn_server().await;
    let mut ws = connect(addr, "bob").await;

    send_json(&mut ws, json!({"type": "create"})).await;
    let created = recv_json(&mut ws).await;
    assert_eq!(created["type"], "session_created");

    // No session_id: with exactly one session on this connection, this must
    // route there rather than erroring as "missing session_id".
    send_json(&mut ws, json!({"type": "input", "data": "echo legacy-frame-routed\n"})).await;

    let output = recv_until(&mut ws, |msg| {
        msg["type"] == "output"
            && msg["data"].as_str().unwrap_or("").contains("legacy-frame-routed")
    })
    .await;
    assert_eq!(output["type"], "output");
}

#[tokio::test]
async fn sessions_are_isolated_by_owner_not_by_connection() {
    let addr = spawn_server().await;
    let mut alice = connect(addr, "alice").await;
    let mut mallory = connect(addr, "mallory").await;

    send_json(&mut alice, json!({"type": "create"})).await;
    let created = recv_json(&mut alice).await;
    let session_id = created["session_id"].as_str().unwrap().to_string();

    // The registry is shared (mallory's connection can resolve alice's id at
    // all), but ownership still gates the operation.
    send_json(
        &mut mallory,
        json!({"type": "input", "session_id": session_id, "data": "nope\n"}),
    )
    .await;
    let msg = recv_json(&mut mallory).await;
    assert_eq!(msg["type"], "error");
}
