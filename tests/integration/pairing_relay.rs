// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! End-to-end pairing and relay tests over real WebSocket connections.
//!
//! Covers the full room lifecycle: create, pair, relay, part, and removal,
//! plus isolation between rooms and rejection of a third player.
//!
//! Verification command: `cargo test --test pairing_relay`

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use netplay_proto::envelope::{GameMessage, KIND_CONNECT, KIND_ERROR, KIND_JOIN};
use netplay_relay::config::RelayConfig;
use netplay_relay::relay::{RelayState, start_server_with_state};
use tokio_tungstenite::tungstenite;

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts a relay on a random port, returning its state for inspection.
async fn start_relay_with(config: &RelayConfig) -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::with_config(config));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test relay");
    (addr, state)
}

async fn start_relay() -> (std::net::SocketAddr, Arc<RelayState>) {
    start_relay_with(&RelayConfig::default()).await
}

/// Connects a WebSocket client and waits until the relay has registered it.
async fn connect(addr: std::net::SocketAddr, state: &RelayState) -> WsStream {
    let before = state.engine.connection_count();
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    eventually(|| state.engine.connection_count() > before).await;
    ws
}

async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(tungstenite::Message::Text(text.into()))
        .await
        .unwrap();
}

/// Sends a `connect` envelope for `code`.
async fn join(ws: &mut WsStream, code: &str) {
    let bytes = GameMessage::new(KIND_CONNECT, code).to_bytes().unwrap();
    send_text(ws, std::str::from_utf8(&bytes).unwrap()).await;
}

/// Receives the next frame's payload.
async fn recv(ws: &mut WsStream) -> Vec<u8> {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("recv timed out")
        .unwrap()
        .unwrap();
    msg.into_data().to_vec()
}

/// Receives the next frame and decodes it as an envelope.
async fn recv_envelope(ws: &mut WsStream) -> GameMessage {
    serde_json::from_slice(&recv(ws).await).unwrap()
}

/// Asserts that nothing arrives within a short window.
async fn assert_no_frame(ws: &mut WsStream) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

/// Polls `condition` until it holds or a deadline passes.
async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// Connects two clients and pairs them in `code`, consuming the join notices.
async fn pair(
    addr: std::net::SocketAddr,
    state: &RelayState,
    code: &str,
) -> (WsStream, WsStream) {
    let mut a = connect(addr, state).await;
    let mut b = connect(addr, state).await;
    join(&mut a, code).await;
    eventually(|| state.engine.has_room(code)).await;
    join(&mut b, code).await;
    assert_eq!(recv_envelope(&mut a).await.data, b"1");
    assert_eq!(recv_envelope(&mut b).await.data, b"2");
    (a, b)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn full_session_scenario() {
    let (addr, state) = start_relay().await;

    // A creates the room and hears nothing yet.
    let mut a = connect(addr, &state).await;
    join(&mut a, "room42").await;
    eventually(|| state.engine.has_room("room42")).await;
    assert_no_frame(&mut a).await;

    // B completes it; each learns its own role.
    let mut b = connect(addr, &state).await;
    join(&mut b, "room42").await;

    let to_a = recv_envelope(&mut a).await;
    assert_eq!(to_a.kind, KIND_JOIN);
    assert_eq!(to_a.data, b"1");
    let to_b = recv_envelope(&mut b).await;
    assert_eq!(to_b.kind, KIND_JOIN);
    assert_eq!(to_b.data, b"2");

    // A's move reaches B verbatim.
    let frame = r#"{"type":"move","data":"AAECAwQF/w==","msg":""}"#;
    send_text(&mut a, frame).await;
    assert_eq!(recv(&mut b).await, frame.as_bytes());

    // B leaves; A is told once.
    b.close(None).await.unwrap();
    assert_eq!(recv(&mut a).await, b"part");
    assert_no_frame(&mut a).await;

    // A leaves; the room is gone.
    a.close(None).await.unwrap();
    eventually(|| state.engine.connection_count() == 0).await;
    assert!(!state.engine.has_room("room42"));
}

#[tokio::test]
async fn relay_flows_both_ways_exactly_once() {
    let (addr, state) = start_relay().await;
    let (mut a, mut b) = pair(addr, &state, "duo").await;

    for i in 0..10 {
        let from_a = format!(r#"{{"type":"input","msg":"a{i}"}}"#);
        send_text(&mut a, &from_a).await;
        assert_eq!(recv(&mut b).await, from_a.as_bytes());

        let from_b = format!(r#"{{"type":"state","msg":"b{i}"}}"#);
        send_text(&mut b, &from_b).await;
        assert_eq!(recv(&mut a).await, from_b.as_bytes());
    }

    assert_no_frame(&mut a).await;
    assert_no_frame(&mut b).await;
}

#[tokio::test]
async fn binary_frames_are_relayed() {
    let (addr, state) = start_relay().await;
    let (mut a, mut b) = pair(addr, &state, "bin").await;

    let frame = br#"{"type":"sync","data":"3q2+7w=="}"#.to_vec();
    a.send(tungstenite::Message::Binary(frame.clone().into()))
        .await
        .unwrap();
    assert_eq!(recv(&mut b).await, frame);
}

#[tokio::test]
async fn rooms_do_not_leak_into_each_other() {
    let (addr, state) = start_relay().await;
    let (mut a1, mut b1) = pair(addr, &state, "r1").await;
    let (mut a2, mut b2) = pair(addr, &state, "r2").await;

    send_text(&mut a1, r#"{"type":"move","msg":"r1"}"#).await;
    assert_eq!(recv(&mut b1).await, br#"{"type":"move","msg":"r1"}"#);

    assert_no_frame(&mut a2).await;
    assert_no_frame(&mut b2).await;
    assert_no_frame(&mut a1).await;
}

#[tokio::test]
async fn third_player_is_rejected_and_pair_keeps_playing() {
    let (addr, state) = start_relay().await;
    let (mut a, mut b) = pair(addr, &state, "full").await;

    let mut c = connect(addr, &state).await;
    join(&mut c, "full").await;

    let rejection = recv_envelope(&mut c).await;
    assert_eq!(rejection.kind, KIND_ERROR);
    assert!(rejection.msg.contains("full"), "got: {}", rejection.msg);
    assert_no_frame(&mut a).await;
    assert_no_frame(&mut b).await;

    send_text(&mut b, r#"{"type":"move"}"#).await;
    assert_eq!(recv(&mut a).await, br#"{"type":"move"}"#);
    assert_no_frame(&mut c).await;
}

#[tokio::test]
async fn code_is_reusable_after_part() {
    let (addr, state) = start_relay().await;
    let (mut a, b) = pair(addr, &state, "again").await;

    drop(b);
    assert_eq!(recv(&mut a).await, b"part");
    eventually(|| !state.engine.has_room("again")).await;

    // A newcomer starts a fresh waiting room rather than joining the old pair.
    let mut c = connect(addr, &state).await;
    join(&mut c, "again").await;
    eventually(|| state.engine.has_room("again")).await;
    assert_no_frame(&mut c).await;
    assert_no_frame(&mut a).await;

    // The survivor can rejoin and pair with the newcomer.
    join(&mut a, "again").await;
    assert_eq!(recv_envelope(&mut c).await.data, b"1");
    assert_eq!(recv_envelope(&mut a).await.data, b"2");
}

#[tokio::test]
async fn both_leaving_removes_room_in_either_order() {
    let (addr, state) = start_relay().await;

    let (a, b) = pair(addr, &state, "first-a").await;
    drop(a);
    drop(b);
    eventually(|| state.engine.connection_count() == 0).await;
    assert!(!state.engine.has_room("first-a"));

    let (c, d) = pair(addr, &state, "first-b").await;
    drop(d);
    drop(c);

    eventually(|| state.engine.connection_count() == 0).await;
    assert!(!state.engine.has_room("first-a"));
    assert!(!state.engine.has_room("first-b"));
    assert_eq!(state.engine.room_count(), 0);
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let (addr, state) = start_relay().await;
    let (mut a, mut b) = pair(addr, &state, "noise").await;

    send_text(&mut a, "this is not json").await;
    send_text(&mut a, r#"{"type":"connect","data":"!!!"}"#).await;
    assert_no_frame(&mut b).await;
    assert_no_frame(&mut a).await;

    send_text(&mut a, r#"{"type":"move"}"#).await;
    assert_eq!(recv(&mut b).await, br#"{"type":"move"}"#);
}

#[tokio::test]
async fn waiting_room_expires() {
    let config = RelayConfig {
        room_idle_timeout_secs: 1,
        ..RelayConfig::default()
    };
    let (addr, state) = start_relay_with(&config).await;

    let mut a = connect(addr, &state).await;
    join(&mut a, "idle").await;

    let notice = recv_envelope(&mut a).await;
    assert_eq!(notice.kind, KIND_ERROR);
    assert_eq!(notice.msg, "room idle expired");
    assert!(!state.engine.has_room("idle"));
}

#[tokio::test]
async fn client_that_stops_reading_is_dropped() {
    let config = RelayConfig {
        outbound_queue_size: 8,
        ..RelayConfig::default()
    };
    let (addr, state) = start_relay_with(&config).await;
    let (mut a, _b) = pair(addr, &state, "slow").await;

    // B never reads again. Once the socket buffers and B's queue fill up,
    // the relay must drop B instead of queueing without limit.
    let frame = format!(r#"{{"type":"state","msg":"{}"}}"#, "x".repeat(32 * 1024));
    for sent in 1..=20_000 {
        send_text(&mut a, &frame).await;
        if sent % 16 == 0 && !state.engine.has_room("slow") {
            break;
        }
    }

    eventually(|| !state.engine.has_room("slow")).await;
    assert_eq!(recv(&mut a).await, b"part");
    eventually(|| state.engine.connection_count() == 1).await;
}
