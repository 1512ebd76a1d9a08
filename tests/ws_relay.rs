/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 */

//! End-to-end relay tests: a real HTTP server on localhost driven by real
//! WebSocket clients.

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::Actor;
use actix_web::{web, App, HttpServer};
use anyhow::{anyhow, bail, Result};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{json, Value};
use serial_test::serial;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

use relay_api::{
    actors::relay_server::RelayServer,
    auth::{AccessTokenClaims, MembershipOracle, TokenVerifier},
    lobby::ws_connect,
    models::AppState,
};

const TEST_SECRET: &str = "relay-integration-secret";

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn make_token(user_id: &str, exp_offset_secs: i64) -> String {
    let claims = AccessTokenClaims {
        user_id: user_id.to_string(),
        exp: chrono::Utc::now().timestamp() + exp_offset_secs,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

async fn start_server(port: u16, ring_timeout: Duration) {
    start_server_with(port, ring_timeout, None).await;
}

async fn start_server_with(
    port: u16,
    ring_timeout: Duration,
    oracle: Option<Arc<dyn MembershipOracle>>,
) {
    let relay = RelayServer::new(ring_timeout, oracle).start();
    let verifier = Arc::new(TokenVerifier::new(TEST_SECRET));

    actix_rt::spawn(async move {
        let _ = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(AppState {
                    relay: relay.clone(),
                    verifier: verifier.clone(),
                }))
                .service(ws_connect)
        })
        .bind(("127.0.0.1", port))
        .expect("bind test server")
        .run()
        .await;
    });

    let url = format!("ws://127.0.0.1:{port}/lobby");
    for _ in 0..50 {
        if let Ok((ws, _)) = tokio_tungstenite::connect_async(&url).await {
            drop(ws);
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("relay server not ready after 5 seconds");
}

async fn connect(port: u16) -> Result<WsClient> {
    let url = format!("ws://127.0.0.1:{port}/lobby");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await?;
    Ok(ws)
}

async fn send_event(ws: &mut WsClient, event: Value) -> Result<()> {
    ws.send(Message::Text(event.to_string())).await?;
    Ok(())
}

/// Reads frames until one with the given event name arrives, skipping
/// everything else (pings, unrelated broadcasts).
async fn recv_event(ws: &mut WsClient, event: &str, timeout: Duration) -> Result<Value> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or_else(|| anyhow!("timed out waiting for {event}"))?;
        let frame = tokio::time::timeout(remaining, ws.next())
            .await
            .map_err(|_| anyhow!("timed out waiting for {event}"))?
            .ok_or_else(|| anyhow!("stream closed while waiting for {event}"))??;
        if let Message::Text(text) = frame {
            let value: Value = serde_json::from_str(&text)?;
            if value["event"] == event {
                return Ok(value);
            }
        }
    }
}

/// Asserts that no frame with the given event name arrives within
/// `window`.
async fn expect_silence(ws: &mut WsClient, event: &str, window: Duration) -> Result<()> {
    match recv_event(ws, event, window).await {
        Ok(frame) => bail!("unexpected {event} frame: {frame}"),
        Err(_) => Ok(()),
    }
}

async fn expect_close(ws: &mut WsClient, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or_else(|| anyhow!("connection stayed open"))?;
        match tokio::time::timeout(remaining, ws.next()).await {
            Err(_) => bail!("connection stayed open"),
            Ok(None) => return Ok(()),
            Ok(Some(Ok(Message::Close(_)))) => return Ok(()),
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) => return Ok(()),
        }
    }
}

async fn authenticate(ws: &mut WsClient, user_id: &str) -> Result<()> {
    send_event(
        ws,
        json!({"event": "authenticate", "data": {"token": make_token(user_id, 600)}}),
    )
    .await?;
    let ack = recv_event(ws, "authenticated", Duration::from_secs(5)).await?;
    assert_eq!(ack["data"]["userId"], user_id);
    Ok(())
}

async fn join(ws: &mut WsClient, room: &str) -> Result<()> {
    send_event(
        ws,
        json!({"event": "join_conversation", "data": {"conversationId": room}}),
    )
    .await
}

#[actix_rt::test]
#[serial]
async fn handshake_gates_the_connection() -> Result<()> {
    let port = 19080;
    start_server(port, Duration::from_secs(30)).await;

    // bad credential: error frame, then the server closes
    let mut ws = connect(port).await?;
    send_event(
        &mut ws,
        json!({"event": "authenticate", "data": {"token": "not.a.jwt"}}),
    )
    .await?;
    let err = recv_event(&mut ws, "error", Duration::from_secs(5)).await?;
    assert!(err["data"]["message"]
        .as_str()
        .unwrap()
        .contains("invalid token"));
    expect_close(&mut ws, Duration::from_secs(5)).await?;

    // frames before authentication are rejected and do not advance state
    let mut ws = connect(port).await?;
    send_event(
        &mut ws,
        json!({"event": "typing", "data": {"conversationId": "r1"}}),
    )
    .await?;
    let err = recv_event(&mut ws, "error", Duration::from_secs(5)).await?;
    assert_eq!(err["data"]["message"], "not authenticated");

    // the same socket can still complete the handshake afterwards
    authenticate(&mut ws, "alice").await?;

    Ok(())
}

#[actix_rt::test]
#[serial]
async fn presence_fires_once_per_user_edge() -> Result<()> {
    let port = 19081;
    start_server(port, Duration::from_secs(30)).await;

    let mut alice1 = connect(port).await?;
    authenticate(&mut alice1, "alice").await?;

    let mut bob = connect(port).await?;
    authenticate(&mut bob, "bob").await?;
    let online = recv_event(&mut alice1, "user_online", Duration::from_secs(5)).await?;
    assert_eq!(online["data"]["userId"], "bob");

    // bob sees his own broadcast; drain it so later assertions are clean
    let own = recv_event(&mut bob, "user_online", Duration::from_secs(5)).await?;
    assert_eq!(own["data"]["userId"], "bob");

    // a second device for alice must not re-announce her
    let mut alice2 = connect(port).await?;
    authenticate(&mut alice2, "alice").await?;
    expect_silence(&mut bob, "user_online", Duration::from_millis(500)).await?;

    // closing one of two devices is not an offline edge
    drop(alice2);
    expect_silence(&mut bob, "user_offline", Duration::from_millis(500)).await?;

    // closing the last one is
    drop(alice1);
    let offline = recv_event(&mut bob, "user_offline", Duration::from_secs(5)).await?;
    assert_eq!(offline["data"]["userId"], "alice");

    Ok(())
}

#[actix_rt::test]
#[serial]
async fn room_events_never_echo_to_the_sender() -> Result<()> {
    let port = 19082;
    start_server(port, Duration::from_secs(30)).await;

    let mut alice1 = connect(port).await?;
    authenticate(&mut alice1, "alice").await?;
    let mut alice2 = connect(port).await?;
    authenticate(&mut alice2, "alice").await?;
    let mut bob = connect(port).await?;
    authenticate(&mut bob, "bob").await?;

    join(&mut alice1, "r1").await?;
    join(&mut alice2, "r1").await?;
    join(&mut bob, "r1").await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    send_event(
        &mut alice1,
        json!({"event": "message:new", "data": {"conversationId": "r1", "messageId": "m1", "cipherText": "opaque"}}),
    )
    .await?;

    let msg = recv_event(&mut bob, "message:new", Duration::from_secs(5)).await?;
    assert_eq!(msg["data"]["from"], "alice");
    assert_eq!(msg["data"]["conversationId"], "r1");
    assert_eq!(msg["data"]["messageId"], "m1");
    assert_eq!(msg["data"]["cipherText"], "opaque");

    // the sender's other device stays silent
    expect_silence(&mut alice2, "message:new", Duration::from_millis(500)).await?;

    // deletion scope passes through untouched
    send_event(
        &mut alice1,
        json!({"event": "message:deleted", "data": {"conversationId": "r1", "scope": "everyone", "messageId": "m1"}}),
    )
    .await?;
    let deleted = recv_event(&mut bob, "message:deleted", Duration::from_secs(5)).await?;
    assert_eq!(deleted["data"]["scope"], "everyone");
    assert_eq!(deleted["data"]["from"], "alice");

    // typing flows to others only
    send_event(
        &mut bob,
        json!({"event": "typing", "data": {"conversationId": "r1"}}),
    )
    .await?;
    let typing = recv_event(&mut alice1, "typing", Duration::from_secs(5)).await?;
    assert_eq!(typing["data"]["userId"], "bob");

    Ok(())
}

#[actix_rt::test]
#[serial]
async fn call_lifecycle_with_busy_and_disconnect_hangup() -> Result<()> {
    let port = 19083;
    start_server(port, Duration::from_secs(30)).await;

    let mut alice = connect(port).await?;
    authenticate(&mut alice, "alice").await?;
    let mut bob = connect(port).await?;
    authenticate(&mut bob, "bob").await?;
    let mut carol = connect(port).await?;
    authenticate(&mut carol, "carol").await?;

    join(&mut alice, "r1").await?;
    join(&mut bob, "r1").await?;
    join(&mut carol, "r1").await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // alice rings the room
    send_event(
        &mut alice,
        json!({"event": "call_request", "data": {"conversationId": "r1", "withVideo": true}}),
    )
    .await?;
    let incoming = recv_event(&mut bob, "call_incoming", Duration::from_secs(5)).await?;
    assert_eq!(incoming["data"]["from"], "alice");
    assert_eq!(incoming["data"]["withVideo"], true);
    let incoming = recv_event(&mut carol, "call_incoming", Duration::from_secs(5)).await?;
    assert_eq!(incoming["data"]["withVideo"], true);

    // glare: a second request gets call_busy, only at the requester
    send_event(
        &mut carol,
        json!({"event": "call_request", "data": {"conversationId": "r1", "withVideo": false}}),
    )
    .await?;
    recv_event(&mut carol, "call_busy", Duration::from_secs(5)).await?;
    expect_silence(&mut alice, "call_busy", Duration::from_millis(500)).await?;

    // bob answers
    send_event(
        &mut bob,
        json!({"event": "call_accept", "data": {"conversationId": "r1"}}),
    )
    .await?;
    let accepted = recv_event(&mut alice, "call_accepted", Duration::from_secs(5)).await?;
    assert_eq!(accepted["data"]["from"], "bob");

    // opaque offer is forwarded verbatim with the sender attached
    send_event(
        &mut alice,
        json!({"event": "webrtc_offer", "data": {"conversationId": "r1", "sdp": "v=0..."}}),
    )
    .await?;
    let offer = recv_event(&mut bob, "webrtc_offer", Duration::from_secs(5)).await?;
    assert_eq!(offer["data"]["from"], "alice");
    assert_eq!(offer["data"]["sdp"], "v=0...");

    // bob's connection dies mid-call: the relay hangs up for him
    drop(bob);
    let hangup = recv_event(&mut alice, "webrtc_hangup", Duration::from_secs(5)).await?;
    assert_eq!(hangup["data"]["from"], "bob");

    // the session is gone, so the room can ring again
    send_event(
        &mut alice,
        json!({"event": "call_request", "data": {"conversationId": "r1", "withVideo": false}}),
    )
    .await?;
    let incoming = recv_event(&mut carol, "call_incoming", Duration::from_secs(5)).await?;
    assert_eq!(incoming["data"]["from"], "alice");
    assert_eq!(incoming["data"]["withVideo"], false);

    Ok(())
}

#[actix_rt::test]
#[serial]
async fn unanswered_ring_times_out() -> Result<()> {
    let port = 19084;
    // shortened ring timeout so the sweep fires quickly
    start_server(port, Duration::from_secs(1)).await;

    let mut alice = connect(port).await?;
    authenticate(&mut alice, "alice").await?;
    let mut bob = connect(port).await?;
    authenticate(&mut bob, "bob").await?;

    join(&mut alice, "r1").await?;
    join(&mut bob, "r1").await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    send_event(
        &mut alice,
        json!({"event": "call_request", "data": {"conversationId": "r1", "withVideo": false}}),
    )
    .await?;
    recv_event(&mut bob, "call_incoming", Duration::from_secs(5)).await?;

    // nobody answers; the caller gets a synthetic rejection
    let rejected = recv_event(&mut alice, "call_rejected", Duration::from_secs(10)).await?;
    assert_eq!(rejected["data"]["from"], "system");
    assert_eq!(rejected["data"]["reason"], "timeout");

    // and the room is idle again
    send_event(
        &mut alice,
        json!({"event": "call_request", "data": {"conversationId": "r1", "withVideo": false}}),
    )
    .await?;
    recv_event(&mut bob, "call_incoming", Duration::from_secs(5)).await?;

    Ok(())
}

#[actix_rt::test]
#[serial]
async fn rejection_by_the_only_other_member_ends_the_call() -> Result<()> {
    let port = 19085;
    start_server(port, Duration::from_secs(30)).await;

    let mut alice = connect(port).await?;
    authenticate(&mut alice, "alice").await?;
    let mut bob = connect(port).await?;
    authenticate(&mut bob, "bob").await?;

    join(&mut alice, "r1").await?;
    join(&mut bob, "r1").await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    send_event(
        &mut alice,
        json!({"event": "call_request", "data": {"conversationId": "r1", "withVideo": false}}),
    )
    .await?;
    recv_event(&mut bob, "call_incoming", Duration::from_secs(5)).await?;

    send_event(
        &mut bob,
        json!({"event": "call_reject", "data": {"conversationId": "r1"}}),
    )
    .await?;
    let rejected = recv_event(&mut alice, "call_rejected", Duration::from_secs(5)).await?;
    assert_eq!(rejected["data"]["from"], "bob");

    // the session ended, so a fresh request rings instead of being busy
    send_event(
        &mut alice,
        json!({"event": "call_request", "data": {"conversationId": "r1", "withVideo": false}}),
    )
    .await?;
    recv_event(&mut bob, "call_incoming", Duration::from_secs(5)).await?;

    Ok(())
}

struct SingleRoomOracle;

impl MembershipOracle for SingleRoomOracle {
    fn is_participant(&self, user_id: &str, room_id: &str) -> bool {
        room_id == "r1" && user_id == "alice"
    }
}

#[actix_rt::test]
#[serial]
async fn membership_oracle_gates_joins() -> Result<()> {
    let port = 19086;
    let oracle: Arc<dyn MembershipOracle> = Arc::new(SingleRoomOracle);
    start_server_with(port, Duration::from_secs(30), Some(oracle)).await;

    let mut alice = connect(port).await?;
    authenticate(&mut alice, "alice").await?;
    let mut bob = connect(port).await?;
    authenticate(&mut bob, "bob").await?;

    join(&mut alice, "r1").await?;
    expect_silence(&mut alice, "error", Duration::from_millis(500)).await?;

    join(&mut bob, "r1").await?;
    let err = recv_event(&mut bob, "error", Duration::from_secs(5)).await?;
    assert!(err["data"]["message"]
        .as_str()
        .unwrap()
        .contains("not a participant"));

    // the refused join left bob outside the room: his events go nowhere
    send_event(
        &mut bob,
        json!({"event": "typing", "data": {"conversationId": "r1"}}),
    )
    .await?;
    expect_silence(&mut alice, "typing", Duration::from_millis(500)).await?;

    Ok(())
}
