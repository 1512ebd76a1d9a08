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

//! WebSocket entry point for the relay.
//!
//! **`GET /lobby`**: upgrades the connection and starts an
//! unauthenticated session. The client must complete the in-band
//! `authenticate` handshake within the handshake window before any other
//! frame is accepted; the credential travels in the first frame, never in
//! a cookie, because this channel is independent of the HTTP session.

use actix::prelude::Stream;
use actix::Actor;
use actix::StreamHandler;
use actix_http::error::PayloadError;
use actix_http::ws::{Codec, Message, ProtocolError};
use actix_web::web::Bytes;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws::{handshake, WebsocketContext};
use tracing::debug;

use crate::actors::relay_session::WsRelaySession;
use crate::models::AppState;

/// Start a WebSocket connection with a custom codec.
fn start_with_codec<A, S>(
    actor: A,
    req: &HttpRequest,
    stream: S,
    codec: Codec,
) -> Result<HttpResponse, Error>
where
    A: Actor<Context = WebsocketContext<A>> + StreamHandler<Result<Message, ProtocolError>>,
    S: Stream<Item = Result<Bytes, PayloadError>> + 'static,
{
    let mut res = handshake(req)?;
    Ok(res.streaming(WebsocketContext::with_codec(actor, stream, codec)))
}

#[get("/lobby")]
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let actor = WsRelaySession::new(state.relay.clone(), state.verifier.clone());
    debug!(
        connection_id = actor.connection_id(),
        "socket connected, awaiting handshake"
    );
    let codec = Codec::new().max_size(1_000_000);
    start_with_codec(actor, &req, stream, codec)
}
