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

//! WebSocket session actor.
//!
//! One actor per connection. The actor owns the per-connection handshake
//! state machine: the socket opens in `Connecting`, the first frame must
//! be `authenticate{token}`, and only an `Authenticated` session may talk
//! to the relay. Frames arriving earlier are rejected without advancing
//! the state; if no valid credential arrives inside the handshake window
//! the socket is closed.
//!
//! Outbound frames are delivered through this actor's mailbox, which is
//! what serializes writes per connection.

use std::sync::Arc;

use actix::ActorFutureExt;
use actix::{
    clock::Instant, fut, Actor, ActorContext, Addr, AsyncContext, ContextFutureSpawner, Handler,
    Running, StreamHandler, WrapFuture,
};
use actix_web_actors::ws::{self, WebsocketContext};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actors::relay_server::RelayServer;
use crate::auth::TokenVerifier;
use crate::constants::{CLIENT_TIMEOUT, HANDSHAKE_TIMEOUT, HEARTBEAT_INTERVAL};
use crate::events::{ClientEvent, ServerEvent};
use crate::messages::server::{Connect, Disconnect, ForceDisconnect, Inbound};
use crate::messages::session::Frame;
use crate::registry::{ConnectionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    Authenticating,
    Authenticated,
    Closed,
}

pub struct WsRelaySession {
    id: ConnectionId,
    server: Addr<RelayServer>,
    verifier: Arc<TokenVerifier>,
    state: HandshakeState,
    user_id: Option<UserId>,
    /// Set once the relay confirmed registration; gates disconnect
    /// cleanup so a refused session never tears down someone else's
    /// registry entry.
    registered: bool,
    heartbeat: Instant,
    warned_invalid: bool,
}

impl WsRelaySession {
    pub fn new(server: Addr<RelayServer>, verifier: Arc<TokenVerifier>) -> Self {
        let id = (Uuid::new_v4().as_u128() & 0xFFFF_FFFF_FFFF_FFFF) as u64;
        WsRelaySession {
            id,
            server,
            verifier,
            state: HandshakeState::Connecting,
            user_id: None,
            registered: false,
            heartbeat: Instant::now(),
            warned_invalid: false,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn start_heartbeat(&self, ctx: &mut WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = act.id, "client heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_event(&self, event: &ServerEvent, ctx: &mut WebsocketContext<Self>) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(connection_id = self.id, "failed to encode frame: {e}"),
        }
    }

    /// Malformed inbound data: the frame is dropped and the connection
    /// stays open. Only the first offense gets a warning frame back.
    fn invalid_frame(&mut self, message: &str, ctx: &mut WebsocketContext<Self>) {
        debug!(connection_id = self.id, "{message}");
        if !self.warned_invalid {
            self.warned_invalid = true;
            self.send_event(
                &ServerEvent::Error {
                    message: message.to_string(),
                },
                ctx,
            );
        }
    }

    fn handle_authenticate(&mut self, token: String, ctx: &mut WebsocketContext<Self>) {
        match self.state {
            HandshakeState::Connecting => {}
            HandshakeState::Authenticated => {
                self.send_event(
                    &ServerEvent::Error {
                        message: "already authenticated".into(),
                    },
                    ctx,
                );
                return;
            }
            HandshakeState::Authenticating | HandshakeState::Closed => return,
        }

        self.state = HandshakeState::Authenticating;
        match self.verifier.verify(&token) {
            Ok(user_id) => {
                info!(connection_id = self.id, user = %user_id, "handshake complete");
                self.state = HandshakeState::Authenticated;
                self.user_id = Some(user_id.clone());

                let addr = ctx.address();
                let connect = Connect {
                    connection_id: self.id,
                    user_id: user_id.clone(),
                    addr: addr.clone().recipient(),
                    disconnect_addr: addr.recipient::<ForceDisconnect>(),
                };
                // wait for the registration verdict before reading more
                // frames; the ack only goes out once the relay knows us
                self.server
                    .send(connect)
                    .into_actor(self)
                    .then(move |res, act, ctx| {
                        match res {
                            Ok(Ok(())) => {
                                act.registered = true;
                                act.send_event(
                                    &ServerEvent::Authenticated {
                                        user_id,
                                        connection_id: act.id,
                                    },
                                    ctx,
                                );
                            }
                            Ok(Err(e)) => {
                                error!(connection_id = act.id, "registration refused: {e}");
                                ctx.stop();
                            }
                            Err(e) => {
                                error!(connection_id = act.id, "relay unreachable: {e:?}");
                                ctx.stop();
                            }
                        }
                        fut::ready(())
                    })
                    .wait(ctx);
            }
            Err(e) => {
                warn!(connection_id = self.id, "handshake failed: {e}");
                self.send_event(
                    &ServerEvent::Error {
                        message: e.to_string(),
                    },
                    ctx,
                );
                self.state = HandshakeState::Closed;
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Policy,
                    description: Some("authentication failed".to_string()),
                }));
                ctx.stop();
            }
        }
    }

    fn handle_text(&mut self, text: &str, ctx: &mut WebsocketContext<Self>) {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                self.invalid_frame(&format!("unrecognized frame: {e}"), ctx);
                return;
            }
        };

        if let ClientEvent::Authenticate { token } = event {
            self.handle_authenticate(token, ctx);
            return;
        }

        match self.state {
            HandshakeState::Authenticated => {
                self.server.do_send(Inbound {
                    connection_id: self.id,
                    event,
                });
            }
            _ => {
                debug!(connection_id = self.id, "frame before authentication rejected");
                self.send_event(
                    &ServerEvent::Error {
                        message: "not authenticated".into(),
                    },
                    ctx,
                );
            }
        }
    }
}

impl Actor for WsRelaySession {
    type Context = WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.start_heartbeat(ctx);
        ctx.run_later(HANDSHAKE_TIMEOUT, |act, ctx| {
            if act.state != HandshakeState::Authenticated {
                info!(
                    connection_id = act.id,
                    "handshake window elapsed without valid credentials"
                );
                act.state = HandshakeState::Closed;
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Policy,
                    description: Some("authentication timeout".to_string()),
                }));
                ctx.stop();
            }
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        // graceful close and abrupt loss both land here, so both run the
        // same cleanup path on the relay
        self.state = HandshakeState::Closed;
        if self.registered {
            self.server.do_send(Disconnect {
                connection_id: self.id,
            });
        }
        Running::Stop
    }
}

/// Outbound frames from the relay.
impl Handler<Frame> for WsRelaySession {
    type Result = ();

    fn handle(&mut self, msg: Frame, ctx: &mut Self::Context) -> Self::Result {
        ctx.text(msg.0.as_str());
    }
}

impl Handler<ForceDisconnect> for WsRelaySession {
    type Result = ();

    fn handle(&mut self, _msg: ForceDisconnect, ctx: &mut Self::Context) -> Self::Result {
        info!(connection_id = self.id, "force disconnect");
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Policy,
            description: Some("disconnected by server".to_string()),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsRelaySession {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match item {
            Ok(msg) => msg,
            Err(err) => {
                error!(connection_id = self.id, "websocket protocol error: {err:?}");
                ctx.stop();
                return;
            }
        };

        match msg {
            ws::Message::Text(text) => {
                self.heartbeat = Instant::now();
                self.handle_text(&text, ctx);
            }
            ws::Message::Binary(_) => {
                self.heartbeat = Instant::now();
                self.invalid_frame("binary frames are not part of the protocol", ctx);
            }
            ws::Message::Ping(msg) => {
                self.heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            ws::Message::Pong(_) => {
                self.heartbeat = Instant::now();
            }
            ws::Message::Close(reason) => {
                debug!(connection_id = self.id, "close frame received");
                ctx.close(reason);
                ctx.stop();
            }
            _ => (),
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        ctx.stop()
    }
}
