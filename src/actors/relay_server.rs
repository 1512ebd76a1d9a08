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

//! The central relay actor.
//!
//! `RelayServer` owns every shared table: the connection registry, the
//! room membership table, presence refcounts, and call sessions. All
//! mutations flow through its mailbox, so the compound invariant (a room
//! never lists a connection the registry does not know) holds without any
//! locking. Outbound frames are handed to session mailboxes with
//! `do_send` and never awaited; a dead session just drops them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::{Actor, AsyncContext, Context, Handler, MessageResult, Recipient};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::auth::MembershipOracle;
use crate::calls::{AcceptOutcome, CallRegistry, RejectOutcome, RequestOutcome};
use crate::constants::{RING_SWEEP_INTERVAL, SYSTEM_USER, VALID_ID_PATTERN};
use crate::events::{sanitize_body, ClientEvent, ServerEvent};
use crate::fanout;
use crate::messages::server::{Connect, Disconnect, ForceDisconnect, Inbound};
use crate::messages::session::Frame;
use crate::presence::{PresenceTracker, PresenceTransition};
use crate::registry::{ConnectionId, ConnectionRegistry, RoomMembership, UserId};

lazy_static! {
    static ref VALID_ID: Regex = Regex::new(VALID_ID_PATTERN).unwrap();
}

pub struct RelayServer {
    registry: ConnectionRegistry,
    rooms: RoomMembership,
    presence: PresenceTracker,
    calls: CallRegistry,
    sessions: HashMap<ConnectionId, Recipient<Frame>>,
    disconnect_addrs: HashMap<ConnectionId, Recipient<ForceDisconnect>>,
    oracle: Option<Arc<dyn MembershipOracle>>,
    ring_timeout: Duration,
}

impl RelayServer {
    pub fn new(ring_timeout: Duration, oracle: Option<Arc<dyn MembershipOracle>>) -> Self {
        RelayServer {
            registry: ConnectionRegistry::new(),
            rooms: RoomMembership::new(),
            presence: PresenceTracker::new(),
            calls: CallRegistry::new(),
            sessions: HashMap::new(),
            disconnect_addrs: HashMap::new(),
            oracle,
            ring_timeout,
        }
    }

    fn encode(event: &ServerEvent) -> Option<Frame> {
        match serde_json::to_string(event) {
            Ok(json) => Some(Frame(Arc::new(json))),
            Err(e) => {
                error!("failed to encode outbound event: {e}");
                None
            }
        }
    }

    /// Best-effort delivery: a target whose session is gone or whose
    /// mailbox is closed silently drops the frame.
    fn deliver(&self, targets: &[ConnectionId], event: &ServerEvent) {
        if targets.is_empty() {
            return;
        }
        let Some(frame) = Self::encode(event) else {
            return;
        };
        for connection_id in targets {
            if let Some(addr) = self.sessions.get(connection_id) {
                addr.do_send(frame.clone());
            }
        }
    }

    fn send_to_connection(&self, connection_id: ConnectionId, event: &ServerEvent) {
        self.deliver(&[connection_id], event);
    }

    fn send_to_user(&self, user_id: &str, event: &ServerEvent) {
        let targets: Vec<ConnectionId> = self.registry.connections_of(user_id).collect();
        self.deliver(&targets, event);
    }

    fn broadcast(&self, event: &ServerEvent) {
        let targets: Vec<ConnectionId> = self.sessions.keys().copied().collect();
        self.deliver(&targets, event);
    }

    fn relay_to_room(&self, room_id: &str, sender: &str, event: &ServerEvent) {
        let targets = fanout::room_targets(&self.rooms, &self.registry, room_id, sender);
        self.deliver(&targets, event);
    }

    fn relay_to_user(&self, room_id: &str, user_id: &str, event: &ServerEvent) {
        let targets = fanout::user_targets(&self.rooms, &self.registry, room_id, user_id);
        self.deliver(&targets, event);
    }

    /// Relays a room event, dropping frames from connections that never
    /// joined the room.
    fn relay_member_event(
        &self,
        connection_id: ConnectionId,
        room_id: &str,
        sender: &str,
        event: ServerEvent,
    ) {
        if !self.rooms.is_member(room_id, connection_id) {
            debug!(connection_id, room = %room_id, "event for unjoined room dropped");
            return;
        }
        self.relay_to_room(room_id, sender, &event);
    }

    /// Routes an opaque signaling payload: point-to-point when addressed,
    /// room-wide otherwise. Requires a live call session for the room.
    fn relay_signal(
        &mut self,
        connection_id: ConnectionId,
        room_id: &str,
        sender: &str,
        to: Option<UserId>,
        event: ServerEvent,
    ) {
        if !self.rooms.is_member(room_id, connection_id) {
            debug!(connection_id, room = %room_id, "signal for unjoined room dropped");
            return;
        }
        if !self.calls.touch(room_id, Instant::now()) {
            debug!(room = %room_id, "signal without a live call session dropped");
            return;
        }
        match to {
            Some(target) => self.relay_to_user(room_id, &target, &event),
            None => self.relay_to_room(room_id, sender, &event),
        }
    }

    fn join_room(&mut self, connection_id: ConnectionId, user_id: &str, room_id: &str) {
        if !VALID_ID.is_match(room_id) {
            warn!(connection_id, room = %room_id, "malformed conversation id");
            self.send_to_connection(
                connection_id,
                &ServerEvent::Error {
                    message: "invalid conversation id".into(),
                },
            );
            return;
        }
        if let Some(oracle) = &self.oracle {
            if !oracle.is_participant(user_id, room_id) {
                warn!(connection_id, user = %user_id, room = %room_id, "join denied");
                self.send_to_connection(
                    connection_id,
                    &ServerEvent::Error {
                        message: "not a participant of this conversation".into(),
                    },
                );
                return;
            }
        }
        if self.rooms.join(room_id, connection_id) {
            debug!(connection_id, user = %user_id, room = %room_id, "joined conversation");
        }
    }

    /// Distinct users present in the room, minus the current call's
    /// caller. These are the invitees whose unanimous rejection ends a
    /// ringing call.
    fn invitees(&self, room_id: &str) -> HashSet<UserId> {
        let caller = self.calls.session(room_id).map(|s| s.caller.clone());
        self.rooms
            .members_of(room_id)
            .filter_map(|conn| self.registry.user_of(conn).cloned())
            .filter(|user| Some(user) != caller.as_ref())
            .collect()
    }

    fn dispatch(&mut self, connection_id: ConnectionId, user_id: UserId, event: ClientEvent) {
        match event {
            ClientEvent::Authenticate { .. } => {
                // the session actor consumes the handshake; anything that
                // leaks through here is client noise
                debug!(connection_id, "authenticate after handshake dropped");
            }

            ClientEvent::JoinConversation { conversation_id } => {
                self.join_room(connection_id, &user_id, &conversation_id);
            }

            ClientEvent::LeaveConversation { conversation_id } => {
                if self.rooms.leave(&conversation_id, connection_id) {
                    debug!(connection_id, room = %conversation_id, "left conversation");
                }
            }

            ClientEvent::Typing { conversation_id } => {
                let event = ServerEvent::Typing {
                    conversation_id: conversation_id.clone(),
                    user_id: user_id.clone(),
                };
                self.relay_member_event(connection_id, &conversation_id, &user_id, event);
            }

            ClientEvent::TypingStop { conversation_id } => {
                let event = ServerEvent::TypingStop {
                    conversation_id: conversation_id.clone(),
                    user_id: user_id.clone(),
                };
                self.relay_member_event(connection_id, &conversation_id, &user_id, event);
            }

            ClientEvent::MessageNew {
                conversation_id,
                mut body,
            } => {
                sanitize_body(&mut body);
                let event = ServerEvent::MessageNew {
                    conversation_id: conversation_id.clone(),
                    from: user_id.clone(),
                    body,
                };
                self.relay_member_event(connection_id, &conversation_id, &user_id, event);
            }

            ClientEvent::MessageEdited {
                conversation_id,
                mut body,
            } => {
                sanitize_body(&mut body);
                let event = ServerEvent::MessageEdited {
                    conversation_id: conversation_id.clone(),
                    from: user_id.clone(),
                    body,
                };
                self.relay_member_event(connection_id, &conversation_id, &user_id, event);
            }

            ClientEvent::MessageDeleted {
                conversation_id,
                scope,
                mut body,
            } => {
                sanitize_body(&mut body);
                let event = ServerEvent::MessageDeleted {
                    conversation_id: conversation_id.clone(),
                    from: user_id.clone(),
                    scope,
                    body,
                };
                self.relay_member_event(connection_id, &conversation_id, &user_id, event);
            }

            ClientEvent::MessageSeen {
                conversation_id,
                mut body,
            } => {
                sanitize_body(&mut body);
                let event = ServerEvent::MessageSeen {
                    conversation_id: conversation_id.clone(),
                    from: user_id.clone(),
                    body,
                };
                self.relay_member_event(connection_id, &conversation_id, &user_id, event);
            }

            ClientEvent::CallRequest {
                conversation_id,
                with_video,
            } => {
                if !self.rooms.is_member(&conversation_id, connection_id) {
                    debug!(connection_id, room = %conversation_id, "call_request from unjoined room dropped");
                    return;
                }
                match self
                    .calls
                    .request(&conversation_id, &user_id, with_video, Instant::now())
                {
                    RequestOutcome::Ringing => {
                        self.relay_to_room(
                            &conversation_id,
                            &user_id,
                            &ServerEvent::CallIncoming {
                                from: user_id.clone(),
                                with_video,
                            },
                        );
                    }
                    RequestOutcome::Busy => {
                        self.send_to_connection(connection_id, &ServerEvent::CallBusy);
                    }
                }
            }

            ClientEvent::CallAccept { conversation_id } => {
                if !self.rooms.is_member(&conversation_id, connection_id) {
                    debug!(connection_id, room = %conversation_id, "call_accept from unjoined room dropped");
                    return;
                }
                match self.calls.accept(&conversation_id, &user_id, Instant::now()) {
                    AcceptOutcome::Answered | AcceptOutcome::Joined => {
                        self.relay_to_room(
                            &conversation_id,
                            &user_id,
                            &ServerEvent::CallAccepted {
                                from: user_id.clone(),
                            },
                        );
                    }
                    AcceptOutcome::Ignored => {
                        debug!(room = %conversation_id, "call_accept without a ringing session dropped");
                    }
                }
            }

            ClientEvent::CallReject { conversation_id } => {
                if !self.rooms.is_member(&conversation_id, connection_id) {
                    debug!(connection_id, room = %conversation_id, "call_reject from unjoined room dropped");
                    return;
                }
                let invitees = self.invitees(&conversation_id);
                match self
                    .calls
                    .reject(&conversation_id, &user_id, &invitees, Instant::now())
                {
                    RejectOutcome::StillRinging | RejectOutcome::Ended => {
                        self.relay_to_room(
                            &conversation_id,
                            &user_id,
                            &ServerEvent::CallRejected {
                                from: user_id.clone(),
                                reason: None,
                            },
                        );
                    }
                    RejectOutcome::Ignored => {
                        debug!(room = %conversation_id, "call_reject without a ringing session dropped");
                    }
                }
            }

            ClientEvent::WebrtcOffer {
                conversation_id,
                to,
                sdp,
            } => {
                let event = ServerEvent::WebrtcOffer {
                    from: user_id.clone(),
                    sdp,
                };
                self.relay_signal(connection_id, &conversation_id, &user_id, to, event);
            }

            ClientEvent::WebrtcAnswer {
                conversation_id,
                to,
                sdp,
            } => {
                let event = ServerEvent::WebrtcAnswer {
                    from: user_id.clone(),
                    sdp,
                };
                self.relay_signal(connection_id, &conversation_id, &user_id, to, event);
            }

            ClientEvent::WebrtcIceCandidate {
                conversation_id,
                to,
                candidate,
            } => {
                let event = ServerEvent::WebrtcIceCandidate {
                    from: user_id.clone(),
                    candidate,
                };
                self.relay_signal(connection_id, &conversation_id, &user_id, to, event);
            }

            ClientEvent::WebrtcHangup { conversation_id } => {
                if !self.rooms.is_member(&conversation_id, connection_id) {
                    debug!(connection_id, room = %conversation_id, "hangup from unjoined room dropped");
                    return;
                }
                if self.calls.hangup(&conversation_id).is_some() {
                    self.relay_to_room(
                        &conversation_id,
                        &user_id,
                        &ServerEvent::WebrtcHangup {
                            from: user_id.clone(),
                        },
                    );
                } else {
                    debug!(room = %conversation_id, "hangup without a session dropped");
                }
            }
        }
    }
}

impl Actor for RelayServer {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        info!(
            ring_timeout_secs = self.ring_timeout.as_secs(),
            "relay server started"
        );
        ctx.run_interval(RING_SWEEP_INTERVAL, |act, _ctx| {
            for session in act
                .calls
                .sweep_ring_timeouts(act.ring_timeout, Instant::now())
            {
                act.send_to_user(
                    &session.caller,
                    &ServerEvent::CallRejected {
                        from: SYSTEM_USER.to_string(),
                        reason: Some("timeout".to_string()),
                    },
                );
            }
        });
    }
}

impl Handler<Connect> for RelayServer {
    type Result = MessageResult<Connect>;

    fn handle(&mut self, msg: Connect, _ctx: &mut Context<Self>) -> Self::Result {
        let Connect {
            connection_id,
            user_id,
            addr,
            disconnect_addr,
        } = msg;

        if let Err(e) = self.registry.register(connection_id, user_id.clone()) {
            // ids come from a v4 uuid, so a collision means a bug somewhere
            error!(connection_id, "{e}; refusing the connection");
            return MessageResult(Err(e.to_string()));
        }
        self.sessions.insert(connection_id, addr);
        self.disconnect_addrs.insert(connection_id, disconnect_addr);
        info!(connection_id, user = %user_id, "connection registered");

        if let Some(PresenceTransition::CameOnline(user)) =
            self.presence.connection_opened(&user_id)
        {
            self.broadcast(&ServerEvent::UserOnline { user_id: user });
        }
        MessageResult(Ok(()))
    }
}

impl Handler<Disconnect> for RelayServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _ctx: &mut Context<Self>) -> Self::Result {
        let connection_id = msg.connection_id;

        // Cleanup order matters: membership first, then the registry, then
        // call teardown, presence last.
        let affected_rooms = self.rooms.drop_connection(connection_id);
        let Some(user_id) = self.registry.unregister(connection_id) else {
            // disconnect raced an earlier cleanup for the same connection
            self.sessions.remove(&connection_id);
            self.disconnect_addrs.remove(&connection_id);
            return;
        };
        self.sessions.remove(&connection_id);
        self.disconnect_addrs.remove(&connection_id);
        info!(
            connection_id,
            user = %user_id,
            rooms = affected_rooms.len(),
            "connection closed"
        );

        if !self.registry.is_online(&user_id) {
            for session in self.calls.end_sessions_involving(&user_id) {
                self.relay_to_room(
                    &session.room_id,
                    &user_id,
                    &ServerEvent::WebrtcHangup {
                        from: user_id.clone(),
                    },
                );
            }
        }

        if let Some(PresenceTransition::WentOffline(user)) =
            self.presence.connection_closed(&user_id)
        {
            self.broadcast(&ServerEvent::UserOffline { user_id: user });
        }
    }
}

impl Handler<Inbound> for RelayServer {
    type Result = ();

    fn handle(&mut self, msg: Inbound, _ctx: &mut Context<Self>) -> Self::Result {
        let Inbound {
            connection_id,
            event,
        } = msg;

        let Some(user_id) = self.registry.user_of(connection_id).cloned() else {
            if self.sessions.contains_key(&connection_id) {
                // the session map and the registry disagree; drop the
                // offending connection rather than relay under a stale
                // identity
                error!(
                    connection_id,
                    "frame from a connection the registry does not know; forcing disconnect"
                );
                if let Some(addr) = self.disconnect_addrs.get(&connection_id) {
                    addr.do_send(ForceDisconnect);
                }
            } else {
                debug!(connection_id, "frame from a departed connection dropped");
            }
            return;
        };

        self.dispatch(connection_id, user_id, event);
    }
}
