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

//! Call session state machine.
//!
//! At most one call session exists per room. A session is created RINGING
//! by `call_request`, becomes ACTIVE on the first accept, and ends by
//! hangup, unanimous rejection, ring timeout, or a participant losing
//! their last connection. The terminal state is represented by deleting
//! the session, which returns the room to idle; [`CallState`] therefore
//! only models the live states.
//!
//! Every method takes the current [`Instant`] from the caller so timeout
//! behavior can be tested without waiting on a real clock.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::registry::{RoomId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Ringing,
    Active,
}

#[derive(Debug, Clone)]
pub struct CallSession {
    pub room_id: RoomId,
    pub state: CallState,
    pub caller: UserId,
    pub with_video: bool,
    /// Participants who accepted. Accepts are additive; late accepts join
    /// the running call instead of being refused.
    pub accepted: HashSet<UserId>,
    /// Invitees who rejected while the session was ringing.
    pub rejected: HashSet<UserId>,
    pub started_at: Instant,
    pub last_activity: Instant,
}

impl CallSession {
    /// Whether this user holds a leg of the call (caller or accepted).
    pub fn involves(&self, user_id: &str) -> bool {
        self.caller == user_id || self.accepted.contains(user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Session created; ring the rest of the room.
    Ringing,
    /// The room already has a live session (glare); answer only the
    /// requester, leave the session untouched.
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// First accept: RINGING to ACTIVE.
    Answered,
    /// Accept on an already active session: group join.
    Joined,
    /// No session, or the caller tried to accept their own call.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectOutcome {
    /// Other invitees have not answered yet; keep ringing.
    StillRinging,
    /// Every other member rejected; session deleted.
    Ended,
    /// No ringing session, or the caller rejecting their own call.
    Ignored,
}

#[derive(Debug, Default)]
pub struct CallRegistry {
    sessions: HashMap<RoomId, CallSession>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, room_id: &str) -> Option<&CallSession> {
        self.sessions.get(room_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn request(
        &mut self,
        room_id: &str,
        caller: &str,
        with_video: bool,
        now: Instant,
    ) -> RequestOutcome {
        if self.sessions.contains_key(room_id) {
            debug!(room = room_id, caller, "call_request while a session exists");
            return RequestOutcome::Busy;
        }
        info!(room = room_id, caller, with_video, "call ringing");
        self.sessions.insert(
            room_id.to_string(),
            CallSession {
                room_id: room_id.to_string(),
                state: CallState::Ringing,
                caller: caller.to_string(),
                with_video,
                accepted: HashSet::new(),
                rejected: HashSet::new(),
                started_at: now,
                last_activity: now,
            },
        );
        RequestOutcome::Ringing
    }

    pub fn accept(&mut self, room_id: &str, responder: &str, now: Instant) -> AcceptOutcome {
        let Some(session) = self.sessions.get_mut(room_id) else {
            return AcceptOutcome::Ignored;
        };
        if session.caller == responder {
            return AcceptOutcome::Ignored;
        }
        session.last_activity = now;
        let answered = session.state == CallState::Ringing;
        session.state = CallState::Active;
        session.accepted.insert(responder.to_string());
        session.rejected.remove(responder);
        if answered {
            info!(room = room_id, responder, "call answered");
            AcceptOutcome::Answered
        } else {
            info!(room = room_id, responder, "participant joined active call");
            AcceptOutcome::Joined
        }
    }

    /// `other_members` are the distinct users currently in the room minus
    /// the caller; the session ends once all of them have rejected.
    pub fn reject(
        &mut self,
        room_id: &str,
        responder: &str,
        other_members: &HashSet<UserId>,
        now: Instant,
    ) -> RejectOutcome {
        let Some(session) = self.sessions.get_mut(room_id) else {
            return RejectOutcome::Ignored;
        };
        if session.state != CallState::Ringing || session.caller == responder {
            return RejectOutcome::Ignored;
        }
        session.last_activity = now;
        session.rejected.insert(responder.to_string());
        let all_rejected = other_members
            .iter()
            .all(|user| session.rejected.contains(user));
        if all_rejected {
            info!(room = room_id, "call rejected by every invitee");
            self.sessions.remove(room_id);
            RejectOutcome::Ended
        } else {
            RejectOutcome::StillRinging
        }
    }

    /// Ends the room's session; returns it if one existed.
    pub fn hangup(&mut self, room_id: &str) -> Option<CallSession> {
        let session = self.sessions.remove(room_id);
        if session.is_some() {
            info!(room = room_id, "call ended");
        }
        session
    }

    /// Marks signaling activity on the room's session; false if the room
    /// has no live session.
    pub fn touch(&mut self, room_id: &str, now: Instant) -> bool {
        match self.sessions.get_mut(room_id) {
            Some(session) => {
                session.last_activity = now;
                true
            }
            None => false,
        }
    }

    /// Ends every session in which `user_id` holds a leg. Used when the
    /// user's last connection disconnects mid-call.
    pub fn end_sessions_involving(&mut self, user_id: &str) -> Vec<CallSession> {
        let rooms: Vec<RoomId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.involves(user_id))
            .map(|(room_id, _)| room_id.clone())
            .collect();
        rooms
            .into_iter()
            .filter_map(|room_id| {
                info!(room = %room_id, user = user_id, "participant departed mid-call");
                self.sessions.remove(&room_id)
            })
            .collect()
    }

    /// Removes RINGING sessions idle longer than `timeout` and returns
    /// them so the caller can be told the call went unanswered.
    pub fn sweep_ring_timeouts(&mut self, timeout: Duration, now: Instant) -> Vec<CallSession> {
        let expired: Vec<RoomId> = self
            .sessions
            .iter()
            .filter(|(_, session)| {
                session.state == CallState::Ringing
                    && now.saturating_duration_since(session.last_activity) >= timeout
            })
            .map(|(room_id, _)| room_id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|room_id| {
                info!(room = %room_id, "ring timeout");
                self.sessions.remove(&room_id)
            })
            .collect()
    }
}
