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

//! Wire protocol of the relay.
//!
//! Every frame is a JSON envelope `{"event": <name>, "data": {...}}` with
//! camelCase payload fields, matching what the web client already speaks.
//! Inbound frames form a closed union: anything that does not parse into
//! [`ClientEvent`] is an invalid frame and never reaches a handler.
//!
//! Message bodies and WebRTC payloads (`sdp`, `candidate`) are opaque to
//! the relay. They are captured as raw JSON and forwarded verbatim with
//! the sender identity attached, never inspected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::{ConnectionId, RoomId, UserId};

/// Scope of a message deletion, forwarded to the room untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionScope {
    MeOnly,
    Everyone,
}

/// Strips fields the relay itself stamps onto relayed frames. Opaque
/// bodies are flattened into the outbound payload, so a client-supplied
/// `from` would otherwise ride along and shadow the real sender.
pub fn sanitize_body(body: &mut Value) {
    if let Some(map) = body.as_object_mut() {
        map.remove("from");
    }
}

/// Frames a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Handshake credential; must be the first frame on the socket.
    #[serde(rename = "authenticate")]
    Authenticate { token: String },

    #[serde(rename = "join_conversation", rename_all = "camelCase")]
    JoinConversation { conversation_id: RoomId },

    #[serde(rename = "leave_conversation", rename_all = "camelCase")]
    LeaveConversation { conversation_id: RoomId },

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing { conversation_id: RoomId },

    #[serde(rename = "typing_stop", rename_all = "camelCase")]
    TypingStop { conversation_id: RoomId },

    #[serde(rename = "message:new", rename_all = "camelCase")]
    MessageNew {
        conversation_id: RoomId,
        #[serde(flatten)]
        body: Value,
    },

    #[serde(rename = "message:edited", rename_all = "camelCase")]
    MessageEdited {
        conversation_id: RoomId,
        #[serde(flatten)]
        body: Value,
    },

    #[serde(rename = "message:deleted", rename_all = "camelCase")]
    MessageDeleted {
        conversation_id: RoomId,
        scope: DeletionScope,
        #[serde(flatten)]
        body: Value,
    },

    #[serde(rename = "message:seen", rename_all = "camelCase")]
    MessageSeen {
        conversation_id: RoomId,
        #[serde(flatten)]
        body: Value,
    },

    #[serde(rename = "call_request", rename_all = "camelCase")]
    CallRequest {
        conversation_id: RoomId,
        with_video: bool,
    },

    #[serde(rename = "call_accept", rename_all = "camelCase")]
    CallAccept { conversation_id: RoomId },

    #[serde(rename = "call_reject", rename_all = "camelCase")]
    CallReject { conversation_id: RoomId },

    /// `to` narrows delivery to one user's connections in the room.
    #[serde(rename = "webrtc_offer", rename_all = "camelCase")]
    WebrtcOffer {
        conversation_id: RoomId,
        to: Option<UserId>,
        sdp: Value,
    },

    #[serde(rename = "webrtc_answer", rename_all = "camelCase")]
    WebrtcAnswer {
        conversation_id: RoomId,
        to: Option<UserId>,
        sdp: Value,
    },

    #[serde(rename = "webrtc_ice_candidate", rename_all = "camelCase")]
    WebrtcIceCandidate {
        conversation_id: RoomId,
        to: Option<UserId>,
        candidate: Value,
    },

    #[serde(rename = "webrtc_hangup", rename_all = "camelCase")]
    WebrtcHangup { conversation_id: RoomId },
}

/// Frames the relay sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Handshake ack; tells the client its identity and connection id.
    #[serde(rename = "authenticated", rename_all = "camelCase")]
    Authenticated {
        user_id: UserId,
        connection_id: ConnectionId,
    },

    #[serde(rename = "user_online", rename_all = "camelCase")]
    UserOnline { user_id: UserId },

    #[serde(rename = "user_offline", rename_all = "camelCase")]
    UserOffline { user_id: UserId },

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        conversation_id: RoomId,
        user_id: UserId,
    },

    #[serde(rename = "typing_stop", rename_all = "camelCase")]
    TypingStop {
        conversation_id: RoomId,
        user_id: UserId,
    },

    #[serde(rename = "message:new", rename_all = "camelCase")]
    MessageNew {
        conversation_id: RoomId,
        from: UserId,
        #[serde(flatten)]
        body: Value,
    },

    #[serde(rename = "message:edited", rename_all = "camelCase")]
    MessageEdited {
        conversation_id: RoomId,
        from: UserId,
        #[serde(flatten)]
        body: Value,
    },

    #[serde(rename = "message:deleted", rename_all = "camelCase")]
    MessageDeleted {
        conversation_id: RoomId,
        from: UserId,
        scope: DeletionScope,
        #[serde(flatten)]
        body: Value,
    },

    #[serde(rename = "message:seen", rename_all = "camelCase")]
    MessageSeen {
        conversation_id: RoomId,
        from: UserId,
        #[serde(flatten)]
        body: Value,
    },

    #[serde(rename = "call_incoming", rename_all = "camelCase")]
    CallIncoming { from: UserId, with_video: bool },

    #[serde(rename = "call_accepted")]
    CallAccepted { from: UserId },

    #[serde(rename = "call_rejected")]
    CallRejected {
        from: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Returned only to a requester whose room already has a live call.
    #[serde(rename = "call_busy")]
    CallBusy,

    #[serde(rename = "webrtc_offer")]
    WebrtcOffer { from: UserId, sdp: Value },

    #[serde(rename = "webrtc_answer")]
    WebrtcAnswer { from: UserId, sdp: Value },

    #[serde(rename = "webrtc_ice_candidate")]
    WebrtcIceCandidate { from: UserId, candidate: Value },

    #[serde(rename = "webrtc_hangup")]
    WebrtcHangup { from: UserId },

    #[serde(rename = "error")]
    Error { message: String },
}
