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

//! Realtime relay for the chatapp backend.
//!
//! Members of a conversation exchange low-latency events over persistent
//! WebSocket connections: presence, typing indicators, message-lifecycle
//! notifications, and WebRTC call signaling. Delivery is best-effort and
//! at-most-once; payloads are opaque to the relay. Message persistence,
//! credentials and CRUD routing live in the companion HTTP service.

pub mod actors;
pub mod auth;
pub mod calls;
pub mod constants;
pub mod events;
pub mod fanout;
pub mod lobby;
pub mod messages;
pub mod models;
pub mod presence;
pub mod registry;
