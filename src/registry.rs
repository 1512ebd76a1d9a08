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

//! Connection and room bookkeeping.
//!
//! [`ConnectionRegistry`] maps connections to authenticated users and back;
//! [`RoomMembership`] is the bidirectional room table. Both are plain data
//! structures with no transport types in them, so tests can drive as many
//! independent instances as they like. At runtime a single relay actor owns
//! one of each, which is what keeps the two tables consistent: every
//! mutation goes through the same mailbox.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};

pub type ConnectionId = u64;
pub type UserId = String;
pub type RoomId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A connection id was registered twice. Ids are drawn from a v4 uuid,
    /// so this indicates a bug rather than bad input.
    DuplicateConnection(ConnectionId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateConnection(id) => {
                write!(f, "connection {id} is already registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// What the registry knows about one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub user_id: UserId,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionInfo>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> Result<(), RegistryError> {
        if self.connections.contains_key(&connection_id) {
            return Err(RegistryError::DuplicateConnection(connection_id));
        }
        self.by_user
            .entry(user_id.clone())
            .or_default()
            .insert(connection_id);
        self.connections.insert(
            connection_id,
            ConnectionInfo {
                user_id,
                connected_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Idempotent: a disconnect can race an explicit logout, so an unknown
    /// id is a no-op, not an error. Returns the user the connection
    /// belonged to, if any.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<UserId> {
        let info = self.connections.remove(&connection_id)?;
        if let Some(conns) = self.by_user.get_mut(&info.user_id) {
            conns.remove(&connection_id);
            if conns.is_empty() {
                self.by_user.remove(&info.user_id);
            }
        }
        Some(info.user_id)
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<&UserId> {
        self.connections.get(&connection_id).map(|info| &info.user_id)
    }

    pub fn info(&self, connection_id: ConnectionId) -> Option<&ConnectionInfo> {
        self.connections.get(&connection_id)
    }

    pub fn connections_of(&self, user_id: &str) -> impl Iterator<Item = ConnectionId> + '_ {
        self.by_user.get(user_id).into_iter().flatten().copied()
    }

    /// A user is online while they have at least one live connection.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Bidirectional room table. Rooms exist only while they have members:
/// entries are created on first join and deleted once the member set
/// empties, so churn does not leak table entries.
#[derive(Debug, Default)]
pub struct RoomMembership {
    members: HashMap<RoomId, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<RoomId>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; returns true if the connection was not already a member.
    pub fn join(&mut self, room_id: &str, connection_id: ConnectionId) -> bool {
        let inserted = self
            .members
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id);
        if inserted {
            self.joined
                .entry(connection_id)
                .or_default()
                .insert(room_id.to_string());
        }
        inserted
    }

    /// Returns true if the connection was a member.
    pub fn leave(&mut self, room_id: &str, connection_id: ConnectionId) -> bool {
        let Some(members) = self.members.get_mut(room_id) else {
            return false;
        };
        if !members.remove(&connection_id) {
            return false;
        }
        if members.is_empty() {
            self.members.remove(room_id);
        }
        if let Some(rooms) = self.joined.get_mut(&connection_id) {
            rooms.remove(room_id);
            if rooms.is_empty() {
                self.joined.remove(&connection_id);
            }
        }
        true
    }

    pub fn members_of(&self, room_id: &str) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.get(room_id).into_iter().flatten().copied()
    }

    pub fn rooms_of(&self, connection_id: ConnectionId) -> impl Iterator<Item = &RoomId> + '_ {
        self.joined.get(&connection_id).into_iter().flatten()
    }

    pub fn is_member(&self, room_id: &str, connection_id: ConnectionId) -> bool {
        self.members
            .get(room_id)
            .map(|members| members.contains(&connection_id))
            .unwrap_or(false)
    }

    /// Removes the connection from every room it joined and returns those
    /// rooms. Used on disconnect.
    pub fn drop_connection(&mut self, connection_id: ConnectionId) -> Vec<RoomId> {
        let Some(rooms) = self.joined.remove(&connection_id) else {
            return Vec::new();
        };
        let mut affected = Vec::with_capacity(rooms.len());
        for room_id in rooms {
            if let Some(members) = self.members.get_mut(&room_id) {
                members.remove(&connection_id);
                if members.is_empty() {
                    self.members.remove(&room_id);
                }
            }
            affected.push(room_id);
        }
        affected
    }

    pub fn room_count(&self) -> usize {
        self.members.len()
    }
}
