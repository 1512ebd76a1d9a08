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

//! Delivery target computation for room events.
//!
//! Exclusion is by user, not by connection: a sender with two devices in
//! the same room must not see its own events echoed on either of them.

use crate::registry::{ConnectionId, ConnectionRegistry, RoomMembership};

/// Member connections of the room, minus every connection of `sender`.
pub fn room_targets(
    rooms: &RoomMembership,
    registry: &ConnectionRegistry,
    room_id: &str,
    sender: &str,
) -> Vec<ConnectionId> {
    rooms
        .members_of(room_id)
        .filter(|conn| {
            registry
                .user_of(*conn)
                .map(|user| user.as_str() != sender)
                .unwrap_or(false)
        })
        .collect()
}

/// Point-to-point delivery: the addressee's connections that are members
/// of the room.
pub fn user_targets(
    rooms: &RoomMembership,
    registry: &ConnectionRegistry,
    room_id: &str,
    user_id: &str,
) -> Vec<ConnectionId> {
    rooms
        .members_of(room_id)
        .filter(|conn| {
            registry
                .user_of(*conn)
                .map(|user| user.as_str() == user_id)
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (RoomMembership, ConnectionRegistry) {
        let mut registry = ConnectionRegistry::new();
        registry.register(1, "alice".into()).unwrap();
        registry.register(2, "alice".into()).unwrap();
        registry.register(3, "bob".into()).unwrap();
        registry.register(4, "carol".into()).unwrap();

        let mut rooms = RoomMembership::new();
        rooms.join("r1", 1);
        rooms.join("r1", 2);
        rooms.join("r1", 3);
        // carol is connected but not in r1
        (rooms, registry)
    }

    #[test]
    fn excludes_every_connection_of_the_sender() {
        let (rooms, registry) = fixture();
        let targets = room_targets(&rooms, &registry, "r1", "alice");
        assert_eq!(targets, vec![3]);
    }

    #[test]
    fn non_members_are_never_targets() {
        let (rooms, registry) = fixture();
        let mut targets = room_targets(&rooms, &registry, "r1", "bob");
        targets.sort();
        assert_eq!(targets, vec![1, 2]);
        assert!(!targets.contains(&4));
    }

    #[test]
    fn unknown_room_has_no_targets() {
        let (rooms, registry) = fixture();
        assert!(room_targets(&rooms, &registry, "nowhere", "alice").is_empty());
    }

    #[test]
    fn point_to_point_hits_all_devices_in_the_room() {
        let (rooms, registry) = fixture();
        let mut targets = user_targets(&rooms, &registry, "r1", "alice");
        targets.sort();
        assert_eq!(targets, vec![1, 2]);
    }

    #[test]
    fn point_to_point_ignores_connections_outside_the_room() {
        let (rooms, registry) = fixture();
        assert!(user_targets(&rooms, &registry, "r1", "carol").is_empty());
    }
}
