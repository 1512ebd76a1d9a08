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

//! Presence derivation.
//!
//! A user is online while they have at least one live connection. The
//! tracker keeps a per-user refcount fed by registry changes and reports
//! only the edges: opening a second device or closing one of several
//! produces no transition, so `user_online`/`user_offline` fire exactly
//! once per edge.

use std::collections::HashMap;

use crate::registry::UserId;

/// An online/offline edge worth broadcasting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceTransition {
    CameOnline(UserId),
    WentOffline(UserId),
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    live: HashMap<UserId, usize>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&mut self, user_id: &str) -> Option<PresenceTransition> {
        let count = self.live.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        (*count == 1).then(|| PresenceTransition::CameOnline(user_id.to_string()))
    }

    pub fn connection_closed(&mut self, user_id: &str) -> Option<PresenceTransition> {
        match self.live.get_mut(user_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                None
            }
            Some(_) => {
                self.live.remove(user_id);
                Some(PresenceTransition::WentOffline(user_id.to_string()))
            }
            // close without a matching open; tolerated like an idempotent
            // unregister
            None => None,
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.live.contains_key(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.live.len()
    }
}
