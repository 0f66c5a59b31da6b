//! Presence registry: who is in the lobby, and in what state.
//!
//! Two indexes, updated together:
//! - `by_connection`: connection_id → PresenceRecord (the source of truth)
//! - `by_user`: user_id → [connection_id] in join order (quick "where is this user?")
//!
//! A user with several tabs has several records. Lookups by user return the most
//! recently joined connection.
//!
//! The registry is plain data owned by the router task, so no locking is needed.

use chrono::{DateTime, Utc};
use huddle_common::ids::{ConnectionId, UserId};
use huddle_common::protocol::{PresenceStatus, RosterEntry};
use serde::Serialize;
use std::collections::HashMap;

/// Lobby presence for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub display_name: String,
    pub status: PresenceStatus,
    pub joined_at: DateTime<Utc>,
    /// Roster position; survives re-joins on the same connection.
    seq: u64,
}

impl PresenceRecord {
    pub fn is_available(&self) -> bool {
        self.status.is_available()
    }

    pub fn roster_entry(&self) -> RosterEntry {
        RosterEntry {
            user_id: self.user_id.clone(),
            user_name: self.display_name.clone(),
            status: self.status,
            is_available: self.is_available(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    by_connection: HashMap<ConnectionId, PresenceRecord>,
    by_user: HashMap<UserId, Vec<ConnectionId>>,
    next_seq: u64,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection as `online`. Re-joining replaces the record in place.
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        user_id: UserId,
        display_name: String,
    ) -> &PresenceRecord {
        let previous = self
            .by_connection
            .get(&connection_id)
            .map(|r| (r.seq, r.user_id.clone()));

        let seq = match previous {
            Some((seq, old_user)) => {
                self.unindex(&old_user, connection_id);
                seq
            }
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };

        self.by_user
            .entry(user_id.clone())
            .or_default()
            .push(connection_id);

        let record = PresenceRecord {
            connection_id,
            user_id,
            display_name,
            status: PresenceStatus::Online,
            joined_at: Utc::now(),
            seq,
        };

        self.by_connection.insert(connection_id, record);
        &self.by_connection[&connection_id]
    }

    /// Remove a connection's record. Safe to call for unknown connections.
    pub fn leave(&mut self, connection_id: ConnectionId) -> Option<PresenceRecord> {
        let record = self.by_connection.remove(&connection_id)?;
        self.unindex(&record.user_id, connection_id);
        Some(record)
    }

    /// Update a connection's status. Returns false if the connection is unknown.
    pub fn set_status(&mut self, connection_id: ConnectionId, status: PresenceStatus) -> bool {
        match self.by_connection.get_mut(&connection_id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&PresenceRecord> {
        self.by_connection.get(&connection_id)
    }

    pub fn status(&self, connection_id: ConnectionId) -> Option<PresenceStatus> {
        self.get(connection_id).map(|r| r.status)
    }

    /// Current connection for a user. `None` means "currently unreachable".
    pub fn find_connection_by_user(&self, user_id: &UserId) -> Option<ConnectionId> {
        self.by_user
            .get(user_id)
            .and_then(|conns| conns.last().copied())
    }

    /// Roster snapshot in join order.
    pub fn roster(&self) -> Vec<RosterEntry> {
        let mut records: Vec<&PresenceRecord> = self.by_connection.values().collect();
        records.sort_by_key(|r| r.seq);
        records.into_iter().map(PresenceRecord::roster_entry).collect()
    }

    /// Number of joined connections.
    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }

    /// Number of distinct joined users.
    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    pub fn stats(&self) -> PresenceStats {
        let mut stats = PresenceStats {
            connections: self.len(),
            users: self.user_count(),
            ..Default::default()
        };
        for record in self.by_connection.values() {
            match record.status {
                PresenceStatus::Online => stats.online += 1,
                PresenceStatus::Busy => stats.busy += 1,
                PresenceStatus::InCall => stats.in_call += 1,
            }
        }
        stats
    }

    fn unindex(&mut self, user_id: &UserId, connection_id: ConnectionId) {
        if let Some(conns) = self.by_user.get_mut(user_id) {
            conns.retain(|c| *c != connection_id);
            if conns.is_empty() {
                self.by_user.remove(user_id);
            }
        }
    }
}

/// Presence counters for the health endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStats {
    pub connections: usize,
    pub users: usize,
    pub online: usize,
    pub busy: usize,
    pub in_call: usize,
}
