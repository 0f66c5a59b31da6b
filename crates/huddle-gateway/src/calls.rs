//! Call sessions: the router's single record of who is calling whom.
//!
//! A session is opened by `request-call` and closed by reject, end, or a participant
//! leaving. Closed call ids are retired into a bounded window so a settled id is never
//! accepted for a new attempt.

use chrono::{DateTime, Utc};
use huddle_common::ids::{CallId, ConnectionId, UserId};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallPhase {
    Requested,
    Active,
    Rejected,
    Ended,
}

/// One call attempt between two connections.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: CallId,
    pub caller: UserId,
    pub caller_connection: ConnectionId,
    pub callee: UserId,
    pub callee_connection: ConnectionId,
    pub phase: CallPhase,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(
        call_id: CallId,
        caller: UserId,
        caller_connection: ConnectionId,
        callee: UserId,
        callee_connection: ConnectionId,
    ) -> Self {
        Self {
            call_id,
            caller,
            caller_connection,
            callee,
            callee_connection,
            phase: CallPhase::Requested,
            requested_at: Utc::now(),
            accepted_at: None,
        }
    }

    pub fn room_id(&self) -> String {
        self.call_id.room_id()
    }

    pub fn involves(&self, connection_id: ConnectionId) -> bool {
        self.caller_connection == connection_id || self.callee_connection == connection_id
    }

    /// The other participant's connection and user id.
    pub fn peer_of(&self, connection_id: ConnectionId) -> Option<(ConnectionId, &UserId)> {
        if connection_id == self.caller_connection {
            Some((self.callee_connection, &self.callee))
        } else if connection_id == self.callee_connection {
            Some((self.caller_connection, &self.caller))
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.phase == CallPhase::Requested
    }

    /// Accepted: both participants are in-call.
    pub fn is_established(&self) -> bool {
        self.phase == CallPhase::Active
    }

    /// Both connections of the `call-{id}` routing group.
    pub fn connections(&self) -> [ConnectionId; 2] {
        [self.caller_connection, self.callee_connection]
    }
}

#[derive(Debug)]
pub struct CallBook {
    sessions: HashMap<CallId, CallSession>,
    retired: VecDeque<CallId>,
    retired_set: HashSet<CallId>,
    retired_capacity: usize,
}

impl CallBook {
    pub fn new(retired_capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            retired: VecDeque::new(),
            retired_set: HashSet::new(),
            retired_capacity,
        }
    }

    pub fn open(&mut self, session: CallSession) {
        self.sessions.insert(session.call_id.clone(), session);
    }

    pub fn get(&self, call_id: &CallId) -> Option<&CallSession> {
        self.sessions.get(call_id)
    }

    pub fn get_mut(&mut self, call_id: &CallId) -> Option<&mut CallSession> {
        self.sessions.get_mut(call_id)
    }

    /// Live or recently settled.
    pub fn is_known(&self, call_id: &CallId) -> bool {
        self.sessions.contains_key(call_id) || self.retired_set.contains(call_id)
    }

    /// Remove a session, stamping its final phase, and retire its id.
    pub fn close(&mut self, call_id: &CallId, phase: CallPhase) -> Option<CallSession> {
        let mut session = self.sessions.remove(call_id)?;
        session.phase = phase;
        self.retire(call_id.clone());
        Some(session)
    }

    /// Ids of every live session a connection takes part in.
    pub fn call_ids_for(&self, connection_id: ConnectionId) -> Vec<CallId> {
        self.sessions
            .values()
            .filter(|s| s.involves(connection_id))
            .map(|s| s.call_id.clone())
            .collect()
    }

    /// Pending requests ringing on a connection.
    pub fn pending_for_callee(&self, connection_id: ConnectionId) -> Vec<CallId> {
        self.sessions
            .values()
            .filter(|s| s.is_pending() && s.callee_connection == connection_id)
            .map(|s| s.call_id.clone())
            .collect()
    }

    /// Pending requests a connection placed itself.
    pub fn pending_for_caller(&self, connection_id: ConnectionId) -> Vec<CallId> {
        self.sessions
            .values()
            .filter(|s| s.is_pending() && s.caller_connection == connection_id)
            .map(|s| s.call_id.clone())
            .collect()
    }

    pub fn has_live_session(&self, connection_id: ConnectionId) -> bool {
        self.sessions.values().any(|s| s.involves(connection_id))
    }

    pub fn pending_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_pending()).count()
    }

    pub fn established_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_established()).count()
    }

    fn retire(&mut self, call_id: CallId) {
        if self.retired_capacity == 0 {
            return;
        }
        if self.retired_set.insert(call_id.clone()) {
            self.retired.push_back(call_id);
        }
        while self.retired.len() > self.retired_capacity {
            if let Some(oldest) = self.retired.pop_front() {
                self.retired_set.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, caller: ConnectionId, callee: ConnectionId) -> CallSession {
        CallSession::new(id.into(), "1".into(), caller, "2".into(), callee)
    }

    #[test]
    fn peer_lookup_is_symmetric() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let s = session("c1", a, b);

        assert_eq!(s.peer_of(a).map(|(c, _)| c), Some(b));
        assert_eq!(s.peer_of(b).map(|(c, u)| (c, u.clone())), Some((a, "1".into())));
        assert!(s.peer_of(ConnectionId::new()).is_none());
        assert_eq!(s.room_id(), "call-c1");
    }

    #[test]
    fn closed_ids_stay_known_until_evicted() {
        let mut book = CallBook::new(2);
        let (a, b) = (ConnectionId::new(), ConnectionId::new());

        for id in ["c1", "c2", "c3"] {
            book.open(session(id, a, b));
            let closed = book.close(&id.into(), CallPhase::Ended).unwrap();
            assert_eq!(closed.phase, CallPhase::Ended);
        }

        assert!(!book.is_known(&"c1".into()), "oldest id evicted");
        assert!(book.is_known(&"c2".into()));
        assert!(book.is_known(&"c3".into()));
        assert!(book.close(&"c3".into(), CallPhase::Ended).is_none());
    }

    #[test]
    fn pending_requests_are_found_per_callee() {
        let mut book = CallBook::new(16);
        let (alice, bob, carol) = (ConnectionId::new(), ConnectionId::new(), ConnectionId::new());
        book.open(session("c1", alice, bob));
        book.open(session("c2", carol, bob));

        let mut pending = book.pending_for_callee(bob);
        pending.sort();
        assert_eq!(pending, vec![CallId::from("c1"), CallId::from("c2")]);
        assert_eq!(book.call_ids_for(alice), vec![CallId::from("c1")]);
        assert_eq!(book.pending_count(), 2);

        book.get_mut(&"c1".into()).unwrap().phase = CallPhase::Active;
        assert_eq!(book.established_count(), 1);
        assert_eq!(book.pending_for_callee(bob), vec![CallId::from("c2")]);
    }
}
