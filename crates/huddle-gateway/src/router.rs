//! Call signaling router.
//!
//! Validates call-lifecycle events and forwards them, plus opaque WebRTC payloads,
//! between the right connections. The router is synchronous: every operation mutates
//! the registry and call book, then queues [`Delivery`]s that the router task hands to
//! the connection writers. Nothing here blocks or does I/O.
//!
//! Lifecycle per call id:
//!
//! ```text
//!   request-call ──▶ Requested ──accept──▶ Active ──end / disconnect──▶ Ended
//!                        │
//!                        └──reject / cancel / disconnect──▶ Rejected | Ended
//! ```

use crate::calls::{CallBook, CallPhase, CallSession};
use crate::registry::{PresenceRecord, PresenceRegistry, PresenceStats};
use chrono::Utc;
use huddle_common::config::AppConfig;
use huddle_common::error::SignalingError;
use huddle_common::ice::IceServerConfig;
use huddle_common::ids::{CallId, ConnectionId, UserId};
use huddle_common::protocol::{
    CallEnded, CallRejected, CallRequestSent, CallStarted, ClientEvent, InboundSignal,
    IncomingCall, LobbyWelcome, PeerDisconnected, PresenceStatus, ServerEvent, SignalPayload,
};
use huddle_common::validation::{validate_display_name, validate_request};
use serde::Serialize;

/// Where a server event goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Connection(ConnectionId),
    /// Every open connection, joined or not.
    Broadcast,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub target: Target,
    pub event: ServerEvent,
}

/// Result of a call request, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Delivered(CallId),
    TargetUnreachable,
    Refused(SignalingError),
}

/// Tunables the router needs from the application config.
#[derive(Debug, Clone)]
pub struct RouterPolicy {
    pub notify_peer_on_disconnect: bool,
    pub retired_call_id_capacity: usize,
    pub ice_servers: Vec<IceServerConfig>,
    /// Advertised to clients in `lobby-welcome`; the server never expires requests.
    pub ring_timeout_secs: u64,
}

impl Default for RouterPolicy {
    fn default() -> Self {
        Self {
            notify_peer_on_disconnect: true,
            retired_call_id_capacity: 4096,
            ice_servers: IceServerConfig::defaults(),
            ring_timeout_secs: 30,
        }
    }
}

impl From<&AppConfig> for RouterPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            notify_peer_on_disconnect: config.calls.notify_peer_on_disconnect,
            retired_call_id_capacity: config.calls.retired_call_id_capacity,
            ice_servers: config.ice.servers.clone(),
            ring_timeout_secs: config.calls.ring_timeout().as_secs(),
        }
    }
}

/// Router counters for the health endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    #[serde(flatten)]
    pub presence: PresenceStats,
    pub pending_calls: usize,
    pub active_calls: usize,
}

pub struct SignalingRouter {
    registry: PresenceRegistry,
    calls: CallBook,
    policy: RouterPolicy,
    outbox: Vec<Delivery>,
}

impl SignalingRouter {
    pub fn new(policy: RouterPolicy) -> Self {
        Self {
            registry: PresenceRegistry::new(),
            calls: CallBook::new(policy.retired_call_id_capacity),
            policy,
            outbox: Vec::new(),
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn calls(&self) -> &CallBook {
        &self.calls
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            presence: self.registry.stats(),
            pending_calls: self.calls.pending_count(),
            active_calls: self.calls.established_count(),
        }
    }

    /// Drain everything queued by previous operations.
    pub fn take_deliveries(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.outbox)
    }

    /// Dispatch one client event and return the resulting deliveries.
    pub fn handle(&mut self, connection_id: ConnectionId, event: ClientEvent) -> Vec<Delivery> {
        tracing::trace!(connection = %connection_id, event = event.name(), "Client event");

        match event {
            ClientEvent::JoinLobby(join) => {
                let valid = validate_request(&join)
                    .and_then(|()| validate_display_name(&join.user_name));
                match valid {
                    Ok(()) => self.join(connection_id, join.user_id.into(), join.user_name),
                    Err(e) => {
                        self.refuse(connection_id, SignalingError::InvalidPayload(e.to_string()))
                    }
                }
            }
            ClientEvent::LeaveLobby => self.leave(connection_id),
            ClientEvent::RequestUsersUpdate => self.send_roster(connection_id),
            ClientEvent::RequestCall(req) => {
                self.request_call(connection_id, req.to_user_id, req.call_id);
            }
            ClientEvent::AcceptCall(accept) => {
                self.accept_call(connection_id, accept.call_id, &accept.from_user_id)
            }
            ClientEvent::RejectCall(reject) => self.reject_call(connection_id, reject.call_id),
            ClientEvent::EndCall(end) => self.end_call(connection_id, end.call_id),
            ClientEvent::WebrtcSignal(signal) => self.relay_signal(
                connection_id,
                &signal.to_user_id,
                signal.call_id,
                signal.signal,
            ),
        }

        self.take_deliveries()
    }

    // === Presence ===

    /// Register presence, welcome the connection, and rebroadcast the roster.
    pub fn join(&mut self, connection_id: ConnectionId, user_id: UserId, display_name: String) {
        // A re-join resets status to online, so settle any call this connection was in.
        if self.registry.get(connection_id).is_some() {
            self.settle_calls_for(connection_id);
        }

        let record = self.registry.join(connection_id, user_id, display_name);
        tracing::info!(
            connection = %connection_id,
            user = %record.user_id,
            name = %record.display_name,
            "User joined lobby"
        );
        let message = format!("Welcome to the lobby, {}!", record.display_name);

        self.broadcast_roster();
        self.push(
            Target::Connection(connection_id),
            ServerEvent::LobbyWelcome(LobbyWelcome {
                message,
                users: self.registry.roster(),
                ice_servers: self.policy.ice_servers.clone(),
                ring_timeout_secs: Some(self.policy.ring_timeout_secs),
            }),
        );
    }

    /// Explicit `leave-lobby`: like a disconnect, but the socket stays open.
    pub fn leave(&mut self, connection_id: ConnectionId) {
        self.release(connection_id, "left the lobby");
    }

    /// Transport closed.
    pub fn disconnect(&mut self, connection_id: ConnectionId) {
        self.release(connection_id, "disconnected");
    }

    pub fn send_roster(&mut self, connection_id: ConnectionId) {
        self.push(
            Target::Connection(connection_id),
            ServerEvent::UsersUpdate(self.registry.roster()),
        );
    }

    fn release(&mut self, connection_id: ConnectionId, reason: &str) {
        if self.registry.get(connection_id).is_none() {
            tracing::debug!(connection = %connection_id, "Release for unjoined connection ignored");
            return;
        }

        self.settle_calls_for(connection_id);

        if let Some(record) = self.registry.leave(connection_id) {
            tracing::info!(
                connection = %connection_id,
                user = %record.user_id,
                online = self.registry.len(),
                "User {reason}"
            );
            self.broadcast_roster();
        }
    }

    /// Close every session a departing connection takes part in and tell the survivors.
    fn settle_calls_for(&mut self, connection_id: ConnectionId) {
        let Some(departing) = self.registry.get(connection_id).cloned() else {
            return;
        };

        for call_id in self.calls.call_ids_for(connection_id) {
            let Some(session) = self.calls.get(&call_id) else {
                continue;
            };

            if session.is_pending() {
                let Some(session) = self.calls.close(&call_id, CallPhase::Ended) else {
                    continue;
                };
                if session.caller_connection == connection_id {
                    // Caller gone: stop the callee's ringing. Callee status never changed.
                    self.push(
                        Target::Connection(session.callee_connection),
                        ServerEvent::CallEnded(CallEnded {
                            call_id: session.call_id.clone(),
                            message: format!("{} hung up", departing.display_name),
                        }),
                    );
                } else {
                    self.push(
                        Target::Connection(session.caller_connection),
                        ServerEvent::CallRejected(CallRejected {
                            call_id: session.call_id.clone(),
                            message: SignalingError::TargetUnavailable.to_string(),
                        }),
                    );
                    self.registry
                        .set_status(session.caller_connection, PresenceStatus::Online);
                }
                tracing::info!(call = %session.call_id, "Pending call settled by departure");
                continue;
            }

            let Some(session) = self.calls.close(&call_id, CallPhase::Ended) else {
                continue;
            };
            let Some((survivor, _)) = session.peer_of(connection_id) else {
                continue;
            };

            if self.policy.notify_peer_on_disconnect {
                self.push(
                    Target::Connection(survivor),
                    ServerEvent::PeerDisconnected(PeerDisconnected {
                        call_id: session.call_id.clone(),
                        user_id: departing.user_id.clone(),
                        message: format!("{} disconnected", departing.display_name),
                    }),
                );
                self.registry.set_status(survivor, PresenceStatus::Online);
                tracing::info!(
                    call = %session.call_id,
                    survivor = %survivor,
                    "Active call ended by departure; peer notified"
                );
            } else {
                tracing::warn!(
                    call = %session.call_id,
                    survivor = %survivor,
                    "Active call participant departed; survivor left in-call"
                );
            }
        }
    }

    // === Call lifecycle ===

    /// Ring `to_user_id` on behalf of the connection's registered user.
    pub fn request_call(
        &mut self,
        connection_id: ConnectionId,
        to_user_id: UserId,
        call_id: Option<CallId>,
    ) -> RequestOutcome {
        let Some(caller) = self.registry.get(connection_id).cloned() else {
            return self.refuse_request(connection_id, SignalingError::NotJoined);
        };

        if caller.user_id == to_user_id {
            return self.refuse_request(connection_id, SignalingError::SelfCall);
        }
        if !caller.is_available() {
            return self.refuse_request(connection_id, SignalingError::AlreadyInCall);
        }

        let Some(callee) = self
            .registry
            .find_connection_by_user(&to_user_id)
            .and_then(|c| self.registry.get(c))
            .cloned()
        else {
            tracing::info!(
                caller = %caller.user_id,
                target = %to_user_id,
                "Call target unreachable"
            );
            self.refuse(connection_id, SignalingError::TargetUnavailable);
            return RequestOutcome::TargetUnreachable;
        };

        if !callee.is_available() {
            return self.refuse_request(connection_id, SignalingError::TargetBusy);
        }

        let call_id = match call_id {
            Some(id) if !id.is_empty() => id,
            _ => CallId::generate(),
        };
        if self.calls.is_known(&call_id) {
            return self.refuse_request(connection_id, SignalingError::DuplicateCallId);
        }

        self.calls.open(CallSession::new(
            call_id.clone(),
            caller.user_id.clone(),
            connection_id,
            callee.user_id.clone(),
            callee.connection_id,
        ));
        self.registry.set_status(connection_id, PresenceStatus::Busy);

        tracing::info!(
            call = %call_id,
            caller = %caller.user_id,
            callee = %callee.user_id,
            "Call requested"
        );

        self.push(
            Target::Connection(callee.connection_id),
            ServerEvent::IncomingCall(IncomingCall {
                from_user_id: caller.user_id.clone(),
                from_user_name: caller.display_name.clone(),
                call_id: call_id.clone(),
                timestamp: Utc::now(),
            }),
        );
        self.push(
            Target::Connection(connection_id),
            ServerEvent::CallRequestSent(CallRequestSent {
                to_user_id,
                call_id: call_id.clone(),
                message: "Call request sent!".into(),
            }),
        );
        self.broadcast_roster();

        RequestOutcome::Delivered(call_id)
    }

    /// Callee accepts: both sides go in-call and receive `call-started`.
    pub fn accept_call(
        &mut self,
        connection_id: ConnectionId,
        call_id: CallId,
        claimed_caller: &UserId,
    ) {
        let Some(session) = self.calls.get(&call_id) else {
            tracing::debug!(call = %call_id, connection = %connection_id, "Accept for unknown call");
            return self.refuse(connection_id, SignalingError::StaleCall);
        };
        if !session.is_pending() || session.callee_connection != connection_id {
            tracing::debug!(
                call = %call_id,
                connection = %connection_id,
                phase = ?session.phase,
                "Accept from wrong party or phase"
            );
            return self.refuse(connection_id, SignalingError::StaleCall);
        }
        if &session.caller != claimed_caller {
            tracing::warn!(
                call = %call_id,
                claimed = %claimed_caller,
                actual = %session.caller,
                "Accept names a different caller; using the session's"
            );
        }

        let caller_connection = session.caller_connection;
        if self.registry.status(connection_id) == Some(PresenceStatus::InCall) {
            tracing::debug!(call = %call_id, connection = %connection_id, "Accept while in a call");
            return self.refuse(connection_id, SignalingError::AlreadyInCall);
        }
        let Some(caller) = self.registry.get(caller_connection).cloned() else {
            self.calls.close(&call_id, CallPhase::Ended);
            self.registry.set_status(connection_id, PresenceStatus::Online);
            return self.refuse(connection_id, SignalingError::StaleCall);
        };

        if let Some(session) = self.calls.get_mut(&call_id) {
            session.phase = CallPhase::Active;
            session.accepted_at = Some(Utc::now());
        }
        self.registry.set_status(caller_connection, PresenceStatus::InCall);
        self.registry.set_status(connection_id, PresenceStatus::InCall);

        let users: Vec<_> = [caller_connection, connection_id]
            .into_iter()
            .filter_map(|c| self.registry.get(c).map(PresenceRecord::roster_entry))
            .collect();
        let started = ServerEvent::CallStarted(CallStarted {
            call_id: call_id.clone(),
            room_id: call_id.room_id(),
            users,
        });
        self.push(Target::Connection(caller_connection), started.clone());
        self.push(Target::Connection(connection_id), started);

        tracing::info!(
            call = %call_id,
            room = %call_id.room_id(),
            caller = %caller.user_id,
            "Call started"
        );

        for participant in [caller_connection, connection_id] {
            self.settle_competing(participant);
        }

        self.broadcast_roster();
    }

    /// A connection that just went in-call drops every other pending request it is part of.
    ///
    /// First accepted request wins: callers still ringing it get `call-rejected`, and
    /// requests it placed itself are cancelled with `call-ended` to their callees.
    fn settle_competing(&mut self, connection_id: ConnectionId) {
        let name = self
            .registry
            .get(connection_id)
            .map(|r| r.display_name.clone())
            .unwrap_or_default();

        for other in self.calls.pending_for_callee(connection_id) {
            if let Some(rejected) = self.calls.close(&other, CallPhase::Rejected) {
                self.push(
                    Target::Connection(rejected.caller_connection),
                    ServerEvent::CallRejected(CallRejected {
                        call_id: rejected.call_id.clone(),
                        message: "User accepted another call".into(),
                    }),
                );
                self.registry
                    .set_status(rejected.caller_connection, PresenceStatus::Online);
                tracing::info!(call = %rejected.call_id, "Competing call request rejected");
            }
        }

        for own in self.calls.pending_for_caller(connection_id) {
            if let Some(cancelled) = self.calls.close(&own, CallPhase::Ended) {
                self.push(
                    Target::Connection(cancelled.callee_connection),
                    ServerEvent::CallEnded(CallEnded {
                        call_id: cancelled.call_id.clone(),
                        message: format!("{name} hung up"),
                    }),
                );
                tracing::info!(call = %cancelled.call_id, "Outgoing request cancelled by accept");
            }
        }
    }

    /// Callee declines a pending request: both sides back to online.
    pub fn reject_call(&mut self, connection_id: ConnectionId, call_id: CallId) {
        let valid = self
            .calls
            .get(&call_id)
            .is_some_and(|s| s.is_pending() && s.callee_connection == connection_id);
        if !valid {
            tracing::debug!(call = %call_id, connection = %connection_id, "Reject for stale call");
            return self.refuse(connection_id, SignalingError::StaleCall);
        }

        let Some(session) = self.calls.close(&call_id, CallPhase::Rejected) else {
            return;
        };

        self.push(
            Target::Connection(session.caller_connection),
            ServerEvent::CallRejected(CallRejected {
                call_id: call_id.clone(),
                message: "Call was rejected".into(),
            }),
        );
        self.registry
            .set_status(session.caller_connection, PresenceStatus::Online);
        self.registry.set_status(connection_id, PresenceStatus::Online);

        tracing::info!(call = %call_id, callee = %session.callee, "Call rejected");
        self.broadcast_roster();
    }

    /// Either side hangs up (or the caller cancels a pending request).
    ///
    /// Idempotent: ending an unknown or already-ended call changes nothing beyond
    /// reconciling a sender whose status was left behind.
    pub fn end_call(&mut self, connection_id: ConnectionId, call_id: CallId) {
        let involved = self.calls.get(&call_id).map(|s| s.involves(connection_id));

        match involved {
            Some(true) => {
                let Some(session) = self.calls.close(&call_id, CallPhase::Ended) else {
                    return;
                };
                for participant in session.connections() {
                    if self.registry.get(participant).is_some() {
                        self.push(
                            Target::Connection(participant),
                            ServerEvent::CallEnded(CallEnded {
                                call_id: call_id.clone(),
                                message: "Call ended".into(),
                            }),
                        );
                        self.registry.set_status(participant, PresenceStatus::Online);
                    }
                }
                tracing::info!(
                    call = %call_id,
                    room = %session.room_id(),
                    ended_by = %connection_id,
                    "Call ended"
                );
                self.broadcast_roster();
            }
            Some(false) => {
                tracing::warn!(call = %call_id, connection = %connection_id, "End from non-participant ignored");
            }
            None => {
                let stuck = self
                    .registry
                    .status(connection_id)
                    .is_some_and(|s| s != PresenceStatus::Online)
                    && !self.calls.has_live_session(connection_id);
                if stuck {
                    self.registry.set_status(connection_id, PresenceStatus::Online);
                    tracing::debug!(call = %call_id, connection = %connection_id, "Status reconciled on end");
                    self.broadcast_roster();
                } else {
                    tracing::debug!(call = %call_id, connection = %connection_id, "Duplicate end ignored");
                }
            }
        }
    }

    /// Forward an opaque WebRTC payload. Undeliverable signals are dropped.
    pub fn relay_signal(
        &mut self,
        connection_id: ConnectionId,
        to_user_id: &UserId,
        call_id: CallId,
        signal: SignalPayload,
    ) {
        let Some(sender) = self.registry.get(connection_id) else {
            tracing::debug!(connection = %connection_id, "Signal from unjoined connection dropped");
            return;
        };
        let from_user_id = sender.user_id.clone();

        // Inside a live session the session decides the target; that pins the right tab.
        let target = match self.calls.get(&call_id) {
            Some(session) if session.involves(connection_id) => {
                session.peer_of(connection_id).map(|(c, _)| c)
            }
            _ => self.registry.find_connection_by_user(to_user_id),
        }
        .filter(|c| self.registry.get(*c).is_some());

        let Some(target) = target else {
            tracing::debug!(
                call = %call_id,
                from = %from_user_id,
                to = %to_user_id,
                kind = ?signal.kind(),
                "Signal target unreachable; dropped"
            );
            return;
        };

        tracing::trace!(call = %call_id, from = %from_user_id, kind = ?signal.kind(), "Relaying signal");
        self.push(
            Target::Connection(target),
            ServerEvent::WebrtcSignal(InboundSignal {
                from_user_id,
                signal,
                call_id,
            }),
        );
    }

    // === Helpers ===

    fn push(&mut self, target: Target, event: ServerEvent) {
        self.outbox.push(Delivery { target, event });
    }

    fn broadcast_roster(&mut self) {
        let roster = self.registry.roster();
        self.push(Target::Broadcast, ServerEvent::UsersUpdate(roster));
    }

    fn refuse(&mut self, connection_id: ConnectionId, error: SignalingError) {
        tracing::debug!(
            connection = %connection_id,
            code = error.error_code(),
            "Request refused: {error}"
        );
        self.push(Target::Connection(connection_id), error.to_event());
    }

    fn refuse_request(
        &mut self,
        connection_id: ConnectionId,
        error: SignalingError,
    ) -> RequestOutcome {
        self.refuse(connection_id, error.clone());
        RequestOutcome::Refused(error)
    }
}
