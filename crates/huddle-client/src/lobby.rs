//! Client-side call state machine.
//!
//! ```text
//!          call()                     call-started
//!   Idle ──────────▶ Requesting ───────────────────────┐
//!    │                                                 ▼
//!    │ incoming-call            accept()             InCall ──end / call-ended /
//!    └──────────────▶ Ringing ─────────▶ InCall ──▶ (confirmed)   peer-disconnected──▶ Idle
//!                        │             (unconfirmed)
//!                        └──reject() / ring timeout / call-ended──▶ Idle
//! ```
//!
//! The machine is synchronous. Every input returns the [`LobbyAction`]s the session
//! driver must perform: frames to send, UI changes, negotiation start/stop.

use crate::error::{ClientError, Result};
use crate::negotiation::CallRole;
use huddle_common::ice::IceServerConfig;
use huddle_common::ids::{CallId, UserId};
use huddle_common::protocol::{
    AcceptCall, CallStarted, ClientEvent, EndCall, JoinLobby, RejectCall, RequestCall,
    RosterEntry, ServerEvent,
};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(30);

/// Who this client is, as given by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Our request is out; waiting for the callee.
    Requesting {
        call_id: CallId,
        remote_user_id: UserId,
        remote_name: String,
    },
    /// Someone is calling us.
    Ringing {
        call_id: CallId,
        remote_user_id: UserId,
        remote_name: String,
    },
    InCall {
        call_id: CallId,
        remote_user_id: UserId,
        remote_name: String,
        role: CallRole,
        /// Set once `call-started` arrives.
        started_at: Option<Instant>,
    },
}

impl CallState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting { .. } => "requesting",
            Self::Ringing { .. } => "ringing",
            Self::InCall { .. } => "in a call",
        }
    }

    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::Idle => None,
            Self::Requesting { call_id, .. }
            | Self::Ringing { call_id, .. }
            | Self::InCall { call_id, .. } => Some(call_id),
        }
    }

    pub fn remote_user_id(&self) -> Option<&UserId> {
        match self {
            Self::Idle => None,
            Self::Requesting { remote_user_id, .. }
            | Self::Ringing { remote_user_id, .. }
            | Self::InCall { remote_user_id, .. } => Some(remote_user_id),
        }
    }
}

/// Something the session driver has to do.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyAction {
    Send(ClientEvent),
    /// The visible roster changed; read it with [`LobbyMachine::roster`].
    RosterChanged,
    /// Relay list to use for peer connections.
    IceServers(Vec<IceServerConfig>),
    ShowIncomingCall {
        call_id: CallId,
        from_user_id: UserId,
        from_user_name: String,
    },
    HideIncomingCall,
    /// Auto-reject `call_id` if it is still ringing after `after`.
    ArmRingTimer { call_id: CallId, after: Duration },
    /// Enable or disable the in-call controls (hang up, mute, hide video).
    CallControls(bool),
    StartNegotiation {
        call_id: CallId,
        remote_user_id: UserId,
        role: CallRole,
    },
    StopNegotiation,
    Notify(String),
}

pub struct LobbyMachine {
    identity: Identity,
    state: CallState,
    roster: Vec<RosterEntry>,
    ring_timeout: Duration,
}

impl LobbyMachine {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            state: CallState::Idle,
            roster: Vec::new(),
            ring_timeout: DEFAULT_RING_TIMEOUT,
        }
    }

    pub fn with_ring_timeout(mut self, ring_timeout: Duration) -> Self {
        self.ring_timeout = ring_timeout;
        self
    }

    /// How long the next incoming call rings before it is declined.
    pub fn ring_after(&self) -> Duration {
        self.ring_timeout
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    /// Everyone else in the lobby.
    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    /// Whether the call button for `user_id` should be enabled.
    pub fn can_call(&self, user_id: &UserId) -> bool {
        self.state == CallState::Idle
            && self
                .roster
                .iter()
                .any(|e| &e.user_id == user_id && e.is_available)
    }

    /// Time since `call-started`.
    pub fn call_duration(&self) -> Option<Duration> {
        match &self.state {
            CallState::InCall {
                started_at: Some(at),
                ..
            } => Some(at.elapsed()),
            _ => None,
        }
    }

    // === Local actions ===

    pub fn join(&self) -> Vec<LobbyAction> {
        vec![LobbyAction::Send(ClientEvent::JoinLobby(JoinLobby {
            user_id: self.identity.user_id.to_string(),
            user_name: self.identity.display_name.clone(),
        }))]
    }

    /// Leave the lobby, hanging up first if needed.
    pub fn leave(&mut self) -> Vec<LobbyAction> {
        let mut actions = self.end();
        self.roster.clear();
        actions.push(LobbyAction::RosterChanged);
        actions.push(LobbyAction::Send(ClientEvent::LeaveLobby));
        actions
    }

    pub fn refresh_roster(&self) -> Vec<LobbyAction> {
        vec![LobbyAction::Send(ClientEvent::RequestUsersUpdate)]
    }

    /// Ring `user_id`. Only allowed from idle.
    pub fn call(&mut self, user_id: &UserId) -> Result<Vec<LobbyAction>> {
        self.require_idle("start a call")?;
        let Some(entry) = self
            .roster
            .iter()
            .find(|e| &e.user_id == user_id && e.is_available)
        else {
            return Err(ClientError::UserUnavailable(user_id.to_string()));
        };

        let call_id = CallId::generate();
        let remote_name = entry.user_name.clone();
        tracing::info!(call = %call_id, to = %user_id, "Calling");

        self.state = CallState::Requesting {
            call_id: call_id.clone(),
            remote_user_id: user_id.clone(),
            remote_name: remote_name.clone(),
        };
        Ok(vec![
            LobbyAction::Send(ClientEvent::RequestCall(RequestCall {
                to_user_id: user_id.clone(),
                from_user_id: Some(self.identity.user_id.clone()),
                from_user_name: Some(self.identity.display_name.clone()),
                call_id: Some(call_id),
            })),
            LobbyAction::Notify(format!("Calling {remote_name}...")),
        ])
    }

    pub fn accept(&mut self) -> Result<Vec<LobbyAction>> {
        let CallState::Ringing {
            call_id,
            remote_user_id,
            remote_name,
        } = &self.state
        else {
            return Err(self.invalid("accept a call"));
        };

        let send = LobbyAction::Send(ClientEvent::AcceptCall(AcceptCall {
            call_id: call_id.clone(),
            from_user_id: remote_user_id.clone(),
            to_user_id: self.identity.user_id.clone(),
        }));
        self.state = CallState::InCall {
            call_id: call_id.clone(),
            remote_user_id: remote_user_id.clone(),
            remote_name: remote_name.clone(),
            role: CallRole::Callee,
            started_at: None,
        };
        Ok(vec![LobbyAction::HideIncomingCall, send])
    }

    pub fn reject(&mut self) -> Result<Vec<LobbyAction>> {
        let CallState::Ringing {
            call_id,
            remote_user_id,
            ..
        } = &self.state
        else {
            return Err(self.invalid("reject a call"));
        };

        let send = reject_event(call_id, remote_user_id);
        self.state = CallState::Idle;
        Ok(vec![LobbyAction::HideIncomingCall, send])
    }

    /// The ring timer for `call_id` fired.
    pub fn ring_timeout(&mut self, call_id: &CallId) -> Vec<LobbyAction> {
        match &self.state {
            CallState::Ringing {
                call_id: ringing,
                remote_name,
                ..
            } if ringing == call_id => {
                let notice = LobbyAction::Notify(format!("Missed call from {remote_name}"));
                tracing::info!(call = %call_id, "Incoming call timed out");
                let mut actions = self.reject().unwrap_or_default();
                actions.push(notice);
                actions
            }
            _ => Vec::new(),
        }
    }

    /// Hang up, cancel our request, or decline a ringing call.
    pub fn end(&mut self) -> Vec<LobbyAction> {
        match &self.state {
            CallState::Idle => Vec::new(),
            CallState::Ringing { .. } => self.reject().unwrap_or_default(),
            CallState::Requesting { call_id, .. } | CallState::InCall { call_id, .. } => {
                let send = LobbyAction::Send(ClientEvent::EndCall(EndCall {
                    call_id: call_id.clone(),
                }));
                let mut actions = vec![send];
                actions.extend(self.reset());
                actions
            }
        }
    }

    // === Server events ===

    pub fn handle_server_event(&mut self, event: &ServerEvent) -> Vec<LobbyAction> {
        match event {
            ServerEvent::LobbyWelcome(welcome) => {
                if let Some(secs) = welcome.ring_timeout_secs.filter(|s| *s > 0) {
                    self.ring_timeout = Duration::from_secs(secs);
                }
                let mut actions = vec![LobbyAction::Notify(welcome.message.clone())];
                if !welcome.ice_servers.is_empty() {
                    actions.push(LobbyAction::IceServers(welcome.ice_servers.clone()));
                }
                self.replace_roster(&welcome.users);
                actions.push(LobbyAction::RosterChanged);
                actions
            }

            ServerEvent::UsersUpdate(users) => {
                self.replace_roster(users);
                vec![LobbyAction::RosterChanged]
            }

            ServerEvent::IncomingCall(incoming) => {
                if self.state != CallState::Idle {
                    // First come, first served: we are already busy with another call.
                    tracing::info!(
                        call = %incoming.call_id,
                        from = %incoming.from_user_id,
                        state = self.state.name(),
                        "Second incoming call auto-rejected"
                    );
                    return vec![
                        reject_event(&incoming.call_id, &incoming.from_user_id),
                        LobbyAction::Notify(format!(
                            "Missed call from {} while busy",
                            incoming.from_user_name
                        )),
                    ];
                }

                self.state = CallState::Ringing {
                    call_id: incoming.call_id.clone(),
                    remote_user_id: incoming.from_user_id.clone(),
                    remote_name: incoming.from_user_name.clone(),
                };
                vec![
                    LobbyAction::ShowIncomingCall {
                        call_id: incoming.call_id.clone(),
                        from_user_id: incoming.from_user_id.clone(),
                        from_user_name: incoming.from_user_name.clone(),
                    },
                    LobbyAction::ArmRingTimer {
                        call_id: incoming.call_id.clone(),
                        after: self.ring_timeout,
                    },
                ]
            }

            ServerEvent::CallRequestSent(sent) if self.holds(&sent.call_id) => {
                vec![LobbyAction::Notify(sent.message.clone())]
            }

            ServerEvent::CallStarted(started) => self.on_call_started(started),

            ServerEvent::CallRejected(rejected) if self.holds(&rejected.call_id) => {
                let mut actions = self.reset();
                actions.push(LobbyAction::Notify(rejected.message.clone()));
                actions
            }

            ServerEvent::CallEnded(ended) if self.holds(&ended.call_id) => {
                let mut actions = self.reset();
                actions.push(LobbyAction::Notify(ended.message.clone()));
                actions
            }

            ServerEvent::PeerDisconnected(gone) if self.holds(&gone.call_id) => {
                let mut actions = self.reset();
                actions.push(LobbyAction::Notify(gone.message.clone()));
                actions
            }

            ServerEvent::CallError(err) => {
                let awaiting_server = matches!(
                    self.state,
                    CallState::Requesting { .. }
                        | CallState::InCall {
                            started_at: None,
                            ..
                        }
                );
                let mut actions = if awaiting_server { self.reset() } else { Vec::new() };
                actions.push(LobbyAction::Notify(err.message.clone()));
                actions
            }

            other => {
                tracing::trace!(event = other.name(), "Event not relevant to call state");
                Vec::new()
            }
        }
    }

    fn on_call_started(&mut self, started: &CallStarted) -> Vec<LobbyAction> {
        let (remote_user_id, remote_name, role) = match &self.state {
            CallState::Requesting {
                call_id,
                remote_user_id,
                remote_name,
            } if call_id == &started.call_id => {
                (remote_user_id.clone(), remote_name.clone(), CallRole::Caller)
            }
            CallState::InCall {
                call_id,
                remote_user_id,
                remote_name,
                role,
                started_at: None,
            } if call_id == &started.call_id => {
                (remote_user_id.clone(), remote_name.clone(), *role)
            }
            _ => {
                tracing::debug!(call = %started.call_id, state = self.state.name(), "Unexpected call-started ignored");
                return Vec::new();
            }
        };

        // The server's view of the other participant wins.
        let remote = started
            .users
            .iter()
            .find(|u| u.user_id != self.identity.user_id);
        let remote_name = remote.map_or(remote_name, |u| u.user_name.clone());

        tracing::info!(call = %started.call_id, room = %started.room_id, ?role, "Call started");
        self.state = CallState::InCall {
            call_id: started.call_id.clone(),
            remote_user_id: remote_user_id.clone(),
            remote_name: remote_name.clone(),
            role,
            started_at: Some(Instant::now()),
        };

        vec![
            LobbyAction::CallControls(true),
            LobbyAction::StartNegotiation {
                call_id: started.call_id.clone(),
                remote_user_id,
                role,
            },
            LobbyAction::Notify(format!("In call with {remote_name}")),
        ]
    }

    fn holds(&self, call_id: &CallId) -> bool {
        self.state.call_id() == Some(call_id)
    }

    /// Back to idle, undoing whatever the current state switched on.
    fn reset(&mut self) -> Vec<LobbyAction> {
        let previous = std::mem::replace(&mut self.state, CallState::Idle);
        match previous {
            CallState::Idle => Vec::new(),
            CallState::Requesting { .. } => Vec::new(),
            CallState::Ringing { .. } => vec![LobbyAction::HideIncomingCall],
            CallState::InCall { started_at, .. } => {
                let mut actions = vec![LobbyAction::StopNegotiation];
                if started_at.is_some() {
                    actions.push(LobbyAction::CallControls(false));
                }
                actions
            }
        }
    }

    fn replace_roster(&mut self, users: &[RosterEntry]) {
        self.roster = users
            .iter()
            .filter(|u| u.user_id != self.identity.user_id)
            .cloned()
            .collect();
    }

    fn require_idle(&self, action: &'static str) -> Result<()> {
        if self.state == CallState::Idle {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> ClientError {
        ClientError::InvalidState {
            action,
            state: self.state.name(),
        }
    }
}

fn reject_event(call_id: &CallId, caller: &UserId) -> LobbyAction {
    LobbyAction::Send(ClientEvent::RejectCall(RejectCall {
        call_id: call_id.clone(),
        from_user_id: caller.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use huddle_common::protocol::{
        CallEnded, CallError, CallRejected, IncomingCall, LobbyWelcome, PeerDisconnected,
        PresenceStatus,
    };

    fn entry(uid: &str, name: &str, status: PresenceStatus) -> RosterEntry {
        RosterEntry {
            user_id: uid.into(),
            user_name: name.into(),
            status,
            is_available: status.is_available(),
        }
    }

    fn alice() -> LobbyMachine {
        let mut machine = LobbyMachine::new(Identity::new("1", "Alice"));
        machine.handle_server_event(&ServerEvent::LobbyWelcome(LobbyWelcome {
            message: "Welcome to the lobby, Alice!".into(),
            users: vec![
                entry("1", "Alice", PresenceStatus::Online),
                entry("2", "Bob", PresenceStatus::Online),
                entry("3", "Carol", PresenceStatus::InCall),
            ],
            ice_servers: Vec::new(),
            ring_timeout_secs: None,
        }));
        machine
    }

    fn incoming(call: &str, from: &str, name: &str) -> ServerEvent {
        ServerEvent::IncomingCall(IncomingCall {
            from_user_id: from.into(),
            from_user_name: name.into(),
            call_id: call.into(),
            timestamp: Utc::now(),
        })
    }

    fn started(call: &str) -> ServerEvent {
        ServerEvent::CallStarted(CallStarted {
            call_id: call.into(),
            room_id: format!("call-{call}"),
            users: vec![
                entry("1", "Alice", PresenceStatus::InCall),
                entry("2", "Bob", PresenceStatus::InCall),
            ],
        })
    }

    fn sent_call_id(actions: &[LobbyAction]) -> CallId {
        actions
            .iter()
            .find_map(|a| match a {
                LobbyAction::Send(ClientEvent::RequestCall(req)) => req.call_id.clone(),
                _ => None,
            })
            .expect("request-call sent")
    }

    #[test]
    fn roster_excludes_self_and_gates_calls() {
        let machine = alice();
        let ids: Vec<&str> = machine.roster().iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(ids, ["2", "3"]);
        assert!(machine.can_call(&"2".into()));
        assert!(!machine.can_call(&"3".into()), "in-call users are not callable");
        assert!(!machine.can_call(&"1".into()));
    }

    #[test]
    fn caller_path_reaches_in_call_and_negotiates_as_caller() {
        let mut machine = alice();
        let actions = machine.call(&"2".into()).unwrap();
        let call_id = sent_call_id(&actions);
        assert_eq!(machine.state().name(), "requesting");

        let actions = machine.handle_server_event(&started(call_id.as_str()));
        assert!(actions.contains(&LobbyAction::CallControls(true)));
        assert!(actions.contains(&LobbyAction::StartNegotiation {
            call_id: call_id.clone(),
            remote_user_id: "2".into(),
            role: CallRole::Caller,
        }));
        assert!(machine.call_duration().is_some());
    }

    #[test]
    fn calling_twice_is_an_invalid_state() {
        let mut machine = alice();
        machine.call(&"2".into()).unwrap();
        let err = machine.call(&"2".into()).unwrap_err();
        assert!(matches!(err, ClientError::InvalidState { state: "requesting", .. }));
        assert!(matches!(
            machine.accept().unwrap_err(),
            ClientError::InvalidState { .. }
        ));
    }

    #[test]
    fn unavailable_users_cannot_be_called() {
        let mut machine = alice();
        assert!(matches!(
            machine.call(&"3".into()),
            Err(ClientError::UserUnavailable(_))
        ));
        assert!(matches!(
            machine.call(&"99".into()),
            Err(ClientError::UserUnavailable(_))
        ));
        assert_eq!(machine.state(), &CallState::Idle);
    }

    #[test]
    fn callee_path_accepts_then_negotiates_as_callee() {
        let mut machine = alice();
        let actions = machine.handle_server_event(&incoming("c1", "2", "Bob"));
        assert!(actions.contains(&LobbyAction::ArmRingTimer {
            call_id: "c1".into(),
            after: DEFAULT_RING_TIMEOUT,
        }));

        let actions = machine.accept().unwrap();
        assert_eq!(actions[0], LobbyAction::HideIncomingCall);
        let LobbyAction::Send(ClientEvent::AcceptCall(accept)) = &actions[1] else {
            panic!("accept-call sent");
        };
        assert_eq!(accept.from_user_id, UserId::from("2"));
        assert_eq!(accept.to_user_id, UserId::from("1"));
        assert!(machine.call_duration().is_none(), "not confirmed yet");

        let actions = machine.handle_server_event(&started("c1"));
        assert!(actions.contains(&LobbyAction::StartNegotiation {
            call_id: "c1".into(),
            remote_user_id: "2".into(),
            role: CallRole::Callee,
        }));
    }

    #[test]
    fn welcome_sets_the_ring_timeout() {
        let mut machine = LobbyMachine::new(Identity::new("1", "Alice"));
        machine.handle_server_event(&ServerEvent::LobbyWelcome(LobbyWelcome {
            message: "Welcome to the lobby, Alice!".into(),
            users: vec![entry("2", "Bob", PresenceStatus::Online)],
            ice_servers: Vec::new(),
            ring_timeout_secs: Some(5),
        }));
        assert_eq!(machine.ring_after(), Duration::from_secs(5));

        let actions = machine.handle_server_event(&incoming("c1", "2", "Bob"));
        assert!(actions.contains(&LobbyAction::ArmRingTimer {
            call_id: "c1".into(),
            after: Duration::from_secs(5),
        }));

        // Zero or missing keeps the current value.
        machine.handle_server_event(&ServerEvent::LobbyWelcome(LobbyWelcome {
            message: "Welcome back".into(),
            users: Vec::new(),
            ice_servers: Vec::new(),
            ring_timeout_secs: Some(0),
        }));
        assert_eq!(machine.ring_after(), Duration::from_secs(5));
    }

    #[test]
    fn ring_timeout_rejects_only_the_ringing_call() {
        let mut machine = alice();
        machine.handle_server_event(&incoming("c1", "2", "Bob"));

        assert!(machine.ring_timeout(&"c0".into()).is_empty());
        let actions = machine.ring_timeout(&"c1".into());
        assert!(matches!(
            &actions[1],
            LobbyAction::Send(ClientEvent::RejectCall(r)) if r.call_id == CallId::from("c1")
        ));
        assert_eq!(machine.state(), &CallState::Idle);

        // Timer for an already-accepted call does nothing.
        machine.handle_server_event(&incoming("c2", "2", "Bob"));
        machine.accept().unwrap();
        assert!(machine.ring_timeout(&"c2".into()).is_empty());
    }

    #[test]
    fn second_incoming_call_is_rejected_while_ringing() {
        let mut machine = alice();
        machine.handle_server_event(&incoming("c1", "2", "Bob"));
        let actions = machine.handle_server_event(&incoming("c2", "3", "Carol"));

        let LobbyAction::Send(ClientEvent::RejectCall(reject)) = &actions[0] else {
            panic!("second call rejected");
        };
        assert_eq!(reject.call_id, CallId::from("c2"));
        assert_eq!(reject.from_user_id, UserId::from("3"));
        assert_eq!(machine.state().call_id(), Some(&CallId::from("c1")));
    }

    #[test]
    fn teardown_events_reset_to_idle() {
        let teardowns = [
            ServerEvent::CallEnded(CallEnded {
                call_id: "c1".into(),
                message: "Call ended".into(),
            }),
            ServerEvent::PeerDisconnected(PeerDisconnected {
                call_id: "c1".into(),
                user_id: "2".into(),
                message: "Bob disconnected".into(),
            }),
        ];

        for teardown in teardowns {
            let mut machine = alice();
            machine.handle_server_event(&incoming("c1", "2", "Bob"));
            machine.accept().unwrap();
            machine.handle_server_event(&started("c1"));

            let actions = machine.handle_server_event(&teardown);
            assert!(actions.contains(&LobbyAction::StopNegotiation));
            assert!(actions.contains(&LobbyAction::CallControls(false)));
            assert_eq!(machine.state(), &CallState::Idle);
            assert!(machine.call_duration().is_none());
        }
    }

    #[test]
    fn events_for_other_calls_are_ignored() {
        let mut machine = alice();
        let call_id = sent_call_id(&machine.call(&"2".into()).unwrap());

        let stale = ServerEvent::CallRejected(CallRejected {
            call_id: "old".into(),
            message: "Call was rejected".into(),
        });
        assert!(machine.handle_server_event(&stale).is_empty());
        assert!(machine.handle_server_event(&started("old")).is_empty());
        assert_eq!(machine.state().call_id(), Some(&call_id));
    }

    #[test]
    fn call_error_resets_a_pending_request_but_not_a_live_call() {
        let error = ServerEvent::CallError(CallError {
            message: "User is not available".into(),
            code: 4004,
        });

        let mut machine = alice();
        machine.call(&"2".into()).unwrap();
        let actions = machine.handle_server_event(&error);
        assert_eq!(machine.state(), &CallState::Idle);
        assert_eq!(
            actions,
            [LobbyAction::Notify("User is not available".into())]
        );

        let mut machine = alice();
        machine.handle_server_event(&incoming("c1", "2", "Bob"));
        machine.accept().unwrap();
        machine.handle_server_event(&started("c1"));
        machine.handle_server_event(&error);
        assert_eq!(machine.state().name(), "in a call");
    }

    #[test]
    fn caller_can_cancel_while_requesting() {
        let mut machine = alice();
        let call_id = sent_call_id(&machine.call(&"2".into()).unwrap());
        let actions = machine.end();
        assert_eq!(
            actions,
            [LobbyAction::Send(ClientEvent::EndCall(EndCall { call_id }))]
        );
        assert_eq!(machine.state(), &CallState::Idle);
    }

    #[test]
    fn leaving_hangs_up_first() {
        let mut machine = alice();
        machine.handle_server_event(&incoming("c1", "2", "Bob"));
        machine.accept().unwrap();
        machine.handle_server_event(&started("c1"));

        let actions = machine.leave();
        assert!(matches!(
            actions.first(),
            Some(LobbyAction::Send(ClientEvent::EndCall(_)))
        ));
        assert_eq!(
            actions.last(),
            Some(&LobbyAction::Send(ClientEvent::LeaveLobby))
        );
        assert!(machine.roster().is_empty());
    }
}
