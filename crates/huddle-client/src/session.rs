//! Session driver: one task per lobby tab.
//!
//! A single `select!` loop serializes everything that can change local call state:
//! server events, commands from the UI, peer-connection events and the ring timer.
//! The UI learns about changes through a broadcast of [`SessionUpdate`]s and the link
//! status `watch`.

use crate::error::{ClientError, Result};
use crate::lobby::{LobbyAction, LobbyMachine};
use crate::media::LocalMedia;
use crate::negotiation::{LinkStatus, NegotiationEngine};
use crate::peer::{PeerConfig, PeerConnectionFactory, PeerEvent};
use huddle_common::ids::{CallId, UserId};
use huddle_common::protocol::{ClientEvent, OutboundSignal, RosterEntry, ServerEvent};
use std::collections::VecDeque;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, sleep_until};

/// What the UI can ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyCommand {
    Call(UserId),
    Accept,
    Reject,
    /// Hang up, cancel an outgoing request, or decline a ringing call.
    End,
    RefreshRoster,
    ToggleAudio,
    ToggleVideo,
    Leave,
}

/// What the UI should reflect.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Roster(Vec<RosterEntry>),
    IncomingCall {
        call_id: CallId,
        from_user_id: UserId,
        from_user_name: String,
    },
    IncomingCallCleared,
    CallControls(bool),
    AudioMuted(bool),
    VideoHidden(bool),
    Notice(String),
    /// The session loop exited.
    Closed,
}

pub struct LobbySession<F: PeerConnectionFactory> {
    driver: Driver<F>,
    peer_events: mpsc::UnboundedReceiver<(u64, PeerEvent)>,
}

struct Driver<F: PeerConnectionFactory> {
    lobby: LobbyMachine,
    engine: NegotiationEngine<F>,
    outbound: mpsc::Sender<ClientEvent>,
    updates: broadcast::Sender<SessionUpdate>,
    ring_deadline: Option<(CallId, Instant)>,
}

impl<F: PeerConnectionFactory> LobbySession<F> {
    /// `outbound` is the transport's send queue (see
    /// [`LobbyTransport::sender`](crate::transport::LobbyTransport::sender)).
    pub fn new(
        lobby: LobbyMachine,
        factory: F,
        peer_config: PeerConfig,
        outbound: mpsc::Sender<ClientEvent>,
    ) -> Self {
        let (engine, peer_events) = NegotiationEngine::new(factory, peer_config);
        let (updates, _) = broadcast::channel(256);
        Self {
            driver: Driver {
                lobby,
                engine,
                outbound,
                updates,
                ring_deadline: None,
            },
            peer_events,
        }
    }

    pub fn with_local_media(mut self, media: LocalMedia) -> Self {
        self.driver.engine.set_local_media(Some(media));
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.driver.updates.subscribe()
    }

    pub fn link_status(&self) -> watch::Receiver<LinkStatus> {
        self.driver.engine.status()
    }

    /// Join the lobby and process events until the connection closes or the UI leaves.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<ServerEvent>,
        mut commands: mpsc::Receiver<LobbyCommand>,
    ) -> Result<()> {
        let Self {
            mut driver,
            mut peer_events,
        } = self;

        let join = driver.lobby.join();
        driver.apply(join).await?;

        loop {
            let ring_at = driver.ring_deadline.as_ref().map(|(_, at)| *at);

            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => driver.on_server_event(event).await?,
                    None => {
                        tracing::info!(user = %driver.lobby.identity().user_id, "Lobby connection lost");
                        driver.engine.end_local_call();
                        driver.publish(SessionUpdate::Notice("Disconnected from lobby".into()));
                        break;
                    }
                },

                command = commands.recv() => match command {
                    Some(LobbyCommand::Leave) | None => {
                        let leave = driver.lobby.leave();
                        driver.apply(leave).await?;
                        break;
                    }
                    Some(command) => driver.on_command(command).await?,
                },

                Some((generation, event)) = peer_events.recv() => {
                    driver.on_peer_event(generation, event).await?;
                }

                _ = ring_timer(ring_at) => {
                    if let Some((call_id, _)) = driver.ring_deadline.take() {
                        let actions = driver.lobby.ring_timeout(&call_id);
                        driver.apply(actions).await?;
                    }
                }
            }
        }

        driver.publish(SessionUpdate::Closed);
        Ok(())
    }
}

impl<F: PeerConnectionFactory> Driver<F> {
    async fn on_server_event(&mut self, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::WebrtcSignal(signal) => {
                match self.engine.handle_signal(signal).await {
                    Ok(signals) => self.send_signals(signals).await,
                    Err(e) => self.fail_call(e).await,
                }
            }
            event => {
                let actions = self.lobby.handle_server_event(&event);
                self.apply(actions).await
            }
        }
    }

    async fn on_peer_event(&mut self, generation: u64, event: PeerEvent) -> Result<()> {
        match self.engine.handle_peer_event(generation, event).await {
            Ok(signals) => self.send_signals(signals).await,
            Err(e) => self.fail_call(e).await,
        }
    }

    async fn on_command(&mut self, command: LobbyCommand) -> Result<()> {
        let actions = match command {
            LobbyCommand::Call(user_id) => self.lobby.call(&user_id),
            LobbyCommand::Accept => self.lobby.accept(),
            LobbyCommand::Reject => self.lobby.reject(),
            LobbyCommand::End => Ok(self.lobby.end()),
            LobbyCommand::RefreshRoster => Ok(self.lobby.refresh_roster()),
            LobbyCommand::Leave => Ok(self.lobby.leave()),
            LobbyCommand::ToggleAudio => {
                match self.engine.toggle_audio_mute() {
                    Ok(muted) => self.publish(SessionUpdate::AudioMuted(muted)),
                    Err(e) => self.publish(SessionUpdate::Notice(e.to_string())),
                }
                return Ok(());
            }
            LobbyCommand::ToggleVideo => {
                match self.engine.toggle_video_hidden() {
                    Ok(hidden) => self.publish(SessionUpdate::VideoHidden(hidden)),
                    Err(e) => self.publish(SessionUpdate::Notice(e.to_string())),
                }
                return Ok(());
            }
        };

        match actions {
            Ok(actions) => self.apply(actions).await,
            Err(e) => {
                tracing::debug!("Command refused: {e}");
                self.publish(SessionUpdate::Notice(e.to_string()));
                Ok(())
            }
        }
    }

    async fn apply(&mut self, actions: Vec<LobbyAction>) -> Result<()> {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            match action {
                LobbyAction::Send(event) => self.send(event).await?,
                LobbyAction::RosterChanged => {
                    self.publish(SessionUpdate::Roster(self.lobby.roster().to_vec()));
                }
                LobbyAction::IceServers(servers) => self.engine.set_ice_servers(servers),
                LobbyAction::ShowIncomingCall {
                    call_id,
                    from_user_id,
                    from_user_name,
                } => self.publish(SessionUpdate::IncomingCall {
                    call_id,
                    from_user_id,
                    from_user_name,
                }),
                LobbyAction::HideIncomingCall => {
                    self.ring_deadline = None;
                    self.publish(SessionUpdate::IncomingCallCleared);
                }
                LobbyAction::ArmRingTimer { call_id, after } => {
                    self.ring_deadline = Some((call_id, Instant::now() + after));
                }
                LobbyAction::CallControls(enabled) => {
                    self.publish(SessionUpdate::CallControls(enabled));
                }
                LobbyAction::StartNegotiation {
                    call_id,
                    remote_user_id,
                    role,
                } => match self.engine.start_call(call_id, remote_user_id, role).await {
                    Ok(signals) => self.send_signals(signals).await?,
                    Err(e) => {
                        tracing::warn!("Negotiation failed to start: {e}");
                        self.publish(SessionUpdate::Notice(format!("Call failed: {e}")));
                        queue.extend(self.lobby.end());
                    }
                },
                LobbyAction::StopNegotiation => self.engine.end_local_call(),
                LobbyAction::Notify(text) => self.publish(SessionUpdate::Notice(text)),
            }
        }
        Ok(())
    }

    /// A peer-connection operation failed mid-call: hang up rather than hang.
    async fn fail_call(&mut self, error: ClientError) -> Result<()> {
        tracing::warn!(call = ?self.engine.call_id(), "Peer negotiation failed: {error}");
        self.publish(SessionUpdate::Notice(format!("Call failed: {error}")));
        let actions = self.lobby.end();
        if actions.is_empty() {
            self.engine.end_local_call();
        }
        self.apply(actions).await
    }

    async fn send_signals(&mut self, signals: Vec<OutboundSignal>) -> Result<()> {
        for signal in signals {
            self.send(ClientEvent::WebrtcSignal(signal)).await?;
        }
        Ok(())
    }

    async fn send(&mut self, event: ClientEvent) -> Result<()> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    fn publish(&self, update: SessionUpdate) {
        // Nobody listening is fine.
        let _ = self.updates.send(update);
    }
}

async fn ring_timer(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::Identity;
    use crate::testing::FakeFactory;
    use chrono::Utc;
    use huddle_common::protocol::{
        CallEnded, CallStarted, IceCandidate, InboundSignal, IncomingCall, LobbyWelcome,
        PresenceStatus, SdpType, SessionDescription, SignalPayload,
    };
    use std::time::Duration;

    struct Harness {
        inbound: mpsc::Sender<ServerEvent>,
        commands: mpsc::Sender<LobbyCommand>,
        outbound: mpsc::Receiver<ClientEvent>,
        link: watch::Receiver<LinkStatus>,
        updates: broadcast::Receiver<SessionUpdate>,
        peers: FakeFactory,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    fn entry(uid: &str, name: &str) -> RosterEntry {
        RosterEntry {
            user_id: uid.into(),
            user_name: name.into(),
            status: PresenceStatus::Online,
            is_available: true,
        }
    }

    async fn start(uid: &str, name: &str) -> Harness {
        let peers = FakeFactory::new(name);
        let (out_tx, mut outbound) = mpsc::channel(64);
        let (inbound, in_rx) = mpsc::channel(64);
        let (commands, cmd_rx) = mpsc::channel(8);

        let session = LobbySession::new(
            LobbyMachine::new(Identity::new(uid, name)),
            peers.clone(),
            PeerConfig::default(),
            out_tx,
        )
        .with_local_media(LocalMedia::camera_and_microphone(name));
        let link = session.link_status();
        let updates = session.subscribe();
        let task = tokio::spawn(session.run(in_rx, cmd_rx));

        assert!(matches!(
            outbound.recv().await,
            Some(ClientEvent::JoinLobby(_))
        ));
        inbound
            .send(ServerEvent::LobbyWelcome(LobbyWelcome {
                message: format!("Welcome to the lobby, {name}!"),
                users: vec![entry("1", "Alice"), entry("2", "Bob")],
                ice_servers: Vec::new(),
                ring_timeout_secs: None,
            }))
            .await
            .unwrap();

        Harness {
            inbound,
            commands,
            outbound,
            link,
            updates,
            peers,
            task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_call_is_rejected_after_the_ring_timeout() {
        let mut h = start("2", "Bob").await;
        let rang_at = Instant::now();
        h.inbound
            .send(ServerEvent::IncomingCall(IncomingCall {
                from_user_id: "1".into(),
                from_user_name: "Alice".into(),
                call_id: "c1".into(),
                timestamp: Utc::now(),
            }))
            .await
            .unwrap();

        let Some(ClientEvent::RejectCall(reject)) = h.outbound.recv().await else {
            panic!("expected an automatic reject");
        };
        assert_eq!(reject.call_id, CallId::from("c1"));
        assert!(rang_at.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn caller_negotiates_and_tears_down_on_call_ended() {
        let mut h = start("1", "Alice").await;
        h.commands.send(LobbyCommand::Call("2".into())).await.unwrap();
        let Some(ClientEvent::RequestCall(request)) = h.outbound.recv().await else {
            panic!("expected request-call");
        };
        let call_id = request.call_id.unwrap();

        h.inbound
            .send(ServerEvent::CallStarted(CallStarted {
                call_id: call_id.clone(),
                room_id: call_id.room_id(),
                users: vec![entry("1", "Alice"), entry("2", "Bob")],
            }))
            .await
            .unwrap();

        let Some(ClientEvent::WebrtcSignal(offer)) = h.outbound.recv().await else {
            panic!("expected the offer");
        };
        assert!(matches!(&offer.signal, SignalPayload::Sdp(d) if d.kind == SdpType::Offer));
        let Some(ClientEvent::WebrtcSignal(candidate)) = h.outbound.recv().await else {
            panic!("expected a local candidate");
        };
        assert!(matches!(candidate.signal, SignalPayload::Candidate(_)));

        for signal in [
            SignalPayload::Candidate(IceCandidate {
                candidate: "candidate:bob".into(),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            }),
            SignalPayload::Sdp(SessionDescription::answer("v=0 bob answer")),
        ] {
            h.inbound
                .send(ServerEvent::WebrtcSignal(InboundSignal {
                    from_user_id: "2".into(),
                    signal,
                    call_id: call_id.clone(),
                }))
                .await
                .unwrap();
        }
        h.link
            .wait_for(|s| *s == LinkStatus::Connected)
            .await
            .unwrap();

        h.inbound
            .send(ServerEvent::CallEnded(CallEnded {
                call_id,
                message: "Call ended".into(),
            }))
            .await
            .unwrap();
        h.link.wait_for(|s| *s == LinkStatus::Idle).await.unwrap();
        assert!(h.peers.last().lock().unwrap().closed);
    }

    #[tokio::test]
    async fn leave_command_sends_leave_and_stops() {
        let mut h = start("1", "Alice").await;
        h.commands.send(LobbyCommand::Leave).await.unwrap();

        assert!(matches!(h.outbound.recv().await, Some(ClientEvent::LeaveLobby)));
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn refused_commands_become_notices() {
        let mut h = start("1", "Alice").await;
        h.commands.send(LobbyCommand::Accept).await.unwrap();

        loop {
            match h.updates.recv().await.unwrap() {
                SessionUpdate::Notice(text) if text.starts_with("Cannot accept") => {
                    assert_eq!(text, "Cannot accept a call while idle");
                    break;
                }
                _ => continue,
            }
        }
        h.commands.send(LobbyCommand::ToggleAudio).await.unwrap();
        loop {
            if let SessionUpdate::AudioMuted(muted) = h.updates.recv().await.unwrap() {
                assert!(muted);
                break;
            }
        }
    }
}
