//! WebRTC negotiation for one call at a time.
//!
//! The engine owns at most one peer connection and turns inbound `webrtc-signal`s and
//! local peer events into outbound signals. It does not talk to the socket itself: every
//! operation returns the [`OutboundSignal`]s to send.
//!
//! Only the caller creates the initial offer. The callee arms the engine with the call id
//! and builds its peer connection when that offer arrives.

use crate::error::{ClientError, PeerError, Result};
use crate::media::{LocalMedia, MediaTrack};
use crate::peer::{
    IceConnectionState, PeerConfig, PeerConnection, PeerConnectionFactory, PeerEvent,
    PeerEventSink,
};
use huddle_common::ice::IceServerConfig;
use huddle_common::ids::{CallId, UserId};
use huddle_common::protocol::{
    IceCandidate, InboundSignal, OutboundSignal, SdpType, SessionDescription, SignalPayload,
};
use tokio::sync::{mpsc, watch};

/// Which side of the call this client is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    /// Requested the call; sends the offer.
    Caller,
    /// Accepted the call; answers.
    Callee,
}

/// Media path health as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    /// First ICE failure; a restart is in flight.
    Restarting,
    /// ICE failed again after the restart. Not retried.
    Failed,
}

impl LinkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Restarting => "restarting",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct ActiveCall {
    call_id: CallId,
    remote_user_id: UserId,
}

pub struct NegotiationEngine<F: PeerConnectionFactory> {
    factory: F,
    config: PeerConfig,
    local_media: Option<LocalMedia>,
    peer: Option<F::Connection>,
    /// Bumped for every peer connection and on teardown.
    generation: u64,
    events_tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
    call: Option<ActiveCall>,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    restart_attempted: bool,
    remote_tracks: Vec<MediaTrack>,
    status: watch::Sender<LinkStatus>,
}

impl<F: PeerConnectionFactory> NegotiationEngine<F> {
    /// Build an engine. The receiver yields events from the engine's peer connections,
    /// to be fed back through [`handle_peer_event`](Self::handle_peer_event).
    pub fn new(
        factory: F,
        config: PeerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<(u64, PeerEvent)>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(LinkStatus::Idle);
        let engine = Self {
            factory,
            config,
            local_media: None,
            peer: None,
            generation: 0,
            events_tx,
            call: None,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            restart_attempted: false,
            remote_tracks: Vec::new(),
            status,
        };
        (engine, events_rx)
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.call.as_ref().map(|c| &c.call_id)
    }

    pub fn remote_user_id(&self) -> Option<&UserId> {
        self.call.as_ref().map(|c| &c.remote_user_id)
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    pub fn remote_tracks(&self) -> &[MediaTrack] {
        &self.remote_tracks
    }

    /// Relay list for connections created from now on.
    pub fn set_ice_servers(&mut self, ice_servers: Vec<IceServerConfig>) {
        self.config.ice_servers = ice_servers;
    }

    /// Hand over (or withdraw) the application's local stream.
    pub fn set_local_media(&mut self, media: Option<LocalMedia>) {
        self.local_media = media;
    }

    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.local_media.as_ref()
    }

    /// Returns true when audio is now muted.
    pub fn toggle_audio_mute(&mut self) -> Result<bool> {
        self.local_media
            .as_mut()
            .map(LocalMedia::toggle_audio_mute)
            .ok_or(ClientError::NoLocalMedia)
    }

    /// Returns true when video is now hidden.
    pub fn toggle_video_hidden(&mut self) -> Result<bool> {
        self.local_media
            .as_mut()
            .map(LocalMedia::toggle_video_hidden)
            .ok_or(ClientError::NoLocalMedia)
    }

    /// Begin negotiating a confirmed call.
    ///
    /// The caller builds its peer connection and returns the offer; the callee only
    /// records the call and waits for that offer.
    pub async fn start_call(
        &mut self,
        call_id: CallId,
        remote_user_id: UserId,
        role: CallRole,
    ) -> Result<Vec<OutboundSignal>> {
        if role == CallRole::Caller && self.local_media.is_none() {
            return Err(ClientError::NoLocalMedia);
        }

        self.end_local_call();
        self.call = Some(ActiveCall {
            call_id,
            remote_user_id,
        });
        self.status.send_replace(LinkStatus::Connecting);

        match role {
            CallRole::Caller => {
                self.open_peer().await?;
                let offer = self.peer_mut()?.create_offer(false).await?;
                self.peer_mut()?.set_local_description(offer.clone()).await?;
                tracing::debug!(call = ?self.call_id(), "Offer created");
                Ok(self.outbound(SignalPayload::Sdp(offer)).into_iter().collect())
            }
            CallRole::Callee => {
                tracing::debug!(call = ?self.call_id(), "Waiting for offer");
                Ok(Vec::new())
            }
        }
    }

    /// Apply one relayed signal from the remote side.
    pub async fn handle_signal(&mut self, signal: InboundSignal) -> Result<Vec<OutboundSignal>> {
        let Some(call) = &self.call else {
            tracing::debug!(call = %signal.call_id, kind = ?signal.signal.kind(), "Signal with no active call ignored");
            return Ok(Vec::new());
        };
        if call.call_id != signal.call_id {
            tracing::debug!(
                call = %signal.call_id,
                active = %call.call_id,
                "Signal for another call ignored"
            );
            return Ok(Vec::new());
        }

        match signal.signal {
            SignalPayload::Sdp(desc) if desc.kind == SdpType::Offer => self.on_offer(desc).await,
            SignalPayload::Sdp(desc) => {
                if self.peer.is_none() {
                    tracing::warn!(call = %signal.call_id, "Answer without a peer connection ignored");
                    return Ok(Vec::new());
                }
                self.apply_remote_description(desc).await?;
                Ok(Vec::new())
            }
            SignalPayload::Candidate(candidate) => {
                if self.peer.is_some() && self.remote_description_set {
                    self.peer_mut()?.add_ice_candidate(candidate).await?;
                } else {
                    // Offer or answer still in flight.
                    self.pending_candidates.push(candidate);
                }
                Ok(Vec::new())
            }
        }
    }

    /// Apply an event reported by the current peer connection.
    pub async fn handle_peer_event(
        &mut self,
        generation: u64,
        event: PeerEvent,
    ) -> Result<Vec<OutboundSignal>> {
        if generation != self.generation || self.peer.is_none() {
            tracing::trace!(generation, current = self.generation, "Stale peer event dropped");
            return Ok(Vec::new());
        }

        match event {
            PeerEvent::IceCandidate(candidate) => {
                Ok(self.outbound(SignalPayload::Candidate(candidate)).into_iter().collect())
            }
            PeerEvent::RemoteTrack(track) => {
                tracing::debug!(track = %track.id, "Remote track attached");
                self.remote_tracks.push(track);
                Ok(Vec::new())
            }
            PeerEvent::IceConnectionStateChange(state) => self.on_ice_state(state).await,
        }
    }

    /// Close the peer connection and forget the call. Local media is left alone.
    pub fn end_local_call(&mut self) {
        if let Some(mut peer) = self.peer.take() {
            peer.close();
            tracing::debug!(call = ?self.call_id(), "Peer connection closed");
        }
        self.generation += 1;
        self.call = None;
        self.remote_description_set = false;
        self.pending_candidates.clear();
        self.restart_attempted = false;
        self.remote_tracks.clear();
        self.status.send_replace(LinkStatus::Idle);
    }

    async fn on_offer(&mut self, offer: SessionDescription) -> Result<Vec<OutboundSignal>> {
        if self.peer.is_none() {
            self.open_peer().await?;
        } else {
            tracing::debug!(call = ?self.call_id(), "Renegotiation offer");
        }

        self.apply_remote_description(offer).await?;
        let answer = self.peer_mut()?.create_answer().await?;
        self.peer_mut()?.set_local_description(answer.clone()).await?;
        Ok(self.outbound(SignalPayload::Sdp(answer)).into_iter().collect())
    }

    async fn apply_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.peer_mut()?.set_remote_description(desc).await?;
        self.remote_description_set = true;

        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.peer_mut()?.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn on_ice_state(&mut self, state: IceConnectionState) -> Result<Vec<OutboundSignal>> {
        tracing::debug!(call = ?self.call_id(), %state, "ICE connection state");

        match state {
            IceConnectionState::Connected | IceConnectionState::Completed => {
                self.status.send_replace(LinkStatus::Connected);
            }
            IceConnectionState::Checking => {
                self.status.send_replace(LinkStatus::Connecting);
            }
            IceConnectionState::Disconnected => {
                self.status.send_replace(LinkStatus::Disconnected);
            }
            IceConnectionState::Failed if !self.restart_attempted => {
                self.restart_attempted = true;
                self.status.send_replace(LinkStatus::Restarting);
                tracing::warn!(call = ?self.call_id(), "ICE failed; restarting once");

                let offer = self.peer_mut()?.create_offer(true).await?;
                self.peer_mut()?.set_local_description(offer.clone()).await?;
                return Ok(self.outbound(SignalPayload::Sdp(offer)).into_iter().collect());
            }
            IceConnectionState::Failed => {
                self.status.send_replace(LinkStatus::Failed);
                tracing::warn!(call = ?self.call_id(), "ICE failed after restart; giving up");
            }
            IceConnectionState::New | IceConnectionState::Closed => {}
        }
        Ok(Vec::new())
    }

    async fn open_peer(&mut self) -> Result<()> {
        if let Some(mut previous) = self.peer.take() {
            previous.close();
        }
        self.generation += 1;
        self.remote_description_set = false;

        let sink = PeerEventSink::new(self.generation, self.events_tx.clone());
        let mut peer = self.factory.create(&self.config, sink)?;
        if let Some(media) = &self.local_media {
            for track in media.tracks() {
                peer.add_track(track).await?;
            }
        }
        self.peer = Some(peer);
        Ok(())
    }

    fn peer_mut(&mut self) -> Result<&mut F::Connection> {
        self.peer
            .as_mut()
            .ok_or(ClientError::Peer(PeerError::Closed))
    }

    fn outbound(&self, signal: SignalPayload) -> Option<OutboundSignal> {
        self.call.as_ref().map(|call| OutboundSignal {
            to_user_id: call.remote_user_id.clone(),
            signal,
            call_id: call.call_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFactory;

    type Engine = NegotiationEngine<FakeFactory>;
    type Events = mpsc::UnboundedReceiver<(u64, PeerEvent)>;

    fn engine(label: &str, media: bool) -> (Engine, Events, FakeFactory) {
        let factory = FakeFactory::new(label);
        let (mut engine, events) = NegotiationEngine::new(factory.clone(), PeerConfig::default());
        if media {
            engine.set_local_media(Some(LocalMedia::camera_and_microphone(label)));
        }
        (engine, events, factory)
    }

    fn inbound(from: &str, out: OutboundSignal) -> InboundSignal {
        InboundSignal {
            from_user_id: from.into(),
            signal: out.signal,
            call_id: out.call_id,
        }
    }

    /// Forward everything the engine's peer reported, collecting what it wants sent.
    async fn pump(engine: &mut Engine, events: &mut Events, from: &str) -> Vec<InboundSignal> {
        let mut out = Vec::new();
        while let Ok((generation, event)) = events.try_recv() {
            for signal in engine.handle_peer_event(generation, event).await.unwrap() {
                out.push(inbound(from, signal));
            }
        }
        out
    }

    #[tokio::test]
    async fn caller_offers_and_callee_answers() {
        let (mut alice, _alice_events, alice_peers) = engine("alice", true);
        let (mut bob, _bob_events, bob_peers) = engine("bob", true);

        let offer = alice
            .start_call("c1".into(), "2".into(), CallRole::Caller)
            .await
            .unwrap();
        assert!(bob
            .start_call("c1".into(), "1".into(), CallRole::Callee)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(offer.len(), 1);
        assert_eq!(offer[0].to_user_id, UserId::from("2"));
        assert_eq!(alice_peers.last().lock().unwrap().tracks.len(), 2);

        let answer = bob
            .handle_signal(inbound("1", offer[0].clone()))
            .await
            .unwrap();
        let [OutboundSignal {
            signal: SignalPayload::Sdp(desc),
            ..
        }] = &answer[..]
        else {
            panic!("expected an answer");
        };
        assert_eq!(desc.kind, SdpType::Answer);
        assert_eq!(bob_peers.created(), 1);
        assert!(bob.has_peer());
    }

    #[tokio::test]
    async fn caller_needs_local_media() {
        let (mut alice, _events, peers) = engine("alice", false);
        let err = alice
            .start_call("c1".into(), "2".into(), CallRole::Caller)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NoLocalMedia));
        assert_eq!(peers.created(), 0);
        assert!(alice.toggle_audio_mute().is_err());
    }

    #[tokio::test]
    async fn offer_answer_and_candidates_connect_in_any_order() {
        for seed in 1..=24u32 {
            let (mut alice, mut alice_events, alice_peers) = engine("alice", true);
            let (mut bob, mut bob_events, bob_peers) = engine("bob", true);

            bob.start_call("c1".into(), "1".into(), CallRole::Callee)
                .await
                .unwrap();
            let mut to_bob: Vec<InboundSignal> = alice
                .start_call("c1".into(), "2".into(), CallRole::Caller)
                .await
                .unwrap()
                .into_iter()
                .map(|s| inbound("1", s))
                .collect();
            let mut to_alice: Vec<InboundSignal> = Vec::new();

            // Deterministic pseudo-random delivery order per seed.
            let mut state = seed;
            for _ in 0..64 {
                to_bob.extend(pump(&mut alice, &mut alice_events, "1").await);
                to_alice.extend(pump(&mut bob, &mut bob_events, "2").await);
                if to_bob.is_empty() && to_alice.is_empty() {
                    break;
                }

                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                let pick_bob = to_alice.is_empty() || (!to_bob.is_empty() && (state >> 16) % 2 == 0);
                if pick_bob {
                    let signal = to_bob.remove((state >> 8) as usize % to_bob.len());
                    for out in bob.handle_signal(signal).await.unwrap() {
                        to_alice.push(inbound("2", out));
                    }
                } else {
                    let signal = to_alice.remove((state >> 8) as usize % to_alice.len());
                    for out in alice.handle_signal(signal).await.unwrap() {
                        to_bob.push(inbound("1", out));
                    }
                }
            }

            assert!(alice_peers.last().lock().unwrap().connected, "seed {seed}: caller");
            assert!(bob_peers.last().lock().unwrap().connected, "seed {seed}: callee");
            assert_eq!(*alice.status().borrow(), LinkStatus::Connected, "seed {seed}");
            assert_eq!(*bob.status().borrow(), LinkStatus::Connected, "seed {seed}");
        }
    }

    #[tokio::test]
    async fn ice_failure_restarts_once_then_reports_failed() {
        let (mut alice, _events, peers) = engine("alice", true);
        alice
            .start_call("c1".into(), "2".into(), CallRole::Caller)
            .await
            .unwrap();
        let generation = alice.generation();
        let failed = PeerEvent::IceConnectionStateChange(IceConnectionState::Failed);

        let restart = alice.handle_peer_event(generation, failed.clone()).await.unwrap();
        assert_eq!(restart.len(), 1);
        assert_eq!(*alice.status().borrow(), LinkStatus::Restarting);
        assert_eq!(peers.last().lock().unwrap().ice_restarts, 1);

        let again = alice.handle_peer_event(generation, failed).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(*alice.status().borrow(), LinkStatus::Failed);
        assert_eq!(peers.last().lock().unwrap().ice_restarts, 1);
    }

    #[tokio::test]
    async fn teardown_closes_peer_and_drops_stale_events() {
        let (mut alice, mut events, peers) = engine("alice", true);
        alice
            .start_call("c1".into(), "2".into(), CallRole::Caller)
            .await
            .unwrap();
        alice.end_local_call();

        assert!(peers.last().lock().unwrap().closed);
        assert!(alice.call_id().is_none());
        assert!(alice.local_media().is_some(), "local stream survives teardown");
        // The candidate gathered before teardown is not sent.
        assert!(pump(&mut alice, &mut events, "1").await.is_empty());
    }

    #[tokio::test]
    async fn signals_for_other_calls_are_ignored() {
        let (mut bob, _events, peers) = engine("bob", true);
        bob.start_call("c1".into(), "1".into(), CallRole::Callee)
            .await
            .unwrap();

        let stray = InboundSignal {
            from_user_id: "3".into(),
            signal: SignalPayload::Sdp(SessionDescription::offer("v=0")),
            call_id: "c9".into(),
        };
        assert!(bob.handle_signal(stray).await.unwrap().is_empty());
        assert_eq!(peers.created(), 0);
    }

    #[tokio::test]
    async fn renegotiation_offer_is_answered_on_the_same_connection() {
        let (mut alice, _a, _) = engine("alice", true);
        let (mut bob, _b, bob_peers) = engine("bob", true);
        bob.start_call("c1".into(), "1".into(), CallRole::Callee)
            .await
            .unwrap();
        let offer = alice
            .start_call("c1".into(), "2".into(), CallRole::Caller)
            .await
            .unwrap()
            .remove(0);
        bob.handle_signal(inbound("1", offer.clone())).await.unwrap();
        let answer = bob.handle_signal(inbound("1", offer)).await.unwrap();

        assert_eq!(answer.len(), 1);
        assert_eq!(bob_peers.created(), 1);
    }
}
