//! In-memory peer connection for tests.
//!
//! A fake connection reports `connected` once it has a local description, a remote
//! description, and at least one remote candidate. Setting a local description "gathers"
//! one candidate.

use crate::error::PeerError;
use crate::media::MediaTrack;
use crate::peer::{
    IceConnectionState, PeerConfig, PeerConnection, PeerConnectionFactory, PeerEvent,
    PeerEventSink,
};
use async_trait::async_trait;
use huddle_common::protocol::{IceCandidate, SdpType, SessionDescription};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct FakeState {
    pub tracks: Vec<String>,
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub remote_candidates: Vec<IceCandidate>,
    pub offers: u32,
    pub ice_restarts: u32,
    pub connected: bool,
    pub closed: bool,
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    label: String,
    peers: Arc<Mutex<Vec<Arc<Mutex<FakeState>>>>>,
}

impl FakeFactory {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            peers: Arc::default(),
        }
    }

    pub fn created(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// State of the most recently created connection.
    pub fn last(&self) -> Arc<Mutex<FakeState>> {
        self.peers.lock().unwrap().last().cloned().expect("no peer created")
    }
}

impl PeerConnectionFactory for FakeFactory {
    type Connection = FakePeer;

    fn create(&mut self, _config: &PeerConfig, events: PeerEventSink) -> Result<FakePeer, PeerError> {
        let state = Arc::new(Mutex::new(FakeState::default()));
        self.peers.lock().unwrap().push(state.clone());
        Ok(FakePeer {
            label: self.label.clone(),
            state,
            events,
        })
    }
}

pub struct FakePeer {
    label: String,
    state: Arc<Mutex<FakeState>>,
    events: PeerEventSink,
}

impl FakePeer {
    fn check_open(&self) -> Result<(), PeerError> {
        if self.state.lock().unwrap().closed {
            return Err(PeerError::Closed);
        }
        Ok(())
    }

    fn maybe_connect(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.connected
            && state.local.is_some()
            && state.remote.is_some()
            && !state.remote_candidates.is_empty()
        {
            state.connected = true;
            drop(state);
            self.events
                .emit(PeerEvent::IceConnectionStateChange(IceConnectionState::Connected));
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_track(&mut self, track: &MediaTrack) -> Result<(), PeerError> {
        self.check_open()?;
        self.state.lock().unwrap().tracks.push(track.id.clone());
        Ok(())
    }

    async fn create_offer(&mut self, ice_restart: bool) -> Result<SessionDescription, PeerError> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        state.offers += 1;
        if ice_restart {
            state.ice_restarts += 1;
        }
        Ok(SessionDescription::offer(format!(
            "v=0 {} offer {}",
            self.label, state.offers
        )))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, PeerError> {
        self.check_open()?;
        let state = self.state.lock().unwrap();
        match &state.remote {
            Some(remote) if remote.kind == SdpType::Offer => {
                Ok(SessionDescription::answer(format!("v=0 {} answer", self.label)))
            }
            _ => Err(PeerError::operation("createAnswer", "no remote offer")),
        }
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), PeerError> {
        self.check_open()?;
        self.state.lock().unwrap().local = Some(desc);
        self.events.emit(PeerEvent::IceCandidate(IceCandidate {
            candidate: format!("candidate:{} 1 udp 2122260223 10.0.0.1 50000 typ host", self.label),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }));
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), PeerError> {
        self.check_open()?;
        self.state.lock().unwrap().remote = Some(desc);
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.check_open()?;
        {
            let mut state = self.state.lock().unwrap();
            if state.remote.is_none() {
                return Err(PeerError::operation(
                    "addIceCandidate",
                    "remote description not set",
                ));
            }
            state.remote_candidates.push(candidate);
        }
        self.maybe_connect();
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}
