//! The peer-connection seam.
//!
//! The actual WebRTC engine (a browser, `webrtc-rs`, a test fake) sits behind
//! [`PeerConnection`]. Offer/answer/candidate operations are opaque calls; anything the
//! engine reports on its own (gathered candidates, ICE state, remote tracks) comes back
//! through a [`PeerEventSink`].

use crate::error::PeerError;
use crate::media::MediaTrack;
use async_trait::async_trait;
use huddle_common::ice::IceServerConfig;
use huddle_common::protocol::{IceCandidate, SessionDescription};
use tokio::sync::mpsc;

/// ICE connection state, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something a peer connection reported without being asked.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A locally gathered candidate to send to the remote side.
    IceCandidate(IceCandidate),
    IceConnectionStateChange(IceConnectionState),
    RemoteTrack(MediaTrack),
}

/// Where a peer connection reports its events.
///
/// Each connection gets a sink stamped with a generation number, so events from a
/// connection that has since been replaced can be told apart and dropped.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
}

impl PeerEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, PeerEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: PeerEvent) {
        // The receiver only goes away with the session.
        let _ = self.tx.send((self.generation, event));
    }
}

/// Construction parameters for a peer connection.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServerConfig>,
    pub ice_candidate_pool_size: u8,
}

impl PeerConfig {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Self {
        Self {
            ice_servers,
            ice_candidate_pool_size: 10,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self::new(IceServerConfig::defaults())
    }
}

/// One WebRTC peer connection.
#[async_trait]
pub trait PeerConnection: Send {
    async fn add_track(&mut self, track: &MediaTrack) -> Result<(), PeerError>;

    /// Create an offer. With `ice_restart` the engine gathers fresh credentials.
    async fn create_offer(&mut self, ice_restart: bool) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&mut self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), PeerError>;

    async fn set_remote_description(&mut self, desc: SessionDescription)
    -> Result<(), PeerError>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), PeerError>;

    fn close(&mut self);
}

/// Builds peer connections for the negotiation engine.
pub trait PeerConnectionFactory: Send {
    type Connection: PeerConnection;

    fn create(
        &mut self,
        config: &PeerConfig,
        events: PeerEventSink,
    ) -> Result<Self::Connection, PeerError>;
}
