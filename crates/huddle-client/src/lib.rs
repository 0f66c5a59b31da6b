//! Huddle lobby client.
//!
//! - [`lobby`]: the call state machine (idle, requesting, ringing, in a call)
//! - [`negotiation`]: offer/answer/candidate exchange over one peer connection
//! - [`peer`]: the seam to the WebRTC engine
//! - [`transport`]: WebSocket connection to the lobby endpoint
//! - [`session`]: the driver loop that ties them together
//!
//! ```rust,no_run
//! use huddle_client::{Identity, LobbyMachine, LobbySession, LobbyTransport, PeerConfig};
//! # async fn demo<F: huddle_client::PeerConnectionFactory + 'static>(factory: F) -> huddle_client::Result<()> {
//! let (transport, inbound) = LobbyTransport::connect("ws://localhost:3000/lobby").await?;
//! let (commands, command_rx) = tokio::sync::mpsc::channel(16);
//! let session = LobbySession::new(
//!     LobbyMachine::new(Identity::new("1", "Alice")),
//!     factory,
//!     PeerConfig::default(),
//!     transport.sender(),
//! );
//! let mut updates = session.subscribe();
//! tokio::spawn(async move { while let Ok(update) = updates.recv().await { println!("{update:?}") } });
//! commands.send(huddle_client::LobbyCommand::RefreshRoster).await.ok();
//! session.run(inbound, command_rx).await
//! # }
//! ```

pub mod error;
pub mod lobby;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::{ClientError, PeerError, Result};
pub use lobby::{CallState, Identity, LobbyAction, LobbyMachine};
pub use media::{LocalMedia, MediaTrack, TrackKind};
pub use negotiation::{CallRole, LinkStatus, NegotiationEngine};
pub use peer::{
    IceConnectionState, PeerConfig, PeerConnection, PeerConnectionFactory, PeerEvent,
    PeerEventSink,
};
pub use session::{LobbyCommand, LobbySession, SessionUpdate};
pub use transport::LobbyTransport;
