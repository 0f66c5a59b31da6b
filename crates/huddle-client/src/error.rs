//! Error types for the Huddle client.

use thiserror::Error;

/// A failed operation on a peer connection.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("{operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },

    #[error("Peer connection is closed")]
    Closed,
}

impl PeerError {
    pub fn operation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// A local action that the current call state does not allow.
    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    /// The target is not in the roster or not online.
    #[error("{0} cannot be called right now")]
    UserUnavailable(String),

    /// The lobby connection is gone.
    #[error("Lobby is not connected")]
    NotConnected,

    /// An error from the WebSocket layer.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Peer connection error: {0}")]
    Peer(#[from] PeerError),

    /// A call needs a local camera/microphone stream and none was provided.
    #[error("No local media stream")]
    NoLocalMedia,
}

pub type Result<T> = std::result::Result<T, ClientError>;
