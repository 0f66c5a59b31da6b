//! WebSocket transport to the lobby endpoint.
//!
//! Splits the socket into a writer task fed from an `mpsc` queue of [`ClientEvent`]s and a
//! reader task that parses frames into [`ServerEvent`]s.

use crate::error::{ClientError, Result};
use futures_util::{SinkExt, StreamExt};
use huddle_common::protocol::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

const QUEUE_LEN: usize = 256;

/// An open lobby connection.
pub struct LobbyTransport {
    outbound: mpsc::Sender<ClientEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LobbyTransport {
    /// Connect to `ws://host:port/lobby`. Returns the transport and the stream of server
    /// events; the stream ends when the socket closes.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<ServerEvent>)> {
        let (ws, _) = connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();
        debug!("Lobby: connected to {url}");

        let (outbound, mut outbound_rx) = mpsc::channel::<ClientEvent>(QUEUE_LEN);
        let (inbound_tx, inbound) = mpsc::channel::<ServerEvent>(QUEUE_LEN);

        let writer = tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Lobby: failed to encode {}: {e}", event.name());
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!("Lobby: send failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(Message::Text(t)) => t,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Lobby: connection error: {e}");
                        break;
                    }
                };
                match serde_json::from_str::<ServerEvent>(text.as_str()) {
                    Ok(event) => {
                        if inbound_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Lobby: unreadable server event: {e}"),
                }
            }
            debug!("Lobby: connection closed");
        });

        Ok((
            Self {
                outbound,
                reader,
                writer,
            },
            inbound,
        ))
    }

    /// Queue for outgoing events; hand it to a [`LobbySession`](crate::session::LobbySession).
    pub fn sender(&self) -> mpsc::Sender<ClientEvent> {
        self.outbound.clone()
    }

    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    pub fn is_open(&self) -> bool {
        !self.reader.is_finished() && !self.writer.is_finished()
    }
}

impl Drop for LobbyTransport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
