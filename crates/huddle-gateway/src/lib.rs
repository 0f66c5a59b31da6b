//! # huddle-gateway
//!
//! WebSocket signaling gateway for the Huddle lobby. Handles:
//! - Lobby presence (join, leave, roster broadcasts)
//! - Call lifecycle (request, accept, reject, end)
//! - Relaying opaque WebRTC offers, answers and ICE candidates between peers
//!
//! Every socket gets a connection id and an outbound queue. Parsed client events go to
//! the router task, which owns all lobby state and decides who hears what.

pub mod actor;
pub mod calls;
pub mod registry;
pub mod router;

use actor::RouterHandle;
use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use huddle_common::config::AppConfig;
use huddle_common::error::{HuddleResult, SignalingError};
use huddle_common::ice::IceServerConfig;
use huddle_common::ids::ConnectionId;
use huddle_common::protocol::{ClientEvent, ServerEvent};
use router::{RouterPolicy, RouterStats, SignalingRouter};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Gateway state.
#[derive(Clone)]
pub struct GatewayState {
    pub router: RouterHandle,
    /// Per-connection outbound queue length.
    pub outbound_queue: usize,
    pub ice_servers: Vec<IceServerConfig>,
}

impl GatewayState {
    /// Spawn the router task with settings from the application config.
    pub fn new(config: &AppConfig) -> Self {
        let policy = RouterPolicy::from(config);
        Self {
            router: RouterHandle::spawn(SignalingRouter::new(policy)),
            outbound_queue: config.calls.outbound_queue.max(1),
            ice_servers: config.ice.servers.clone(),
        }
    }
}

/// Build the gateway router: `/lobby` (WebSocket), `/health`, `/ice-servers`.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/lobby", get(ws_handler))
        .route("/health", get(health))
        .route("/ice-servers", get(ice_servers))
        .with_state(Arc::new(state))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// `GET /health` body: lobby counters plus a status marker.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(flatten)]
    pub stats: RouterStats,
}

async fn health(State(state): State<Arc<GatewayState>>) -> HuddleResult<Json<HealthResponse>> {
    let stats = state.router.stats().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        stats,
    }))
}

async fn ice_servers(State(state): State<Arc<GatewayState>>) -> Json<Vec<IceServerConfig>> {
    Json(state.ice_servers.clone())
}

/// Handle a single WebSocket connection.
async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = ConnectionId::new();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(state.outbound_queue);
    if let Err(e) = state.router.connect(connection_id, outbound_tx).await {
        tracing::error!(connection = %connection_id, "Rejecting socket: {e}");
        return;
    }
    tracing::debug!(connection = %connection_id, "Socket opened");

    // ── Sender task ──────────────────────────────────────────────────────────
    // Drains this connection's queue onto the socket. The router closes the queue when
    // it evicts a connection that cannot keep up.
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(event = event.name(), "Failed to encode event: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    // ── Receive loop ─────────────────────────────────────────────────────────
    let recv_loop = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let delivered = match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => state.router.inbound(connection_id, event).await,
                        Err(e) => {
                            tracing::debug!(connection = %connection_id, "Unparseable client event: {e}");
                            let refusal = SignalingError::InvalidPayload(e.to_string()).to_event();
                            state.router.direct(connection_id, refusal).await
                        }
                    };
                    if delivered.is_err() {
                        tracing::error!(connection = %connection_id, "Router task gone; closing socket");
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = recv_loop => {}
        _ = &mut send_task => {
            tracing::debug!(connection = %connection_id, "Writer finished; closing socket");
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────────
    if let Err(e) = state.router.disconnect(connection_id).await {
        tracing::warn!(connection = %connection_id, "Disconnect not delivered: {e}");
    }
    send_task.abort();
    tracing::debug!(connection = %connection_id, "Socket closed");
}
