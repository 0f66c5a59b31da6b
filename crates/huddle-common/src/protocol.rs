//! Lobby wire protocol.
//!
//! Every WebSocket text frame carries one named event:
//!
//! ```json
//! { "event": "request-call", "data": { "toUserId": "2", "callId": "c1" } }
//! ```
//!
//! Event names are kebab-case, payload fields camelCase. [`ClientEvent`] is what a browser
//! tab sends, [`ServerEvent`] what the router sends back. WebRTC payloads
//! ([`SignalPayload`]) are opaque to the server and only relayed.

use crate::ice::IceServerConfig;
use crate::ids::{CallId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Lobby presence of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceStatus {
    Online,
    /// Waiting for an answer to an outgoing call request.
    Busy,
    InCall,
}

impl PresenceStatus {
    pub fn is_available(self) -> bool {
        self == Self::Online
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::InCall => "in-call",
        }
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the roster broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: UserId,
    pub user_name: String,
    pub status: PresenceStatus,
    pub is_available: bool,
}

// === WebRTC payloads ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description, shaped like the browser's `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate, shaped like the browser's `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u16>,
}

/// Body of a `webrtc-signal`: either `{"sdp": {...}}` or `{"candidate": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalPayload {
    Sdp(SessionDescription),
    Candidate(IceCandidate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalPayload {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Sdp(d) if d.kind == SdpType::Offer => SignalKind::Offer,
            Self::Sdp(_) => SignalKind::Answer,
            Self::Candidate(_) => SignalKind::Candidate,
        }
    }
}

// === Client → Server payloads ===

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinLobby {
    #[validate(length(min = 1, max = 128, message = "userId must be 1-128 characters"))]
    pub user_id: String,
    #[validate(length(min = 1, max = 64, message = "userName must be 1-64 characters"))]
    pub user_name: String,
}

/// `fromUserId` / `fromUserName` are accepted for compatibility but the router
/// always substitutes the registry's view of the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCall {
    pub to_user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptCall {
    pub call_id: CallId,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectCall {
    pub call_id: CallId,
    pub from_user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCall {
    pub call_id: CallId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundSignal {
    pub to_user_id: UserId,
    pub signal: SignalPayload,
    pub call_id: CallId,
}

/// Everything a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinLobby(JoinLobby),
    LeaveLobby,
    RequestUsersUpdate,
    RequestCall(RequestCall),
    AcceptCall(AcceptCall),
    RejectCall(RejectCall),
    EndCall(EndCall),
    WebrtcSignal(OutboundSignal),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinLobby(_) => "join-lobby",
            Self::LeaveLobby => "leave-lobby",
            Self::RequestUsersUpdate => "request-users-update",
            Self::RequestCall(_) => "request-call",
            Self::AcceptCall(_) => "accept-call",
            Self::RejectCall(_) => "reject-call",
            Self::EndCall(_) => "end-call",
            Self::WebrtcSignal(_) => "webrtc-signal",
        }
    }
}

// === Server → Client payloads ===

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyWelcome {
    pub message: String,
    pub users: Vec<RosterEntry>,
    #[serde(default)]
    pub ice_servers: Vec<IceServerConfig>,
    /// How long an incoming call may ring before the client declines it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ring_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub from_user_id: UserId,
    pub from_user_name: String,
    pub call_id: CallId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequestSent {
    pub to_user_id: UserId,
    pub call_id: CallId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStarted {
    pub call_id: CallId,
    pub room_id: String,
    /// Caller first, callee second.
    pub users: Vec<RosterEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRejected {
    pub call_id: CallId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnded {
    pub call_id: CallId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDisconnected {
    pub call_id: CallId,
    pub user_id: UserId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundSignal {
    /// Filled in by the router from its registry, never copied from the sender.
    pub from_user_id: UserId,
    pub signal: SignalPayload,
    pub call_id: CallId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallError {
    pub message: String,
    #[serde(default)]
    pub code: u32,
}

/// Everything the server may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    LobbyWelcome(LobbyWelcome),
    UsersUpdate(Vec<RosterEntry>),
    IncomingCall(IncomingCall),
    CallRequestSent(CallRequestSent),
    CallStarted(CallStarted),
    CallRejected(CallRejected),
    CallEnded(CallEnded),
    PeerDisconnected(PeerDisconnected),
    WebrtcSignal(InboundSignal),
    CallError(CallError),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LobbyWelcome(_) => "lobby-welcome",
            Self::UsersUpdate(_) => "users-update",
            Self::IncomingCall(_) => "incoming-call",
            Self::CallRequestSent(_) => "call-request-sent",
            Self::CallStarted(_) => "call-started",
            Self::CallRejected(_) => "call-rejected",
            Self::CallEnded(_) => "call-ended",
            Self::PeerDisconnected(_) => "peer-disconnected",
            Self::WebrtcSignal(_) => "webrtc-signal",
            Self::CallError(_) => "call-error",
        }
    }
}
