//! NAT-traversal relay configuration (STUN/TURN) handed to peer connections.

use serde::{Deserialize, Serialize};

/// ICE server entry, shaped like the browser's `RTCIceServer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// Public STUN servers plus the open metered.ca TURN relay.
    /// Deployments should override these with their own TURN credentials.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::stun("stun:stun.l.google.com:19302"),
            Self::stun("stun:global.stun.twilio.com:3478"),
            Self::stun("stun:stun.1.google.com:19302"),
            Self::stun("stun:stun.relay.metered.ca:80"),
            Self::stun("stun:stun.nextcloud.com:443"),
            Self::turn("turn:relay.metered.ca:80", "public", "public"),
            Self::turn("turn:relay.metered.ca:443", "public", "public"),
            Self::turn("turn:relay.metered.ca:443?transport=tcp", "public", "public"),
        ]
    }

    pub fn is_relay(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_stun_and_turn() {
        let servers = IceServerConfig::defaults();
        assert!(servers.iter().any(|s| !s.is_relay()));
        assert!(servers.iter().filter(|s| s.is_relay()).all(|s| s.credential.is_some()));
    }

    #[test]
    fn stun_entry_omits_credentials_on_the_wire() {
        let json = serde_json::to_value(IceServerConfig::stun("stun:example.org")).unwrap();
        assert_eq!(json, serde_json::json!({ "urls": ["stun:example.org"] }));
    }
}
