//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config.toml > defaults

use crate::ice::IceServerConfig;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup. Later calls return the configuration
/// stored by the first one.
pub fn init(file: Option<&str>) -> Result<&'static AppConfig, config::ConfigError> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }

    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let app_config = load(file)?;
    Ok(CONFIG.get_or_init(|| app_config))
}

/// Build a configuration without touching the global slot.
pub fn load(file: Option<&str>) -> Result<AppConfig, config::ConfigError> {
    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 3000)?
        .set_default("calls.ring_timeout_secs", 30)?
        .set_default("calls.notify_peer_on_disconnect", true)?
        .set_default("calls.retired_call_id_capacity", 4096)?
        .set_default("calls.outbound_queue", 256)?
        // Optional config file
        .add_source(config::File::with_name(file.unwrap_or("config")).required(file.is_some()))
        // Environment variables (HUDDLE__SERVER__PORT, HUDDLE__CALLS__RING_TIMEOUT_SECS, etc.)
        .add_source(
            config::Environment::with_prefix("HUDDLE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    cfg.try_deserialize()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub calls: CallsConfig,
    #[serde(default)]
    pub ice: IceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CallsConfig {
    /// How long an incoming call rings before the client auto-rejects it.
    pub ring_timeout_secs: u64,
    /// Send `peer-disconnected` to the surviving participant when the other side's
    /// connection drops mid-call. When off, the survivor is left in-call until it ends
    /// the call itself.
    pub notify_peer_on_disconnect: bool,
    /// How many settled call ids the router remembers to refuse reuse.
    pub retired_call_id_capacity: usize,
    /// Per-connection outbound event queue length.
    pub outbound_queue: usize,
}

impl CallsConfig {
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 30,
            notify_peer_on_disconnect: true,
            retired_call_id_capacity: 4096,
            outbound_queue: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IceConfig {
    /// STUN/TURN servers advertised to clients in `lobby-welcome`.
    #[serde(default = "IceServerConfig::defaults")]
    pub servers: Vec<IceServerConfig>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: IceServerConfig::defaults(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_config_file() {
        let cfg = load(None).expect("defaults should deserialize");
        assert_eq!(cfg.calls.ring_timeout(), Duration::from_secs(30));
        assert!(cfg.calls.notify_peer_on_disconnect);
        assert!(!cfg.ice.servers.is_empty());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(load(Some("/nonexistent/huddle-config")).is_err());
    }
}
