//! Configuration management
//!
//! Layered: built-in defaults, then an optional TOML file, then
//! `LIVEDESK__SECTION__KEY` environment variables.

use crate::domain::ice::IceServer;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub calls: CallConfig,
    pub ice: IceConfig,
    pub security: SecurityConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `*` allows any origin
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    pub enabled: bool,
    pub require_room_key: bool,
    pub max_room_members: usize,
    /// 0 disables the timeout
    pub ring_timeout_secs: u64,
    /// 0 disables the timeout
    pub negotiation_timeout_secs: u64,
}

impl CallConfig {
    pub fn ring_timeout(&self) -> Option<Duration> {
        (self.ring_timeout_secs > 0).then(|| Duration::from_secs(self.ring_timeout_secs))
    }

    pub fn negotiation_timeout(&self) -> Option<Duration> {
        (self.negotiation_timeout_secs > 0)
            .then(|| Duration::from_secs(self.negotiation_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    pub stun_urls: Vec<String>,
    pub turn_url: Option<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
}

impl IceConfig {
    /// STUN entries, plus TURN when url, username and credential are all set
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let mut servers: Vec<IceServer> = self.stun_urls.iter().map(IceServer::stun).collect();

        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
        if let (Some(url), Some(username), Some(credential)) = (
            non_empty(&self.turn_url),
            non_empty(&self.turn_username),
            non_empty(&self.turn_credential),
        ) {
            servers.push(IceServer::turn(url, username, credential));
        }

        servers
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub room_key_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Websocket URL of the call relay
    pub relay_url: String,
    /// ICE configuration endpoint, fetched once per call attempt
    pub ice_servers_url: String,
    /// Name announced in `call:ring`
    pub display_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 10000,
                allowed_origins: vec!["*".to_string()],
            },
            calls: CallConfig {
                enabled: true,
                require_room_key: false,
                max_room_members: 10,
                ring_timeout_secs: 45,
                negotiation_timeout_secs: 30,
            },
            ice: IceConfig {
                stun_urls: vec!["stun:stun.l.google.com:19302".to_string()],
                turn_url: None,
                turn_username: None,
                turn_credential: None,
            },
            security: SecurityConfig {
                room_key_secret: "change-me".to_string(),
            },
            client: ClientConfig {
                relay_url: "ws://127.0.0.1:10000/call".to_string(),
                ice_servers_url: "http://127.0.0.1:10000/v1/api/ice-servers".to_string(),
                display_name: "Customer".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        let path = path
            .map(str::to_string)
            .or_else(|| std::env::var("LIVEDESK_CONFIG").ok())
            .unwrap_or_else(|| "livedesk.toml".to_string());
        builder = builder.add_source(config::File::with_name(&path).required(false));

        builder
            .add_source(
                config::Environment::with_prefix("LIVEDESK")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .with_list_parse_key("ice.stun_urls")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_requires_all_fields() {
        let mut ice = Config::default().ice;
        assert_eq!(ice.ice_servers().len(), 1);

        ice.turn_url = Some("turn:turn.example.com:3478".to_string());
        ice.turn_username = Some("user".to_string());
        assert_eq!(ice.ice_servers().len(), 1);

        ice.turn_credential = Some("pass".to_string());
        let servers = ice.ice_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].credential.as_deref(), Some("pass"));
    }

    #[test]
    fn test_zero_disables_timeouts() {
        let mut calls = Config::default().calls;
        assert_eq!(calls.ring_timeout(), Some(Duration::from_secs(45)));

        calls.ring_timeout_secs = 0;
        calls.negotiation_timeout_secs = 0;
        assert!(calls.ring_timeout().is_none());
        assert!(calls.negotiation_timeout().is_none());
    }

    #[test]
    fn test_load_defaults_without_file() {
        let config = Config::load(Some("does-not-exist.toml")).unwrap();
        assert_eq!(config.server.port, 10000);
        assert!(config.calls.enabled);
    }
}
