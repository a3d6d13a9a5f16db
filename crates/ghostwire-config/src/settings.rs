use std::path::Path;

use ghostwire_core::{PortMapping, ReconnectConfig};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::port_mapping::parse_port_mapping;

fn default_websocket_path() -> String {
    "/ws".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    pub token: String,
}

/// The `[server]` table as it appears in the server's own config file: the
/// address it binds and the path it expects the WebSocket upgrade on.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerListenSection {
    pub listen_host: String,
    pub listen_port: u16,
    #[serde(default = "default_websocket_path")]
    pub websocket_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub server: ServerListenSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&raw)?;
        if config.auth.token.is_empty() {
            return Err(ConfigError::Invalid("auth.token must not be empty".into()));
        }
        Ok(config)
    }

    /// The canonical carrier URL this server derives its session key from.
    /// Operators must give the client an identical URL string (scheme,
    /// host, port and path) in its own `[server]` table; a server bound to
    /// `0.0.0.0` for convenience should set `listen_host` to its public
    /// hostname instead, since that string is hashed directly into the key.
    pub fn carrier_url(&self) -> String {
        format!(
            "ws://{}:{}{}",
            self.server.listen_host, self.server.listen_port, self.server.websocket_path
        )
    }
}

/// The `[server]` table as it appears in the client's config file: the
/// single URL it dials, which must match the server's [`ServerConfig::carrier_url`]
/// byte-for-byte.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientServerSection {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelsSection {
    pub ports: Vec<String>,
}

fn default_initial_delay() -> f64 {
    1.0
}
fn default_max_delay() -> f64 {
    30.0
}
fn default_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSection {
    #[serde(default = "default_initial_delay")]
    pub initial_delay: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        ReconnectConfig {
            initial_delay: std::time::Duration::from_secs_f64(section.initial_delay),
            max_delay: std::time::Duration::from_secs_f64(section.max_delay),
            multiplier: section.multiplier,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub server: ClientServerSection,
    pub auth: AuthSection,
    pub tunnels: TunnelsSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&raw)?;
        if config.auth.token.is_empty() {
            return Err(ConfigError::Invalid("auth.token must not be empty".into()));
        }
        if config.tunnels.ports.is_empty() {
            return Err(ConfigError::Invalid(
                "tunnels.ports must contain at least one mapping".into(),
            ));
        }
        Ok(config)
    }

    /// Expands every `[tunnels] ports` entry into concrete port mappings.
    pub fn port_mappings(&self) -> Result<Vec<PortMapping>, ConfigError> {
        let mut mappings = Vec::new();
        for spec in &self.tunnels.ports {
            mappings.extend(parse_port_mapping(spec)?);
        }
        Ok(mappings)
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        (&self.reconnect).into()
    }
}
