//! TOML configuration for the GhostWire server and client binaries, plus
//! the port-mapping string parser used by the client's `[tunnels]` section.

mod error;
mod port_mapping;
mod settings;

pub use error::ConfigError;
pub use port_mapping::{parse_port_mapping, PortMappingError};
pub use settings::{ClientConfig, LoggingSection, ReconnectSection, ServerConfig};
