//! Configuration handling for the duplex service.
//!
//! Values come from the shared config file first, then environment variables,
//! then command line flags (applied by `main`).

use anyhow::Result;
use duplex_session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Duplex service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplexConfig {
    /// Address the server side listens on
    pub listen: SocketAddr,
    /// Accept one connection and exit when its session ends
    pub single_connection: bool,
    /// Host the client side connects to
    pub host: String,
    /// Port the client side connects to
    pub port: u16,
    /// Target path announced by the client
    pub target: String,
    /// Bound on connecting to the resolved endpoints
    pub connect_timeout: Duration,
    /// Bound on the handshake
    pub handshake_timeout: Duration,
    /// Largest chunk handed out by a partial read
    pub read_chunk_size: usize,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            single_connection: false,
            host: "127.0.0.1".to_string(),
            port: 8080,
            target: "/".to_string(),
            connect_timeout: session.connect_timeout,
            handshake_timeout: session.handshake_timeout,
            read_chunk_size: session.read_chunk_size,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    duplex: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    args: Option<Vec<String>>,
    config: Option<HashMap<String, String>>,
}

impl DuplexConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => info!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_environment_overrides();

        info!(
            "Duplex configuration: listen={}, peer={}:{}{}, connect_timeout={:?}",
            config.listen, config.host, config.port, config.target, config.connect_timeout
        );

        Ok(config)
    }

    /// Session settings derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
            read_chunk_size: self.read_chunk_size,
            agent: format!("redb-duplex/{}", env!("CARGO_PKG_VERSION")),
            ..SessionConfig::default()
        }
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(service) = root_config.services.and_then(|services| services.duplex) {
            self.apply_service_config(service);
        }
    }

    fn apply_service_config(&mut self, service_config: ServiceConfig) {
        if let Some(args) = service_config.args {
            for arg in args {
                if let Some(listen) = arg.strip_prefix("--listen=") {
                    self.set("listen", listen);
                } else if let Some(target) = arg.strip_prefix("--target=") {
                    self.set("target", target);
                } else if arg == "--single" {
                    self.single_connection = true;
                }
            }
        }

        if let Some(config_map) = service_config.config {
            for (key, value) in config_map {
                match key.strip_prefix("services.duplex.") {
                    Some(name) => self.set(name, &value),
                    None => {
                        // Not ours
                    }
                }
            }
        }
    }

    /// Apply one named setting; bad values are logged and ignored
    fn set(&mut self, name: &str, value: &str) {
        let applied = match name {
            "listen" => value.parse().map(|v| self.listen = v).is_ok(),
            "single_connection" => value.parse().map(|v| self.single_connection = v).is_ok(),
            "host" => {
                self.host = value.to_string();
                true
            }
            "port" => value.parse().map(|v| self.port = v).is_ok(),
            "target" => {
                self.target = value.to_string();
                true
            }
            "connect_timeout" => humantime::parse_duration(value)
                .map(|v| self.connect_timeout = v)
                .is_ok(),
            "handshake_timeout" => humantime::parse_duration(value)
                .map(|v| self.handshake_timeout = v)
                .is_ok(),
            "read_chunk_size" => value
                .parse::<usize>()
                .ok()
                .filter(|v| *v > 0)
                .map(|v| self.read_chunk_size = v)
                .is_some(),
            _ => true,
        };
        if !applied {
            warn!("Ignoring invalid value {:?} for {}", value, name);
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        const OVERRIDES: [(&str, &str); 5] = [
            ("DUPLEX_LISTEN", "listen"),
            ("DUPLEX_HOST", "host"),
            ("DUPLEX_PORT", "port"),
            ("DUPLEX_TARGET", "target"),
            ("DUPLEX_CONNECT_TIMEOUT", "connect_timeout"),
        ];

        for (variable, name) in OVERRIDES {
            if let Some(value) = lookup(variable) {
                self.set(name, &value);
                info!("{} overridden by environment: {}", name, value);
            }
        }
    }
}
