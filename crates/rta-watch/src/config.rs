//! Watcher configuration.
//!
//! Loaded from the first `rta.toml` found on the search path, or from the
//! file named by `RTA_CONFIG`. Connection defaults come from `RTA_URL` and
//! `RTA_TOKEN`.

use anyhow::{Context, Result};
use rta_core::{ConnConfig, Dialer};
use rta_protocol::{Codec, DEFAULT_URL};
use rta_transport::WebSocketConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Watcher configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Resource URIs to subscribe to on startup.
    #[serde(default)]
    pub subscriptions: Vec<String>,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Service endpoint.
    #[serde(default = "default_url")]
    pub url: String,

    /// Authorization header value.
    #[serde(default = "default_token")]
    pub token: Option<String>,

    /// Wire encoding.
    #[serde(default)]
    pub codec: Codec,

    /// Handshake timeout in milliseconds; 0 waits indefinitely.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_url() -> String {
    std::env::var("RTA_URL").unwrap_or_else(|_| DEFAULT_URL.to_string())
}

fn default_token() -> Option<String> {
    std::env::var("RTA_TOKEN").ok().filter(|t| !t.is_empty())
}

fn default_handshake_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: default_token(),
            codec: Codec::default(),
            handshake_timeout_ms: default_handshake_timeout(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("RTA_CONFIG") {
            return Self::from_file(shellexpand::tilde(&path).as_ref());
        }

        let config_paths = ["rta.toml", "/etc/rta/rta.toml", "~/.config/rta/rta.toml"];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Build a dialer for the configured connection.
    #[must_use]
    pub fn dialer(&self) -> Dialer {
        let connection = &self.connection;
        let websocket = WebSocketConfig {
            url: connection.url.clone(),
            token: connection.token.clone(),
            codec: connection.codec,
            max_message_size: connection.max_message_size,
            ..WebSocketConfig::default()
        };
        let conn = ConnConfig {
            handshake_timeout: match connection.handshake_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        };
        Dialer::new(websocket, conn)
    }
}
