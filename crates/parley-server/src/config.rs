//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (PARLEY_HOST, PARLEY_PORT)
//! - TOML configuration file
//! - The `--config` command line flag

use anyhow::{Context, Result};
use parley_core::{HandlerConfig, RouterConfig};
use parley_protocol::FrameCodec;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Per-connection deadlines.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Router tuning.
    #[serde(default)]
    pub router: RouterSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum frame size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Capacity of each user's inbound channel.
    #[serde(default = "default_channel_capacity")]
    pub inbound_capacity: usize,

    /// Capacity of each user's outbound channel. Messages beyond it are dropped.
    #[serde(default = "default_channel_capacity")]
    pub outbound_capacity: usize,
}

/// Connection deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Time a client has to identify, in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Idle read deadline in milliseconds. Zero disables it.
    #[serde(default)]
    pub idle_timeout_ms: u64,
}

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    /// Capacity of the router's event queue.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// How often router statistics are sampled, in milliseconds.
    #[serde(default = "default_report_interval")]
    pub report_interval_ms: u64,
}

// Default value functions
fn default_host() -> String {
    std::env::var("PARLEY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("PARLEY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_frame_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_channel_capacity() -> usize {
    64
}

fn default_handshake_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_event_capacity() -> usize {
    1024
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_report_interval() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            limits: LimitsConfig::default(),
            connection: ConnectionConfig::default(),
            router: RouterSection::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
            inbound_capacity: default_channel_capacity(),
            outbound_capacity: default_channel_capacity(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout(),
            idle_timeout_ms: 0,
        }
    }
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            report_interval_ms: default_report_interval(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, the default paths, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// an explicit path cannot be read.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
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

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Frame codec honoring the configured size limit.
    #[must_use]
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::with_max_frame_size(self.limits.max_frame_size)
    }

    /// Router settings.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            event_capacity: self.router.event_capacity,
        }
    }

    /// Per-connection handler settings.
    #[must_use]
    pub fn handler_config(&self) -> HandlerConfig {
        let idle_timeout = match self.connection.idle_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        HandlerConfig {
            handshake_timeout: Duration::from_millis(self.connection.handshake_timeout_ms),
            idle_timeout,
            inbound_capacity: self.limits.inbound_capacity,
            outbound_capacity: self.limits.outbound_capacity,
        }
    }
}
