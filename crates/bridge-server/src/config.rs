//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (MBRIDGE_*)
//! - TOML configuration file
//! - `--config <path>` on the command line

use anyhow::{Context, Result};
use mbridge_protocol::topic::{DEFAULT_COMMAND_ROOT, DEFAULT_STATUS_ROOT};
use mbridge_protocol::TopicCodec;
use mbridge_transport::MqttConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::media::ExternalCommand;
use crate::mixer::DeviceSeed;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Message bus configuration.
    #[serde(default)]
    pub mqtt: MqttSection,

    /// Push channel configuration.
    #[serde(default)]
    pub push: PushConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Local audio mixer.
    #[serde(default)]
    pub mixer: MixerConfig,

    /// Local media control commands.
    #[serde(default)]
    pub media: MediaConfig,
}

/// MQTT configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSection {
    /// Connect to a broker. When off, commands go to an in-memory bus and
    /// nothing is ingested.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Broker host.
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Optional username.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password.
    #[serde(default)]
    pub password: Option<String>,

    /// Keep-alive in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Root of producer status topics.
    #[serde(default = "default_status_root")]
    pub status_root: String,

    /// Root of producer command topics.
    #[serde(default = "default_command_root")]
    pub command_root: String,

    /// QoS for subscriptions and publishes.
    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Request and inbound channel capacity.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Pause between event loop polls after an error, in milliseconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

/// Push channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Frames queued per connection before it is dropped.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
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
}

/// Audio mixer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MixerConfig {
    /// Devices exposed by the in-memory mixer.
    #[serde(default)]
    pub devices: Vec<DeviceSeed>,
}

/// Media control configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Action name -> program to run.
    #[serde(default)]
    pub commands: BTreeMap<String, ExternalCommand>,

    /// Program printing the current track as JSON.
    #[serde(default)]
    pub now_playing: Option<ExternalCommand>,
}

// Default value functions
fn default_host() -> String {
    std::env::var("MBRIDGE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn default_port() -> u16 {
    std::env::var("MBRIDGE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5000)
}

fn default_true() -> bool {
    true
}

fn default_mqtt_host() -> String {
    std::env::var("MBRIDGE_MQTT_HOST").unwrap_or_else(|_| "localhost".to_string())
}

fn default_mqtt_port() -> u16 {
    std::env::var("MBRIDGE_MQTT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(1883)
}

fn default_client_id() -> String {
    "mbridge".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_status_root() -> String {
    DEFAULT_STATUS_ROOT.to_string()
}

fn default_command_root() -> String {
    DEFAULT_COMMAND_ROOT.to_string()
}

fn default_qos() -> u8 {
    1
}

fn default_channel_capacity() -> usize {
    256
}

fn default_reconnect_delay() -> u64 {
    1_000
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_send_buffer() -> usize {
    64
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mqtt: MqttSection::default(),
            push: PushConfig::default(),
            metrics: MetricsConfig::default(),
            mixer: MixerConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            status_root: default_status_root(),
            command_root: default_command_root(),
            qos: default_qos(),
            channel_capacity: default_channel_capacity(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            send_buffer: default_send_buffer(),
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

impl MqttSection {
    /// Topic codec for the configured roots.
    #[must_use]
    pub fn topics(&self) -> TopicCodec {
        TopicCodec::new(self.status_root.clone(), self.command_root.clone())
    }

    /// Client settings for the MQTT adapter.
    #[must_use]
    pub fn client_config(&self) -> MqttConfig {
        let credentials = match (&self.username, &self.password) {
            (Some(user), pass) => Some((user.clone(), pass.clone().unwrap_or_default())),
            (None, _) => None,
        };

        MqttConfig {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            credentials,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            qos: self.qos,
            channel_capacity: self.channel_capacity,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            subscriptions: self.topics().status_filters().to_vec(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "mbridge.toml",
            "/etc/mbridge/mbridge.toml",
            "~/.config/mbridge/mbridge.toml",
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
}
