use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WebradarConfig {
    pub relay: RelayConfig,
    pub viewer: ViewerConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RelayConfig {
    /// IP address to bind to
    #[serde(default = "default_relay_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// The only path that accepts websocket upgrades
    #[serde(default = "default_relay_path")]
    pub path: String,

    /// Shared secret expected in the `key` query parameter (empty = open)
    #[serde(default)]
    pub key: String,

    /// Relay a message back to the peer that sent it
    #[serde(default)]
    pub echo_to_sender: bool,

    /// Seconds between liveness pings
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,

    /// Minimum spacing between relayed messages in ms (0 disables coalescing)
    #[serde(default)]
    pub coalesce_interval_ms: u64,

    /// Outbound messages buffered per peer before sends to it are dropped
    #[serde(default = "default_peer_queue_capacity")]
    pub peer_queue_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ViewerConfig {
    /// Relay websocket endpoint, without the key
    #[serde(default = "default_viewer_endpoint")]
    pub endpoint: String,

    /// Shared secret sent as the `key` query parameter (empty = none)
    #[serde(default)]
    pub key: String,

    /// Abort a connection attempt that has not opened within this many ms
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Backoff base delay in ms
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling in ms
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Largest exponent applied to the base delay
    #[serde(default = "default_backoff_max_exponent")]
    pub backoff_max_exponent: u32,

    /// Inter-arrival samples averaged into the latency estimate
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,

    /// Directory holding `<map>/data.json` calibration files
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Persisted radar settings blob
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RenderConfig {
    /// How team affiliation affects colour, names and health circles
    #[serde(default)]
    pub team_policy: TeamPolicy,

    /// Drop per-entity render state after this many frames without the id
    #[serde(default = "default_entity_eviction_frames")]
    pub entity_eviction_frames: u32,

    /// Viewport size used when the rendering layer has not measured one
    #[serde(default = "default_viewport")]
    pub viewport: (u32, u32),
}

/// Team-affiliation policy for rendering.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TeamPolicy {
    /// Only the perspective team counts as friendly
    #[default]
    LocalTeam,
    /// Every entity is rendered as an enemy
    Uniform,
}

impl TeamPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamPolicy::LocalTeam => "local_team",
            TeamPolicy::Uniform => "uniform",
        }
    }
}

impl RelayConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// `None` when coalescing is disabled
    pub fn coalesce_interval(&self) -> Option<Duration> {
        (self.coalesce_interval_ms > 0).then(|| Duration::from_millis(self.coalesce_interval_ms))
    }

    pub fn requires_key(&self) -> bool {
        !self.key.is_empty()
    }
}

impl ViewerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl WebradarConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("webradar.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("relay.ip", default_relay_ip())?
            .set_default("relay.port", default_relay_port())?
            .set_default("relay.path", default_relay_path())?
            .set_default("relay.key", "")?
            .set_default("relay.echo_to_sender", false)?
            .set_default(
                "relay.heartbeat_interval_seconds",
                default_heartbeat_interval(),
            )?
            .set_default("relay.coalesce_interval_ms", 0u64)?
            .set_default(
                "relay.peer_queue_capacity",
                default_peer_queue_capacity() as u64,
            )?
            .set_default("viewer.endpoint", default_viewer_endpoint())?
            .set_default("viewer.key", "")?
            .set_default("viewer.connect_timeout_ms", default_connect_timeout_ms())?
            .set_default("viewer.backoff_base_ms", default_backoff_base_ms())?
            .set_default("viewer.backoff_max_ms", default_backoff_max_ms())?
            .set_default(
                "viewer.backoff_max_exponent",
                default_backoff_max_exponent(),
            )?
            .set_default("viewer.latency_window", default_latency_window() as u64)?
            .set_default("viewer.data_dir", default_data_dir())?
            .set_default("viewer.settings_path", default_settings_path())?
            .set_default("render.team_policy", TeamPolicy::default().as_str())?
            .set_default(
                "render.entity_eviction_frames",
                default_entity_eviction_frames(),
            )?
            .set_default(
                "render.viewport",
                vec![default_viewport().0, default_viewport().1],
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // WEBRADAR_RELAY__KEY, WEBRADAR_VIEWER__ENDPOINT, ...
            .add_source(
                Environment::with_prefix("WEBRADAR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: WebradarConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.port == 0 {
            return Err(ConfigError::Message(
                "Relay port must be greater than 0".to_string(),
            ));
        }

        if !self.relay.path.starts_with('/') || self.relay.path.len() < 2 {
            return Err(ConfigError::Message(format!(
                "Relay path must be an absolute, non-root path (got '{}')",
                self.relay.path
            )));
        }

        if self.relay.heartbeat_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Relay heartbeat_interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.relay.peer_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Relay peer_queue_capacity must be greater than 0".to_string(),
            ));
        }

        if !(self.viewer.endpoint.starts_with("ws://") || self.viewer.endpoint.starts_with("wss://"))
        {
            return Err(ConfigError::Message(format!(
                "Viewer endpoint must use ws:// or wss:// (got '{}')",
                self.viewer.endpoint
            )));
        }

        if self.viewer.connect_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Viewer connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.viewer.backoff_base_ms == 0 || self.viewer.backoff_base_ms > self.viewer.backoff_max_ms
        {
            return Err(ConfigError::Message(
                "Viewer backoff_base_ms must be in 1..=backoff_max_ms".to_string(),
            ));
        }

        if self.viewer.latency_window == 0 {
            return Err(ConfigError::Message(
                "Viewer latency_window must be greater than 0".to_string(),
            ));
        }

        if self.render.entity_eviction_frames == 0 {
            return Err(ConfigError::Message(
                "Render entity_eviction_frames must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for WebradarConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig {
                ip: default_relay_ip(),
                port: default_relay_port(),
                path: default_relay_path(),
                key: String::new(),
                echo_to_sender: false,
                heartbeat_interval_seconds: default_heartbeat_interval(),
                coalesce_interval_ms: 0,
                peer_queue_capacity: default_peer_queue_capacity(),
            },
            viewer: ViewerConfig {
                endpoint: default_viewer_endpoint(),
                key: String::new(),
                connect_timeout_ms: default_connect_timeout_ms(),
                backoff_base_ms: default_backoff_base_ms(),
                backoff_max_ms: default_backoff_max_ms(),
                backoff_max_exponent: default_backoff_max_exponent(),
                latency_window: default_latency_window(),
                data_dir: default_data_dir(),
                settings_path: default_settings_path(),
            },
            render: RenderConfig {
                team_policy: TeamPolicy::default(),
                entity_eviction_frames: default_entity_eviction_frames(),
                viewport: default_viewport(),
            },
        }
    }
}

// Default value functions
fn default_relay_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_relay_port() -> u16 {
    22006
}
fn default_relay_path() -> String {
    "/cs2_webradar".to_string()
}
fn default_heartbeat_interval() -> u64 {
    25
}
fn default_peer_queue_capacity() -> usize {
    64
}

fn default_viewer_endpoint() -> String {
    "ws://localhost:22006/cs2_webradar".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    15000
}
fn default_backoff_max_exponent() -> u32 {
    6
}
fn default_latency_window() -> usize {
    10
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_settings_path() -> String {
    "radar_settings.json".to_string()
}

fn default_entity_eviction_frames() -> u32 {
    64
}
fn default_viewport() -> (u32, u32) {
    (1024, 1024)
}
