//! Configuration management for livecast-core

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading / validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Session manager configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Signaling channel configuration
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// WebRTC configuration
    #[serde(default)]
    pub webrtc: WebRTCConfig,

    /// Local media configuration
    #[serde(default)]
    pub media: MediaConfig,

    /// HTTP status endpoint configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Identity announced as host / chat author
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Seconds a connection may stay in negotiation before it is closed
    #[serde(default = "default_negotiation_timeout_secs")]
    pub negotiation_timeout_secs: u64,

    /// Upper bound for a single signaling send
    #[serde(default = "default_signaling_send_timeout_ms")]
    pub signaling_send_timeout_ms: u64,

    /// Upper bound for thumbnail capture at session start
    #[serde(default = "default_thumbnail_timeout_ms")]
    pub thumbnail_timeout_ms: u64,

    /// Capacity of the session event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl SessionConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    pub fn signaling_send_timeout(&self) -> Duration {
        Duration::from_millis(self.signaling_send_timeout_ms)
    }

    pub fn thumbnail_timeout(&self) -> Duration {
        Duration::from_millis(self.thumbnail_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            negotiation_timeout_secs: default_negotiation_timeout_secs(),
            signaling_send_timeout_ms: default_signaling_send_timeout_ms(),
            thumbnail_timeout_ms: default_thumbnail_timeout_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// WebSocket URL of the signaling service
    #[serde(default = "default_signaling_url")]
    pub url: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: default_signaling_url(),
        }
    }
}

/// ICE server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// WebRTC peer connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRTCConfig {
    /// Explicit ICE servers, used when no STUN/TURN host is configured
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,

    #[serde(default)]
    pub stun_host: String,

    #[serde(default = "default_stun_port")]
    pub stun_port: u16,

    #[serde(default)]
    pub turn_host: String,

    #[serde(default = "default_turn_port")]
    pub turn_port: u16,

    #[serde(default)]
    pub turn_username: String,

    #[serde(default)]
    pub turn_password: String,

    /// Use turns: instead of turn:
    #[serde(default)]
    pub turn_tls: bool,

    /// TURN transport ("udp" or "tcp")
    #[serde(default)]
    pub turn_protocol: String,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            stun_host: String::new(),
            stun_port: default_stun_port(),
            turn_host: String::new(),
            turn_port: default_turn_port(),
            turn_username: String::new(),
            turn_password: String::new(),
            turn_tls: false,
            turn_protocol: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// IVF (VP8) file standing in for the camera
    #[serde(default)]
    pub camera_file: Option<PathBuf>,

    /// Ogg (Opus) file standing in for the microphone
    #[serde(default)]
    pub mic_file: Option<PathBuf>,

    /// IVF (VP8) file standing in for screen capture; unset means unavailable
    #[serde(default)]
    pub screen_file: Option<PathBuf>,

    /// Video frame pacing in milliseconds
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Restart the camera file at EOF instead of ending the track
    #[serde(default = "default_loop_camera")]
    pub loop_camera: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            camera_file: None,
            mic_file: None,
            screen_file: None,
            frame_interval_ms: default_frame_interval_ms(),
            loop_camera: default_loop_camera(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Serve the status endpoint
    #[serde(default)]
    pub enabled: bool,

    /// HTTP bind address
    #[serde(default = "default_http_host")]
    pub host: String,

    /// HTTP port for health checks
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.identity.trim().is_empty() {
            return Err(ConfigError::Invalid("Session identity must not be empty".into()));
        }

        if self.session.negotiation_timeout_secs == 0 || self.session.negotiation_timeout_secs > 300 {
            return Err(ConfigError::Invalid(
                "Negotiation timeout must be between 1 and 300 seconds".into(),
            ));
        }

        if self.session.signaling_send_timeout_ms == 0 {
            return Err(ConfigError::Invalid("Signaling send timeout must be non-zero".into()));
        }

        if self.session.event_buffer == 0 {
            return Err(ConfigError::Invalid("Event buffer must be non-zero".into()));
        }

        if !self.signaling.url.starts_with("ws://") && !self.signaling.url.starts_with("wss://") {
            return Err(ConfigError::Invalid("Signaling URL must use ws:// or wss://".into()));
        }

        if self.media.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid("Media frame interval must be non-zero".into()));
        }

        if !self.webrtc.turn_protocol.is_empty()
            && self.webrtc.turn_protocol != "udp"
            && self.webrtc.turn_protocol != "tcp"
        {
            return Err(ConfigError::Invalid("TURN protocol must be \"udp\" or \"tcp\"".into()));
        }

        for server in &self.webrtc.ice_servers {
            if server.urls.is_empty() {
                return Err(ConfigError::Invalid("ICE server entry has no URLs".into()));
            }
        }

        if self.http.enabled && self.http.port == 0 {
            return Err(ConfigError::Invalid("HTTP port must be non-zero".into()));
        }

        Ok(())
    }
}


fn default_identity() -> String {
    "anonymous".to_string()
}

fn default_negotiation_timeout_secs() -> u64 { 20 }
fn default_signaling_send_timeout_ms() -> u64 { 2000 }
fn default_thumbnail_timeout_ms() -> u64 { 3000 }
fn default_event_buffer() -> usize { 256 }

fn default_signaling_url() -> String {
    "ws://127.0.0.1:3001/signaling".to_string()
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: None,
        credential: None,
    }]
}

fn default_stun_port() -> u16 { 3478 }
fn default_turn_port() -> u16 { 3478 }
fn default_frame_interval_ms() -> u64 { 33 }
fn default_loop_camera() -> bool { true }

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 { 8008 }

fn default_log_level() -> String {
    "info".to_string()
}
