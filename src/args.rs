use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use livecast_core::config::{self, ConfigError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Start a session and broadcast camera/mic
    Host,
    /// Join an existing session
    Watch,
}

#[derive(Parser, Debug)]
#[command(name = "livecast-core")]
#[command(author = "Livecast Team")]
#[command(version = "0.1.0")]
#[command(about = "Live session core: WebRTC creator/viewer orchestration", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "livecast.toml")]
    pub config: PathBuf,

    /// Host a session or watch one
    #[arg(short, long, value_enum, default_value = "host")]
    pub role: Role,

    /// Session id to join (watch role)
    #[arg(short, long)]
    pub session: Option<String>,

    /// Identity announced to the signaling service
    #[arg(short, long)]
    pub identity: Option<String>,

    /// Signaling WebSocket URL
    #[arg(long)]
    pub signaling_url: Option<String>,

    /// Enable the HTTP status endpoint on this port
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, ConfigError> {
        config::Config::load(&self.config)
    }

    /// Apply command line overrides on top of the loaded configuration
    pub fn apply_overrides(&self, config: &mut config::Config) {
        if let Some(identity) = &self.identity {
            config.session.identity = identity.clone();
        }
        if let Some(url) = &self.signaling_url {
            config.signaling.url = url.clone();
        }
        if let Some(port) = self.http_port {
            config.http.enabled = true;
            config.http.port = port;
        }
    }
}
