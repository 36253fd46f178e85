//! livecast-core - live session orchestration
//!
//! Creator/viewer session management over WebRTC: one creator broadcasts
//! camera, microphone or screen to many viewers, with negotiation and chat
//! carried by an external signaling channel.

pub mod config;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod web;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::{Config, ConfigError};
pub use session::{ChatMessage, SessionError, SessionEvent, SessionInfo, SessionManager, SessionState};
pub use signaling::{InboundEvent, OutboundMessage, SignalingChannel};
