//! Session management
//!
//! This module provides:
//! - the session state machine ([`SessionState`])
//! - the [`SessionManager`] orchestrating media, peer connections and signaling
//! - chat and roster bookkeeping
//! - [`SessionEvent`] notifications for the surrounding application

mod chat;
mod info;
mod local_media;
mod manager;
mod state;

#[cfg(test)]
mod tests;

pub use chat::{ChatLog, ChatMessage, SYSTEM_AUTHOR};
pub use info::SessionInfo;
pub use local_media::{LocalMediaState, MediaFlags};
pub use manager::{ConnectionSummary, ManagerMetrics, SessionManager, SessionSnapshot};
pub use state::SessionState;

use crate::media::{MediaError, RemoteStream};
use crate::peer::{ConnectionState, PeerError};
use thiserror::Error;

/// Session manager errors
///
/// None of these are fatal; every variant except `AlreadyInSession` leaves the
/// manager in a consistent state from which the caller may retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Camera/mic/screen denied or unavailable
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaError),

    /// Not in the last known active-session list
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Already in a session")]
    AlreadyInSession,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Best-effort; never blocks local transitions
    #[error("Signaling delivery failed: {0}")]
    SignalingDelivery(String),

    /// A connection never completed negotiation
    #[error("Negotiation with {0} stalled")]
    NegotiationStalled(String),

    #[error("Chat message is empty")]
    EmptyChatMessage,

    #[error("Peer connection error: {0}")]
    Peer(#[from] PeerError),
}

/// Notifications emitted by the session manager
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    SessionStarted(SessionInfo),
    SessionEnded {
        session_id: String,
        reason: String,
    },
    ViewerCount(u32),
    Chat(ChatMessage),
    ConnectionStateChanged {
        remote_id: String,
        state: ConnectionState,
    },
    ConnectionClosed {
        remote_id: String,
    },
    /// The remote stream gained a track (viewer)
    RemoteStreamReady(RemoteStream),
    MediaStateChanged(MediaFlags),
    /// Active-session roster replaced; carries the new size
    RosterUpdated(usize),
    /// `streamError` from the signaling service
    StreamError {
        message: String,
    },
    Error(SessionError),
}
