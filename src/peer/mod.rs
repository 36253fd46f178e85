//! Peer connection layer
//!
//! This module provides:
//! - the [`PeerConnector`] / [`PeerConnection`] seam over a WebRTC stack
//! - typed [`PeerEvent`]s replacing callback-driven state mutation
//! - the [`PeerRegistry`] owning every participant connection
//! - a `webrtc`-crate backed implementation in [`rtc`]

pub mod registry;
pub mod rtc;

pub use registry::{AnswerOutcome, CandidateOutcome, ConnectionState, ParticipantConnection, PeerRegistry, ReplaceSummary, SentTracks};
pub use rtc::RtcPeerConnector;

use crate::media::{MediaTrack, RemoteTrackInfo};
use crate::signaling::SignalPayload;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Remote id used by a viewer for its single connection to the host
pub const HOST_PEER_ID: &str = "host";

/// Peer connection errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerError {
    /// Peer connection creation failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// SDP processing failed
    #[error("SDP error: {0}")]
    Sdp(String),
    /// ICE candidate processing failed
    #[error("ICE error: {0}")]
    Ice(String),
    /// Track attach / replace failed
    #[error("Media error: {0}")]
    Media(String),
}

/// An ICE candidate as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl From<IceCandidate> for SignalPayload {
    fn from(c: IceCandidate) -> Self {
        SignalPayload::Candidate {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
        }
    }
}

/// Transport-level connection state reported by the WebRTC stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// The connection cannot carry media anymore
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportState::Failed | TransportState::Closed)
    }
}

/// What the local end of a connection does with media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Creator side: sends audio + video, makes the offer
    Publisher,
    /// Viewer side: receives, answers
    Subscriber,
}

/// Events raised by a connection, delivered to the session manager
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local ICE candidate was gathered and must be forwarded
    LocalCandidate(IceCandidate),
    /// A remote media track arrived
    RemoteTrack(RemoteTrackInfo),
    /// Transport state changed
    Transport(TransportState),
}

/// A [`PeerEvent`] tagged with the connection it came from.
///
/// `generation` distinguishes a torn-down connection from a newer one to the
/// same remote, so late callbacks are recognised as stray.
#[derive(Debug, Clone)]
pub struct TaggedPeerEvent {
    pub remote_id: String,
    pub generation: u64,
    pub event: PeerEvent,
}

/// Handle given to a connection for raising events
#[derive(Debug, Clone)]
pub struct PeerLink {
    pub remote_id: String,
    pub generation: u64,
    pub role: PeerRole,
    events: mpsc::UnboundedSender<TaggedPeerEvent>,
}

impl PeerLink {
    pub fn new(
        remote_id: String,
        generation: u64,
        role: PeerRole,
        events: mpsc::UnboundedSender<TaggedPeerEvent>,
    ) -> Self {
        Self {
            remote_id,
            generation,
            role,
            events,
        }
    }

    /// Raise an event; dropped silently once the manager is gone
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(TaggedPeerEvent {
            remote_id: self.remote_id.clone(),
            generation: self.generation,
            event,
        });
    }
}

/// Factory for peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, link: PeerLink) -> Result<Arc<dyn PeerConnection>, PeerError>;
}

/// One WebRTC peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach a local track for sending
    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError>;

    /// Create an SDP offer and set it as the local description
    async fn create_offer(&self) -> Result<String, PeerError>;

    /// Apply a remote offer, then create and set the local answer
    async fn accept_offer(&self, sdp: &str) -> Result<String, PeerError>;

    /// Apply a remote answer
    async fn accept_answer(&self, sdp: &str) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError>;

    /// Swap the outgoing video track in place, without renegotiation
    async fn replace_video_track(&self, track: &MediaTrack) -> Result<(), PeerError>;

    async fn close(&self) -> Result<(), PeerError>;
}
