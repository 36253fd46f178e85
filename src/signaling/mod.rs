//! Signaling channel contract
//!
//! Session control messages and WebRTC negotiation payloads travel over an
//! external, already-connected transport. This module defines the message
//! contract and the narrow [`SignalingChannel`] seam the session manager sends
//! through; inbound traffic is delivered to the manager as [`InboundEvent`]s.

pub mod websocket;

pub use websocket::WebSocketSignaling;

use crate::session::{ChatMessage, SessionInfo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("Signaling channel not connected")]
    NotConnected,
    #[error("Signaling send failed: {0}")]
    Send(String),
    #[error("Signaling send timed out")]
    Timeout,
    #[error("Invalid signaling message: {0}")]
    Codec(String),
    #[error("Signaling connect failed: {0}")]
    Connect(String),
}

/// SDP / ICE payload of a `signal` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalPayload {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        candidate: String,
        #[serde(rename = "sdpMid", default)]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex", default)]
        sdp_mline_index: Option<u16>,
    },
}

impl SignalPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::Candidate { .. } => "candidate",
        }
    }
}

/// Messages sent by the session manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundMessage {
    /// Creator starts a session
    #[serde(rename = "create_stream", rename_all = "camelCase")]
    CreateStream {
        session_id: String,
        host_identity: String,
        thumbnail_ref: Option<String>,
    },

    /// Viewer joins a session
    #[serde(rename = "join_stream", rename_all = "camelCase")]
    JoinStream {
        session_id: String,
        participant_identity: String,
    },

    #[serde(rename = "leave_stream", rename_all = "camelCase")]
    LeaveStream { session_id: String },

    #[serde(rename = "stop_stream", rename_all = "camelCase")]
    StopStream { session_id: String },

    /// SDP / ICE addressed to one participant
    #[serde(rename = "signal", rename_all = "camelCase")]
    Signal {
        to: String,
        session_id: String,
        data: SignalPayload,
    },

    #[serde(rename = "stream_message", rename_all = "camelCase")]
    Chat {
        session_id: String,
        message: ChatMessage,
    },
}

impl OutboundMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundMessage::CreateStream { .. } => "create_stream",
            OutboundMessage::JoinStream { .. } => "join_stream",
            OutboundMessage::LeaveStream { .. } => "leave_stream",
            OutboundMessage::StopStream { .. } => "stop_stream",
            OutboundMessage::Signal { .. } => "signal",
            OutboundMessage::Chat { .. } => "stream_message",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            OutboundMessage::CreateStream { session_id, .. }
            | OutboundMessage::JoinStream { session_id, .. }
            | OutboundMessage::LeaveStream { session_id }
            | OutboundMessage::StopStream { session_id }
            | OutboundMessage::Signal { session_id, .. }
            | OutboundMessage::Chat { session_id, .. } => session_id,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self)
            .map_err(|e| SignalingError::Codec(format!("Failed to serialize message: {}", e)))
    }
}

/// Messages delivered to the session manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    /// Active-session roster refresh
    #[serde(rename = "streams_updated")]
    StreamsUpdated(Vec<SessionInfo>),

    #[serde(rename = "viewer_count_update", rename_all = "camelCase")]
    ViewerCountUpdate {
        viewer_count: u32,
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Creator only
    #[serde(rename = "viewer-joined", rename_all = "camelCase")]
    ViewerJoined { viewer_socket_id: String },

    /// Creator only
    #[serde(rename = "viewer-left", rename_all = "camelCase")]
    ViewerLeft { viewer_socket_id: String },

    #[serde(rename = "signal")]
    Signal { from: String, data: SignalPayload },

    #[serde(rename = "chatMessage", alias = "stream_message")]
    Chat(ChatMessage),

    /// Forces local teardown when it names the current session
    #[serde(rename = "stream_ended", rename_all = "camelCase")]
    StreamEnded { session_id: String },

    /// Surfaced to the caller, non-fatal
    #[serde(rename = "streamError")]
    StreamError { message: String },
}

impl InboundEvent {
    /// Parse an inbound text frame.
    ///
    /// Supports both framings seen on socket-style services:
    /// - object: `{"event": "viewer-joined", "data": {...}}`
    /// - array: `["viewer-joined", {...}]`
    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| SignalingError::Codec(format!("Invalid JSON: {}", e)))?;

        let value = match value {
            Value::Array(mut parts) if !parts.is_empty() => {
                let data = if parts.len() > 1 { parts.remove(1) } else { Value::Null };
                let event = parts.remove(0);
                serde_json::json!({ "event": event, "data": data })
            }
            other => other,
        };

        serde_json::from_value(value)
            .map_err(|e| SignalingError::Codec(format!("Unrecognised event: {}", e)))
    }
}

/// Outbound half of the signaling transport.
///
/// The session manager never owns the transport lifecycle; it only sends.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), SignalingError>;
}
