//! `webrtc`-crate backed peer connections
//!
//! Callbacks registered on the [`RTCPeerConnection`] never touch session state;
//! they only raise [`PeerEvent`]s through the connection's [`PeerLink`].

use super::{IceCandidate, PeerConnection, PeerConnector, PeerError, PeerEvent, PeerLink, PeerRole, TransportState};
use crate::config::{IceServerConfig, WebRTCConfig};
use crate::media::{MediaTrack, RemoteTrackInfo, TrackKind};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

impl From<RTCPeerConnectionState> for TransportState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New => TransportState::New,
            RTCPeerConnectionState::Connecting => TransportState::Connecting,
            RTCPeerConnectionState::Connected => TransportState::Connected,
            RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
            RTCPeerConnectionState::Failed => TransportState::Failed,
            RTCPeerConnectionState::Closed => TransportState::Closed,
            _ => TransportState::New,
        }
    }
}

/// Creates [`RTCPeerConnection`]s with the configured ICE servers
pub struct RtcPeerConnector {
    config: WebRTCConfig,
}

impl RtcPeerConnector {
    pub fn new(config: WebRTCConfig) -> Self {
        Self { config }
    }

    async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerError::ConnectionFailed(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| PeerError::ConnectionFailed(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = build_ice_servers(&self.config)
            .into_iter()
            .map(|server| RTCIceServer {
                urls: server.urls,
                username: server.username.unwrap_or_default(),
                credential: server.credential.unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| PeerError::ConnectionFailed(format!("Failed to create peer connection: {}", e)))?;

        Ok(Arc::new(peer_connection))
    }
}

#[async_trait]
impl PeerConnector for RtcPeerConnector {
    async fn connect(&self, link: PeerLink) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let pc = self.create_peer_connection().await?;
        register_callbacks(&pc, &link);

        if link.role == PeerRole::Subscriber {
            for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
                let init = RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: Vec::new(),
                };
                pc.add_transceiver_from_kind(kind, Some(init))
                    .await
                    .map_err(|e| PeerError::Media(format!("Failed to add {} transceiver: {}", kind, e)))?;
            }
        }

        debug!("Peer connection to {} created ({:?})", link.remote_id, link.role);
        Ok(Arc::new(RtcPeerConnection {
            pc,
            video_sender: Mutex::new(None),
        }))
    }
}

fn register_callbacks(pc: &Arc<RTCPeerConnection>, link: &PeerLink) {
    let state_link = link.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let link = state_link.clone();
        Box::pin(async move {
            info!("Peer {} transport state: {}", link.remote_id, state);
            link.emit(PeerEvent::Transport(state.into()));
        })
    }));

    let ice_link = link.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let link = ice_link.clone();
        Box::pin(async move {
            // None marks the end of gathering
            let Some(candidate) = candidate else { return };
            match candidate.to_json() {
                Ok(init) => link.emit(PeerEvent::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                })),
                Err(e) => warn!("Cannot serialize local candidate for {}: {}", link.remote_id, e),
            }
        })
    }));

    let track_link = link.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            let link = track_link.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                link.emit(PeerEvent::RemoteTrack(RemoteTrackInfo {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                }));

                // Keep packets flowing through the interceptors; rendering is the sink's job
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                });
            })
        },
    ));
}

/// Read incoming RTCP so interceptors (NACK, reports) keep working
fn drain_rtcp(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move { while sender.read_rtcp().await.is_ok() {} });
}

struct RtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError> {
        let local: Arc<dyn TrackLocal + Send + Sync> = track.local();
        let sender = self
            .pc
            .add_track(local)
            .await
            .map_err(|e| PeerError::Media(format!("Failed to add track {}: {}", track.id(), e)))?;

        if track.kind() == TrackKind::Video {
            *self.video_sender.lock() = Some(sender.clone());
        }
        drain_rtcp(sender);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, PeerError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to set local description: {}", e)))?;

        Ok(offer.sdp)
    }

    async fn accept_offer(&self, sdp: &str) -> Result<String, PeerError> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| PeerError::Sdp(format!("Invalid SDP offer: {}", e)))?;

        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to set remote description: {}", e)))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to create answer: {}", e)))?;

        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to set local description: {}", e)))?;

        Ok(answer.sdp)
    }

    async fn accept_answer(&self, sdp: &str) -> Result<(), PeerError> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| PeerError::Sdp(format!("Invalid SDP answer: {}", e)))?;

        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| PeerError::Ice(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn replace_video_track(&self, track: &MediaTrack) -> Result<(), PeerError> {
        let sender = self
            .video_sender
            .lock()
            .clone()
            .ok_or_else(|| PeerError::Media("No outgoing video sender".to_string()))?;

        let local: Arc<dyn TrackLocal + Send + Sync> = track.local();
        sender
            .replace_track(Some(local))
            .await
            .map_err(|e| PeerError::Media(format!("Failed to replace video track: {}", e)))
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.video_sender.lock().take();
        self.pc
            .close()
            .await
            .map_err(|e| PeerError::ConnectionFailed(format!("Failed to close connection: {}", e)))
    }
}

/// Explicit STUN/TURN settings take precedence over the `ice_servers` list
fn build_ice_servers(config: &WebRTCConfig) -> Vec<IceServerConfig> {
    let mut servers = Vec::new();

    if !config.stun_host.is_empty() && config.stun_port != 0 {
        servers.push(IceServerConfig {
            urls: vec![format!("stun:{}:{}", config.stun_host, config.stun_port)],
            username: None,
            credential: None,
        });
    }

    if !config.turn_host.is_empty() {
        let scheme = if config.turn_tls { "turns" } else { "turn" };
        let transport = if config.turn_protocol.is_empty() {
            "udp"
        } else {
            config.turn_protocol.as_str()
        };
        let (username, credential) = if !config.turn_username.is_empty() && !config.turn_password.is_empty() {
            (Some(config.turn_username.clone()), Some(config.turn_password.clone()))
        } else {
            (None, None)
        };

        servers.push(IceServerConfig {
            urls: vec![format!(
                "{}:{}:{}?transport={}",
                scheme, config.turn_host, config.turn_port, transport
            )],
            username,
            credential,
        });
    }

    if servers.is_empty() {
        return config.ice_servers.clone();
    }
    servers
}
