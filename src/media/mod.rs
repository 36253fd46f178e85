//! Local media acquisition and rendering seams
//!
//! The session manager never talks to capture devices or renderers directly.
//! It consumes:
//! - a [`MediaSource`] for camera/microphone and screen capture
//! - a [`MediaSink`] that streams are attached to / detached from on transitions
//! - an optional [`ThumbnailCapture`] for the best-effort session preview

pub mod file_source;

pub use file_source::FileMediaSource;

use async_trait::async_trait;
use log::{debug, info};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Media acquisition errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    /// The user or platform refused access (e.g. capture picker cancelled)
    #[error("Media access denied: {0}")]
    Denied(String),
    /// No such device / capture source
    #[error("Media device unavailable: {0}")]
    Unavailable(String),
    /// Reading the underlying source failed
    #[error("Media source error: {0}")]
    Source(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Camera,
    Microphone,
    Screen,
}

impl TrackSource {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TrackSource::Camera => "camera",
            TrackSource::Microphone => "mic",
            TrackSource::Screen => "screen",
        }
    }
}

struct TrackInner {
    id: String,
    source: TrackSource,
    enabled: AtomicBool,
    stopped: AtomicBool,
    ended: watch::Sender<bool>,
    local: Arc<TrackLocalStaticSample>,
}

/// A local capture track.
///
/// Cloning shares the same underlying track; the `enabled` flag is toggled in
/// place and never requires renegotiation.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl MediaTrack {
    /// Wrap an existing WebRTC sample track
    pub fn new(source: TrackSource, local: Arc<TrackLocalStaticSample>) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id: local.id().to_string(),
                source,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                ended,
                local,
            }),
        }
    }

    /// Create a track with the default codec for its source (VP8 video, Opus audio)
    pub fn for_source(source: TrackSource, stream_id: &str) -> Self {
        let capability = match source.kind() {
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
        };
        let local = TrackLocalStaticSample::new(
            capability,
            format!("{}-{}", source.label(), uuid::Uuid::new_v4()),
            stream_id.to_string(),
        );
        Self::new(source, Arc::new(local))
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.source.kind()
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Relaxed)
    }

    /// Stop the track; pumps feeding it exit and it counts as ended.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::Relaxed) {
            debug!("Track {} stopped", self.inner.id);
        }
        self.inner.ended.send_replace(true);
    }

    /// The platform ended the track on its own (e.g. capture ended by the user)
    pub fn mark_ended(&self) {
        self.inner.ended.send_replace(true);
    }

    pub fn has_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Resolve once the track has ended, for whatever reason
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// The WebRTC track fed by this capture source
    pub fn local(&self) -> Arc<TrackLocalStaticSample> {
        self.inner.local.clone()
    }

    /// Two handles refer to the same underlying track
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A group of local tracks acquired together
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| !t.is_stopped()).count()
    }
}

/// Description of a track received from the remote side
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Media received from the host, as seen by a viewer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteStream {
    pub tracks: Vec<RemoteTrackInfo>,
}

impl RemoteStream {
    /// Record a track; returns false if it was already known
    pub fn add_track(&mut self, track: RemoteTrackInfo) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }
}

/// Where a stream is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkSlot {
    /// Main local preview (camera, or screen while sharing)
    Main,
    /// Secondary camera bubble shown while screen sharing
    Bubble,
    /// Remote stream on the viewer side
    Remote,
}

#[derive(Debug, Clone)]
pub enum StreamHandle {
    Local(MediaStream),
    Remote(RemoteStream),
}

/// Rendering side; invoked directly by session transitions
pub trait MediaSink: Send + Sync {
    fn attach(&self, slot: SinkSlot, stream: StreamHandle);
    fn detach(&self, slot: SinkSlot);
}

/// Sink that renders nothing
pub struct NullSink;

impl MediaSink for NullSink {
    fn attach(&self, _slot: SinkSlot, _stream: StreamHandle) {}
    fn detach(&self, _slot: SinkSlot) {}
}

/// Sink that only logs attachments; used by the CLI
pub struct LogSink;

impl MediaSink for LogSink {
    fn attach(&self, slot: SinkSlot, stream: StreamHandle) {
        match stream {
            StreamHandle::Local(stream) => {
                info!("Attached local stream {} ({} tracks) to {:?}", stream.id, stream.tracks.len(), slot)
            }
            StreamHandle::Remote(stream) => {
                info!("Attached remote stream ({} tracks) to {:?}", stream.tracks.len(), slot)
            }
        }
    }

    fn detach(&self, slot: SinkSlot) {
        info!("Detached {:?}", slot);
    }
}

/// Camera/microphone and screen capture provider
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire one audio and one camera video track
    async fn acquire_camera_mic(&self) -> Result<MediaStream, MediaError>;

    /// Acquire a screen capture video track
    async fn acquire_screen(&self) -> Result<MediaStream, MediaError>;

    /// Release a previously acquired stream
    async fn release(&self, stream: &MediaStream) {
        stream.stop_all();
    }
}

/// Best-effort preview image producer
#[async_trait]
pub trait ThumbnailCapture: Send + Sync {
    /// Grab a frame from the stream and return a reference to the stored image
    async fn capture(&self, stream: &MediaStream) -> Result<String, MediaError>;
}
