//! Session Manager
//!
//! Serializes every public operation, inbound signaling event and peer event
//! on one state lock. WebRTC callbacks only enqueue [`TaggedPeerEvent`]s; they
//! are applied here by [`SessionManager::process_pending_events`] or the
//! [`SessionManager::run`] loop.

use super::chat::ChatLog;
use super::local_media::{LocalMediaState, MediaFlags};
use super::{ChatMessage, SessionError, SessionEvent, SessionInfo, SessionState};
use crate::config::SessionConfig;
use crate::media::{MediaSink, MediaSource, MediaStream, NullSink, RemoteStream, SinkSlot, StreamHandle, ThumbnailCapture};
use crate::peer::{
    AnswerOutcome, CandidateOutcome, ConnectionState, IceCandidate, PeerConnector, PeerError, PeerEvent, PeerRegistry,
    TaggedPeerEvent, TransportState, HOST_PEER_ID,
};
use crate::signaling::{InboundEvent, OutboundMessage, SignalPayload, SignalingChannel, SignalingError};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

const REAP_INTERVAL: Duration = Duration::from_secs(1);

struct SessionCore {
    state: SessionState,
    session: Option<SessionInfo>,
    /// Viewer side: the host's transport id, learned from its first signal
    host_socket: Option<String>,
    known_sessions: Vec<SessionInfo>,
    media: LocalMediaState,
    remote_stream: Option<RemoteStream>,
    registry: PeerRegistry,
    chat: ChatLog,
    viewer_count: u32,
    screen_watch: Option<JoinHandle<()>>,
}

struct PendingEvents {
    peer: mpsc::UnboundedReceiver<TaggedPeerEvent>,
    screen_ended: mpsc::UnboundedReceiver<String>,
}

#[derive(Default)]
struct Counters {
    connections_opened: AtomicU64,
    stalled_negotiations: AtomicU64,
    signaling_failures: AtomicU64,
    track_replacements: AtomicU64,
    chat_messages: AtomicU64,
}

/// Counters exposed on the status endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerMetrics {
    pub connections_opened: u64,
    pub stalled_negotiations: u64,
    pub signaling_failures: u64,
    pub track_replacements: u64,
    pub chat_messages: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub remote_id: String,
    pub state: ConnectionState,
}

/// Read-only view of the manager's state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session: Option<SessionInfo>,
    pub media: MediaFlags,
    pub viewer_count: u32,
    pub connections: Vec<ConnectionSummary>,
    pub connected: usize,
    pub chat: Vec<ChatMessage>,
    pub remote_stream: Option<RemoteStream>,
    pub known_sessions: usize,
}

pub struct SessionManager {
    identity: String,
    config: SessionConfig,
    signaling: Arc<dyn SignalingChannel>,
    media_source: Arc<dyn MediaSource>,
    sink: Arc<dyn MediaSink>,
    thumbnails: Option<Arc<dyn ThumbnailCapture>>,
    core: Mutex<SessionCore>,
    pending: Mutex<PendingEvents>,
    screen_ended_tx: mpsc::UnboundedSender<String>,
    events: broadcast::Sender<SessionEvent>,
    counters: Counters,
}

impl SessionManager {
    pub fn new(
        config: &SessionConfig,
        signaling: Arc<dyn SignalingChannel>,
        media_source: Arc<dyn MediaSource>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (screen_tx, screen_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        Self {
            identity: config.identity.clone(),
            config: config.clone(),
            signaling,
            media_source,
            sink: Arc::new(NullSink),
            thumbnails: None,
            core: Mutex::new(SessionCore {
                state: SessionState::Idle,
                session: None,
                host_socket: None,
                known_sessions: Vec::new(),
                media: LocalMediaState::default(),
                remote_stream: None,
                registry: PeerRegistry::new(connector, peer_tx),
                chat: ChatLog::new(),
                viewer_count: 0,
                screen_watch: None,
            }),
            pending: Mutex::new(PendingEvents {
                peer: peer_rx,
                screen_ended: screen_rx,
            }),
            screen_ended_tx: screen_tx,
            events,
            counters: Counters::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn MediaSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_thumbnails(mut self, thumbnails: Arc<dyn ThumbnailCapture>) -> Self {
        self.thumbnails = Some(thumbnails);
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Subscribe to session notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn transition(&self, core: &mut SessionCore, to: SessionState) {
        let from = core.state;
        if !from.can_transition(to) {
            warn!("Ignoring invalid session transition {} -> {}", from, to);
            return;
        }
        core.state = to;
        info!("Session state: {} -> {}", from, to);
        self.emit(SessionEvent::StateChanged { from, to });
    }

    /// Send a signaling message, bounded by the send timeout.
    ///
    /// Failures are logged and reported but never block the caller's transition.
    async fn deliver(&self, message: OutboundMessage) -> bool {
        let event = message.event_name();
        let result = match tokio::time::timeout(self.config.signaling_send_timeout(), self.signaling.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(SignalingError::Timeout),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to deliver {}: {}", event, e);
                self.counters.signaling_failures.fetch_add(1, Ordering::Relaxed);
                self.emit(SessionEvent::Error(SessionError::SignalingDelivery(format!("{}: {}", event, e))));
                false
            }
        }
    }

    fn system_message(&self, core: &mut SessionCore, text: String) {
        if let Some(message) = core.chat.append(ChatMessage::system(text)) {
            self.emit(SessionEvent::Chat(message));
        }
    }

    fn require(core: &SessionCore, expected: SessionState, operation: &'static str) -> Result<(), SessionError> {
        if core.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: core.state,
            })
        }
    }

    fn require_idle(core: &SessionCore, operation: &'static str) -> Result<(), SessionError> {
        if core.state.is_active() {
            return Err(SessionError::AlreadyInSession);
        }
        Self::require(core, SessionState::Idle, operation)
    }

    // --- creator operations ---

    /// Acquire camera/mic and announce a new session
    pub async fn start_hosting(&self) -> Result<SessionInfo, SessionError> {
        let mut core = self.core.lock().await;
        Self::require_idle(&core, "start hosting")?;

        let camera = self.media_source.acquire_camera_mic().await.map_err(|e| {
            warn!("Camera/mic acquisition failed: {}", e);
            SessionError::MediaAcquisition(e)
        })?;

        let thumbnail_ref = self.capture_thumbnail(&camera).await;
        let info = SessionInfo::new(self.identity.clone(), thumbnail_ref);

        core.media = LocalMediaState::with_camera(camera.clone());
        core.session = Some(info.clone());
        core.viewer_count = 0;
        self.transition(&mut core, SessionState::Hosting);
        self.sink.attach(SinkSlot::Main, StreamHandle::Local(camera));

        self.deliver(OutboundMessage::CreateStream {
            session_id: info.id.clone(),
            host_identity: info.host_identity.clone(),
            thumbnail_ref: info.thumbnail_ref.clone(),
        })
        .await;

        self.system_message(&mut core, "Stream started".to_string());
        info!("Hosting session {}", info.id);
        self.emit(SessionEvent::SessionStarted(info.clone()));
        Ok(info)
    }

    async fn capture_thumbnail(&self, camera: &MediaStream) -> Option<String> {
        let thumbnails = self.thumbnails.as_ref()?;
        match tokio::time::timeout(self.config.thumbnail_timeout(), thumbnails.capture(camera)).await {
            Ok(Ok(reference)) => Some(reference),
            Ok(Err(e)) => {
                warn!("Thumbnail capture failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Thumbnail capture timed out");
                None
            }
        }
    }

    pub async fn stop_hosting(&self) -> Result<(), SessionError> {
        let mut core = self.core.lock().await;
        Self::require(&core, SessionState::Hosting, "stop hosting")?;
        self.teardown(&mut core, true, "stopped by host").await;
        Ok(())
    }

    pub async fn toggle_mic(&self) -> Result<bool, SessionError> {
        let mut core = self.core.lock().await;
        Self::require(&core, SessionState::Hosting, "toggle microphone")?;

        let enabled = !core.media.mic_enabled;
        if let Some(track) = core.media.audio_track() {
            track.set_enabled(enabled);
        }
        core.media.mic_enabled = enabled;
        debug!("Microphone {}", if enabled { "enabled" } else { "muted" });
        self.emit(SessionEvent::MediaStateChanged(core.media.flags()));
        Ok(enabled)
    }

    pub async fn toggle_video(&self) -> Result<bool, SessionError> {
        let mut core = self.core.lock().await;
        Self::require(&core, SessionState::Hosting, "toggle video")?;

        let enabled = !core.media.video_enabled;
        for track in [core.media.camera_track(), core.media.screen_track()].into_iter().flatten() {
            track.set_enabled(enabled);
        }
        core.media.video_enabled = enabled;
        debug!("Video {}", if enabled { "enabled" } else { "disabled" });
        self.emit(SessionEvent::MediaStateChanged(core.media.flags()));
        Ok(enabled)
    }

    /// Replace the outgoing camera video with a screen capture on every connection
    pub async fn start_screen_share(&self) -> Result<(), SessionError> {
        let mut core = self.core.lock().await;
        Self::require(&core, SessionState::Hosting, "start screen share")?;
        if core.media.screen_sharing {
            debug!("Screen share already active");
            return Ok(());
        }

        let screen = match self.media_source.acquire_screen().await {
            Ok(screen) => screen,
            Err(e) => {
                warn!("Screen capture failed: {}", e);
                let err = SessionError::MediaAcquisition(e);
                self.emit(SessionEvent::Error(err.clone()));
                return Err(err);
            }
        };

        let Some(track) = screen.video_track().cloned() else {
            self.media_source.release(&screen).await;
            let err = SessionError::MediaAcquisition(crate::media::MediaError::Unavailable(
                "screen stream has no video track".to_string(),
            ));
            self.emit(SessionEvent::Error(err.clone()));
            return Err(err);
        };
        track.set_enabled(core.media.video_enabled);

        let summary = core.registry.replace_outgoing_video(&track).await;
        self.counters
            .track_replacements
            .fetch_add(summary.replaced as u64, Ordering::Relaxed);
        info!(
            "Screen share started: {} replaced, {} pending, {} failed",
            summary.replaced,
            summary.deferred,
            summary.failed.len()
        );
        self.report_failed_swaps(summary.failed);

        let tx = self.screen_ended_tx.clone();
        let watched = track.clone();
        core.screen_watch = Some(tokio::spawn(async move {
            watched.ended().await;
            let _ = tx.send(watched.id().to_string());
        }));

        core.media.screen = Some(screen.clone());
        core.media.screen_sharing = true;
        self.sink.attach(SinkSlot::Main, StreamHandle::Local(screen));
        if let Some(camera) = core.media.camera.clone() {
            self.sink.attach(SinkSlot::Bubble, StreamHandle::Local(camera));
        }
        self.emit(SessionEvent::MediaStateChanged(core.media.flags()));
        Ok(())
    }

    pub async fn stop_screen_share(&self) -> Result<(), SessionError> {
        let mut core = self.core.lock().await;
        Self::require(&core, SessionState::Hosting, "stop screen share")?;
        if !core.media.screen_sharing {
            return Ok(());
        }
        self.end_screen_share(&mut core).await;
        Ok(())
    }

    async fn end_screen_share(&self, core: &mut SessionCore) {
        if let Some(watch) = core.screen_watch.take() {
            watch.abort();
        }

        if let Some(camera) = core.media.camera_track().cloned() {
            let summary = core.registry.replace_outgoing_video(&camera).await;
            self.counters
                .track_replacements
                .fetch_add(summary.replaced as u64, Ordering::Relaxed);
            self.report_failed_swaps(summary.failed);
        }
        core.media.screen_sharing = false;

        if let Some(screen) = core.media.screen.take() {
            self.media_source.release(&screen).await;
            screen.stop_all();
        }

        self.sink.detach(SinkSlot::Bubble);
        if let Some(camera) = core.media.camera.clone() {
            self.sink.attach(SinkSlot::Main, StreamHandle::Local(camera));
        }
        info!("Screen share stopped");
        self.emit(SessionEvent::MediaStateChanged(core.media.flags()));
    }

    /// The registry already closed these; tell observers they are gone
    fn report_failed_swaps(&self, failed: Vec<(String, PeerError)>) {
        for (remote_id, e) in failed {
            self.emit(SessionEvent::Error(SessionError::Peer(e)));
            self.emit(SessionEvent::ConnectionClosed { remote_id });
        }
    }

    async fn handle_screen_ended(&self, track_id: &str) {
        let mut core = self.core.lock().await;
        let current = core.media.screen_track().map(|t| t.id() == track_id).unwrap_or(false);
        if core.state == SessionState::Hosting && core.media.screen_sharing && current {
            info!("Screen capture ended by the platform");
            self.end_screen_share(&mut core).await;
        }
    }

    // --- viewer operations ---

    /// Join a session from the last known active list
    pub async fn join(&self, session_id: &str) -> Result<SessionInfo, SessionError> {
        let mut core = self.core.lock().await;
        Self::require_idle(&core, "join")?;

        let info = core
            .known_sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        core.registry.open_subscriber(HOST_PEER_ID).await?;
        self.counters.connections_opened.fetch_add(1, Ordering::Relaxed);

        core.session = Some(info.clone());
        core.host_socket = None;
        core.viewer_count = info.viewer_count;
        self.transition(&mut core, SessionState::Watching);

        self.deliver(OutboundMessage::JoinStream {
            session_id: info.id.clone(),
            participant_identity: self.identity.clone(),
        })
        .await;

        self.system_message(&mut core, format!("Joined {}'s stream", info.host_identity));
        info!("Watching session {}", info.id);
        self.emit(SessionEvent::SessionStarted(info.clone()));
        Ok(info)
    }

    pub async fn leave(&self) -> Result<(), SessionError> {
        let mut core = self.core.lock().await;
        Self::require(&core, SessionState::Watching, "leave")?;
        self.teardown(&mut core, true, "left by viewer").await;
        Ok(())
    }

    // --- chat ---

    pub async fn send_chat_message(&self, text: &str) -> Result<ChatMessage, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyChatMessage);
        }

        let mut core = self.core.lock().await;
        let session_id = match (&core.session, core.state.is_active()) {
            (Some(session), true) => session.id.clone(),
            _ => {
                return Err(SessionError::InvalidState {
                    operation: "send chat message",
                    state: core.state,
                })
            }
        };

        let message = ChatMessage::new(self.identity.clone(), text);
        let stored = core.chat.append(message.clone()).unwrap_or(message);
        self.counters.chat_messages.fetch_add(1, Ordering::Relaxed);

        self.deliver(OutboundMessage::Chat {
            session_id,
            message: stored.clone(),
        })
        .await;
        self.emit(SessionEvent::Chat(stored.clone()));
        Ok(stored)
    }

    // --- teardown ---

    /// Notify, close every connection, release media and recycle to `Idle`.
    ///
    /// Each step runs regardless of the previous one failing.
    async fn teardown(&self, core: &mut SessionCore, notify: bool, reason: &str) {
        let was = core.state;
        let session_id = core.session.as_ref().map(|s| s.id.clone()).unwrap_or_default();
        self.transition(core, SessionState::Ending);

        if notify {
            let message = match was {
                SessionState::Hosting => OutboundMessage::StopStream {
                    session_id: session_id.clone(),
                },
                _ => OutboundMessage::LeaveStream {
                    session_id: session_id.clone(),
                },
            };
            self.deliver(message).await;
        }

        if let Some(watch) = core.screen_watch.take() {
            watch.abort();
        }

        core.registry.close_all().await;

        for stream in [core.media.screen.take(), core.media.camera.take()].into_iter().flatten() {
            self.media_source.release(&stream).await;
            stream.stop_all();
        }
        core.media = LocalMediaState::default();

        match was {
            SessionState::Hosting => {
                self.sink.detach(SinkSlot::Bubble);
                self.sink.detach(SinkSlot::Main);
            }
            _ => self.sink.detach(SinkSlot::Remote),
        }

        core.remote_stream = None;
        core.host_socket = None;
        core.session = None;
        core.viewer_count = 0;
        core.chat.clear();

        self.transition(core, SessionState::Ended);
        self.transition(core, SessionState::Idle);
        info!("Session {} ended: {}", session_id, reason);
        self.emit(SessionEvent::SessionEnded {
            session_id,
            reason: reason.to_string(),
        });
    }

    // --- inbound signaling ---

    pub async fn handle_signal(&self, event: InboundEvent) {
        let mut core = self.core.lock().await;
        match event {
            InboundEvent::StreamsUpdated(sessions) => {
                debug!("Roster updated: {} session(s)", sessions.len());
                let count = sessions.len();
                core.known_sessions = sessions;
                self.emit(SessionEvent::RosterUpdated(count));
            }
            InboundEvent::ViewerCountUpdate { viewer_count, session_id } => {
                let current = core.session.as_ref().map(|s| s.id.clone());
                if !core.state.is_active() || (session_id.is_some() && session_id != current) {
                    debug!("Viewer count for another session ignored");
                    return;
                }
                core.viewer_count = viewer_count;
                if let Some(session) = core.session.as_mut() {
                    session.viewer_count = viewer_count;
                }
                self.emit(SessionEvent::ViewerCount(viewer_count));
            }
            InboundEvent::ViewerJoined { viewer_socket_id } => {
                self.on_viewer_joined(&mut core, &viewer_socket_id).await;
            }
            InboundEvent::ViewerLeft { viewer_socket_id } => {
                if core.state != SessionState::Hosting {
                    return;
                }
                if core.registry.close(&viewer_socket_id).await {
                    self.emit(SessionEvent::ConnectionClosed {
                        remote_id: viewer_socket_id,
                    });
                    self.system_message(&mut core, "A viewer left".to_string());
                }
            }
            InboundEvent::Signal { from, data } => {
                self.on_signal(&mut core, from, data).await;
            }
            InboundEvent::Chat(message) => {
                if !core.state.is_active() {
                    debug!("Chat message outside a session dropped");
                    return;
                }
                if let Some(stored) = core.chat.append(message) {
                    self.counters.chat_messages.fetch_add(1, Ordering::Relaxed);
                    self.emit(SessionEvent::Chat(stored));
                }
            }
            InboundEvent::StreamEnded { session_id } => {
                core.known_sessions.retain(|s| s.id != session_id);
                let current = core.session.as_ref().map(|s| s.id == session_id).unwrap_or(false);
                if current && core.state.is_active() {
                    info!("Session {} ended remotely", session_id);
                    self.teardown(&mut core, false, "ended remotely").await;
                }
            }
            InboundEvent::StreamError { message } => {
                warn!("Signaling service reported: {}", message);
                self.emit(SessionEvent::StreamError { message });
            }
        }
    }

    async fn on_viewer_joined(&self, core: &mut SessionCore, viewer: &str) {
        if core.state != SessionState::Hosting {
            debug!("viewer-joined while {}; ignoring", core.state);
            return;
        }
        let Some(session_id) = core.session.as_ref().map(|s| s.id.clone()) else {
            return;
        };

        let audio = core.media.audio_track().cloned();
        let video = core.media.active_video().cloned();
        match core.registry.open_publisher(viewer, audio.as_ref(), video.as_ref()).await {
            Ok(sdp) => {
                self.counters.connections_opened.fetch_add(1, Ordering::Relaxed);
                self.emit(SessionEvent::ConnectionStateChanged {
                    remote_id: viewer.to_string(),
                    state: ConnectionState::Negotiating,
                });
                self.deliver(OutboundMessage::Signal {
                    to: viewer.to_string(),
                    session_id,
                    data: SignalPayload::Offer { sdp },
                })
                .await;
                self.system_message(core, "A viewer joined".to_string());
            }
            Err(e) => {
                warn!("Could not open connection to {}: {}", viewer, e);
                self.emit(SessionEvent::Error(SessionError::Peer(e)));
            }
        }
    }

    async fn on_signal(&self, core: &mut SessionCore, from: String, data: SignalPayload) {
        match core.state {
            SessionState::Hosting => self.on_host_signal(core, from, data).await,
            SessionState::Watching => self.on_viewer_signal(core, from, data).await,
            state => debug!("Stray {} signal from {} while {}", data.kind(), from, state),
        }
    }

    async fn on_host_signal(&self, core: &mut SessionCore, from: String, data: SignalPayload) {
        match data {
            SignalPayload::Answer { sdp } => match core.registry.apply_answer(&from, &sdp).await {
                Ok(AnswerOutcome::Connected) => self.emit(SessionEvent::ConnectionStateChanged {
                    remote_id: from,
                    state: ConnectionState::Connected,
                }),
                Ok(AnswerOutcome::Ignored) => {}
                Ok(AnswerOutcome::TrackSwapFailed(e)) => self.report_failed_swaps(vec![(from, e)]),
                Err(e) => {
                    warn!("Answer from {} rejected: {}", from, e);
                    core.registry.close(&from).await;
                    self.emit(SessionEvent::Error(SessionError::Peer(e)));
                    self.emit(SessionEvent::ConnectionClosed { remote_id: from });
                }
            },
            SignalPayload::Candidate { .. } => {
                if let Some(candidate) = candidate_from(data) {
                    self.apply_candidate(core, &from, candidate).await;
                }
            }
            SignalPayload::Offer { .. } => debug!("Host ignores offer from {}", from),
        }
    }

    async fn on_viewer_signal(&self, core: &mut SessionCore, from: String, data: SignalPayload) {
        if core.host_socket.is_none() {
            core.host_socket = Some(from.clone());
        }
        if core.host_socket.as_deref() != Some(from.as_str()) {
            debug!("Signal from {} is not from the host; ignoring", from);
            return;
        }

        match data {
            SignalPayload::Offer { sdp } => match core.registry.apply_offer(HOST_PEER_ID, &sdp).await {
                Ok(Some(answer)) => {
                    let session_id = core.session.as_ref().map(|s| s.id.clone()).unwrap_or_default();
                    self.deliver(OutboundMessage::Signal {
                        to: from,
                        session_id,
                        data: SignalPayload::Answer { sdp: answer },
                    })
                    .await;
                    self.emit(SessionEvent::ConnectionStateChanged {
                        remote_id: HOST_PEER_ID.to_string(),
                        state: ConnectionState::Connected,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Offer from host rejected: {}", e);
                    self.emit(SessionEvent::Error(SessionError::Peer(e)));
                }
            },
            SignalPayload::Candidate { .. } => {
                if let Some(candidate) = candidate_from(data) {
                    self.apply_candidate(core, HOST_PEER_ID, candidate).await;
                }
            }
            SignalPayload::Answer { .. } => debug!("Viewer ignores answer from {}", from),
        }
    }

    async fn apply_candidate(&self, core: &mut SessionCore, remote_id: &str, candidate: IceCandidate) {
        if core.registry.apply_candidate(remote_id, candidate).await == CandidateOutcome::Queued {
            debug!("Candidate for {} queued until the remote description is set", remote_id);
        }
    }

    // --- peer events ---

    pub async fn handle_peer_event(&self, tagged: TaggedPeerEvent) {
        let mut core = self.core.lock().await;
        if !core.registry.is_current(&tagged.remote_id, tagged.generation) {
            debug!(
                "Stray event from {} (gen {}) ignored",
                tagged.remote_id, tagged.generation
            );
            return;
        }

        match tagged.event {
            PeerEvent::LocalCandidate(candidate) => {
                let to = match core.state {
                    SessionState::Hosting => tagged.remote_id.clone(),
                    _ => core.host_socket.clone().unwrap_or_else(|| HOST_PEER_ID.to_string()),
                };
                let session_id = core.session.as_ref().map(|s| s.id.clone()).unwrap_or_default();
                self.deliver(OutboundMessage::Signal {
                    to,
                    session_id,
                    data: candidate.into(),
                })
                .await;
            }
            PeerEvent::RemoteTrack(track) => {
                if core.state != SessionState::Watching {
                    return;
                }
                let stream = core.remote_stream.get_or_insert_with(RemoteStream::default);
                if stream.add_track(track) {
                    let stream = stream.clone();
                    if stream.tracks.len() == 1 {
                        self.sink.attach(SinkSlot::Remote, StreamHandle::Remote(stream.clone()));
                    }
                    info!("Remote stream has {} track(s)", stream.tracks.len());
                    self.emit(SessionEvent::RemoteStreamReady(stream));
                }
            }
            PeerEvent::Transport(state) => {
                debug!("Connection {} transport {:?}", tagged.remote_id, state);
                if state.is_terminal() {
                    if state == TransportState::Failed {
                        warn!("Connection {} failed", tagged.remote_id);
                    }
                    core.registry.close(&tagged.remote_id).await;
                    self.emit(SessionEvent::ConnectionClosed {
                        remote_id: tagged.remote_id,
                    });
                }
            }
        }
    }

    /// Apply queued peer and capture events.
    ///
    /// Returns the number handled; 0 while [`run`](Self::run) owns the queues.
    pub async fn process_pending_events(&self) -> usize {
        let Ok(mut pending) = self.pending.try_lock() else {
            return 0;
        };

        let mut handled = 0;
        loop {
            if let Ok(event) = pending.peer.try_recv() {
                self.handle_peer_event(event).await;
            } else if let Ok(track_id) = pending.screen_ended.try_recv() {
                self.handle_screen_ended(&track_id).await;
            } else {
                break;
            }
            handled += 1;
        }
        handled
    }

    /// Close connections stuck in negotiation past the configured timeout
    pub async fn reap_stalled_negotiations(&self) -> Vec<String> {
        let mut core = self.core.lock().await;
        if !core.state.is_active() {
            return Vec::new();
        }

        let stalled = core.registry.reap_stalled(self.config.negotiation_timeout()).await;
        for remote_id in &stalled {
            self.counters.stalled_negotiations.fetch_add(1, Ordering::Relaxed);
            self.emit(SessionEvent::Error(SessionError::NegotiationStalled(remote_id.clone())));
            self.emit(SessionEvent::ConnectionClosed {
                remote_id: remote_id.clone(),
            });
        }
        stalled
    }

    /// Drive the manager from inbound signaling, peer events and the stall guard.
    ///
    /// Returns when the inbound signaling stream closes.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<InboundEvent>) {
        let mut pending = self.pending.lock().await;
        let PendingEvents { peer, screen_ended } = &mut *pending;
        let mut reaper = tokio::time::interval(REAP_INTERVAL);

        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => self.handle_signal(event).await,
                    None => {
                        info!("Signaling stream closed");
                        break;
                    }
                },
                Some(event) = peer.recv() => self.handle_peer_event(event).await,
                Some(track_id) = screen_ended.recv() => self.handle_screen_ended(&track_id).await,
                _ = reaper.tick() => {
                    self.reap_stalled_negotiations().await;
                }
            }
        }
    }

    // --- observation ---

    pub async fn state(&self) -> SessionState {
        self.core.lock().await.state
    }

    pub async fn current_session(&self) -> Option<SessionInfo> {
        self.core.lock().await.session.clone()
    }

    pub async fn viewer_count(&self) -> u32 {
        self.core.lock().await.viewer_count
    }

    pub async fn media_flags(&self) -> MediaFlags {
        self.core.lock().await.media.flags()
    }

    pub async fn chat_log(&self) -> Vec<ChatMessage> {
        self.core.lock().await.chat.messages().to_vec()
    }

    pub async fn connection_states(&self) -> Vec<(String, ConnectionState)> {
        self.core.lock().await.registry.states()
    }

    pub async fn known_sessions(&self) -> Vec<SessionInfo> {
        self.core.lock().await.known_sessions.clone()
    }

    pub async fn remote_stream(&self) -> Option<RemoteStream> {
        self.core.lock().await.remote_stream.clone()
    }

    /// Local tracks not yet stopped
    pub async fn live_track_count(&self) -> usize {
        self.core.lock().await.media.live_track_count()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let core = self.core.lock().await;
        SessionSnapshot {
            state: core.state,
            session: core.session.clone(),
            media: core.media.flags(),
            viewer_count: core.viewer_count,
            connections: core
                .registry
                .states()
                .into_iter()
                .map(|(remote_id, state)| ConnectionSummary { remote_id, state })
                .collect(),
            connected: core.registry.connected_count(),
            chat: core.chat.messages().to_vec(),
            remote_stream: core.remote_stream.clone(),
            known_sessions: core.known_sessions.len(),
        }
    }

    pub fn metrics(&self) -> ManagerMetrics {
        ManagerMetrics {
            connections_opened: self.counters.connections_opened.load(Ordering::Relaxed),
            stalled_negotiations: self.counters.stalled_negotiations.load(Ordering::Relaxed),
            signaling_failures: self.counters.signaling_failures.load(Ordering::Relaxed),
            track_replacements: self.counters.track_replacements.load(Ordering::Relaxed),
            chat_messages: self.counters.chat_messages.load(Ordering::Relaxed),
        }
    }
}

fn candidate_from(payload: SignalPayload) -> Option<IceCandidate> {
    match payload {
        SignalPayload::Candidate {
            candidate,
            sdp_mid,
            sdp_mline_index,
        } => Some(IceCandidate {
            candidate,
            sdp_mid,
            sdp_mline_index,
        }),
        _ => None,
    }
}
