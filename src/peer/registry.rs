//! Peer Connection Registry
//!
//! Owns every [`ParticipantConnection`] and drives the offer/answer/ICE state
//! machine for each. Connections to different remotes are independent; for a
//! single connection, descriptions are applied in causal order and ICE
//! candidates that arrive before the remote description are queued.

use super::{IceCandidate, PeerConnection, PeerConnector, PeerError, PeerLink, PeerRole, TaggedPeerEvent};
use crate::media::MediaTrack;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Negotiation state of a participant connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Negotiating,
    Connected,
    Closed,
}

/// Ids of the local tracks currently attached to a connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SentTracks {
    pub audio: Option<String>,
    pub video: Option<String>,
}

/// One remote peer from the local actor's perspective
pub struct ParticipantConnection {
    pub remote_id: String,
    pub generation: u64,
    pub state: ConnectionState,
    pub sent: SentTracks,
    peer: Arc<dyn PeerConnection>,
    started_at: Instant,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    pending_video: Option<MediaTrack>,
}

impl ParticipantConnection {
    fn new(remote_id: String, generation: u64, peer: Arc<dyn PeerConnection>) -> Self {
        Self {
            remote_id,
            generation,
            state: ConnectionState::Negotiating,
            sent: SentTracks::default(),
            peer,
            started_at: Instant::now(),
            remote_description_set: false,
            pending_candidates: Vec::new(),
            pending_video: None,
        }
    }

    /// Time spent since the connection was opened
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn queued_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Apply candidates that arrived before the remote description
    async fn flush_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = self.peer.add_ice_candidate(&candidate).await {
                warn!("Queued ICE candidate for {} rejected: {}", self.remote_id, e);
            }
        }
    }

    async fn shutdown(self) -> Result<(), PeerError> {
        self.peer.close().await
    }
}

/// Result of applying a remote ICE candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Applied,
    /// Held until the remote description is set
    Queued,
    /// Rejected by the stack; logged and tolerated
    Failed,
    /// No connection for that remote (late or stray)
    Ignored,
}

/// Result of an outgoing video track replacement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    /// Connected connections whose sender was swapped
    pub replaced: usize,
    /// Negotiating connections that pick the track up with their answer
    pub deferred: usize,
    /// Connections where the swap failed; these have been closed
    pub failed: Vec<(String, PeerError)>,
}

/// Result of applying a viewer's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// The connection is now connected
    Connected,
    /// No negotiating connection for that remote
    Ignored,
    /// The answer was accepted but the pending video swap failed; the connection was closed
    TrackSwapFailed(PeerError),
}

pub struct PeerRegistry {
    connector: Arc<dyn PeerConnector>,
    connections: HashMap<String, ParticipantConnection>,
    events: mpsc::UnboundedSender<TaggedPeerEvent>,
    next_generation: u64,
}

impl PeerRegistry {
    pub fn new(connector: Arc<dyn PeerConnector>, events: mpsc::UnboundedSender<TaggedPeerEvent>) -> Self {
        Self {
            connector,
            connections: HashMap::new(),
            events,
            next_generation: 1,
        }
    }

    fn link(&mut self, remote_id: &str, role: PeerRole) -> PeerLink {
        let generation = self.next_generation;
        self.next_generation += 1;
        PeerLink::new(remote_id.to_string(), generation, role, self.events.clone())
    }

    /// Creator side: open a connection to a viewer, attach tracks and produce the offer.
    ///
    /// An existing connection to the same remote is replaced.
    pub async fn open_publisher(
        &mut self,
        remote_id: &str,
        audio: Option<&MediaTrack>,
        video: Option<&MediaTrack>,
    ) -> Result<String, PeerError> {
        if self.connections.contains_key(remote_id) {
            info!("Viewer {} rejoined; replacing its connection", remote_id);
            self.close(remote_id).await;
        }

        let link = self.link(remote_id, PeerRole::Publisher);
        let generation = link.generation;
        let peer = self.connector.connect(link).await?;
        let mut connection = ParticipantConnection::new(remote_id.to_string(), generation, peer.clone());

        let offer = async {
            if let Some(track) = audio {
                peer.add_track(track).await?;
                connection.sent.audio = Some(track.id().to_string());
            }
            if let Some(track) = video {
                peer.add_track(track).await?;
                connection.sent.video = Some(track.id().to_string());
            }
            peer.create_offer().await
        }
        .await;

        match offer {
            Ok(sdp) => {
                debug!("Connection {} (gen {}) negotiating", remote_id, generation);
                self.connections.insert(remote_id.to_string(), connection);
                Ok(sdp)
            }
            Err(e) => {
                if let Err(close_err) = connection.shutdown().await {
                    debug!("Close after failed offer to {}: {}", remote_id, close_err);
                }
                Err(e)
            }
        }
    }

    /// Viewer side: open the single connection to the host and wait for its offer
    pub async fn open_subscriber(&mut self, remote_id: &str) -> Result<(), PeerError> {
        if self.connections.contains_key(remote_id) {
            self.close(remote_id).await;
        }

        let link = self.link(remote_id, PeerRole::Subscriber);
        let generation = link.generation;
        let peer = self.connector.connect(link).await?;
        self.connections.insert(
            remote_id.to_string(),
            ParticipantConnection::new(remote_id.to_string(), generation, peer),
        );
        debug!("Connection {} (gen {}) awaiting offer", remote_id, generation);
        Ok(())
    }

    /// Apply the viewer's answer.
    ///
    /// An `Err` means the answer itself was rejected. A failed swap to a track
    /// queued during negotiation closes the connection and is reported as
    /// [`AnswerOutcome::TrackSwapFailed`].
    pub async fn apply_answer(&mut self, remote_id: &str, sdp: &str) -> Result<AnswerOutcome, PeerError> {
        let Some(connection) = self.connections.get_mut(remote_id) else {
            debug!("Answer from {} has no connection; ignoring", remote_id);
            return Ok(AnswerOutcome::Ignored);
        };
        if connection.state != ConnectionState::Negotiating {
            debug!("Duplicate answer from {} ignored", remote_id);
            return Ok(AnswerOutcome::Ignored);
        }

        connection.peer.accept_answer(sdp).await?;
        connection.remote_description_set = true;
        connection.flush_candidates().await;

        let swap = match connection.pending_video.take() {
            Some(track) if connection.sent.video.as_deref() != Some(track.id()) => {
                let result = connection.peer.replace_video_track(&track).await;
                if result.is_ok() {
                    connection.sent.video = Some(track.id().to_string());
                }
                result
            }
            _ => Ok(()),
        };

        if let Err(e) = swap {
            warn!("Pending video swap for {} failed: {}", remote_id, e);
            self.close(remote_id).await;
            return Ok(AnswerOutcome::TrackSwapFailed(e));
        }

        connection.state = ConnectionState::Connected;
        info!("Connection {} connected", remote_id);
        Ok(AnswerOutcome::Connected)
    }

    /// Apply the host's offer and produce the answer. `Ok(None)` if there is no connection.
    pub async fn apply_offer(&mut self, remote_id: &str, sdp: &str) -> Result<Option<String>, PeerError> {
        let Some(connection) = self.connections.get_mut(remote_id) else {
            debug!("Offer for {} has no connection; ignoring", remote_id);
            return Ok(None);
        };

        let answer = connection.peer.accept_offer(sdp).await?;
        connection.remote_description_set = true;
        connection.flush_candidates().await;
        connection.state = ConnectionState::Connected;
        info!("Connection {} answered", remote_id);
        Ok(Some(answer))
    }

    /// Apply a remote ICE candidate, queueing it if the remote description is not set yet
    pub async fn apply_candidate(&mut self, remote_id: &str, candidate: IceCandidate) -> CandidateOutcome {
        let Some(connection) = self.connections.get_mut(remote_id) else {
            debug!("Candidate for unknown connection {} ignored", remote_id);
            return CandidateOutcome::Ignored;
        };

        if !connection.remote_description_set {
            connection.pending_candidates.push(candidate);
            return CandidateOutcome::Queued;
        }

        match connection.peer.add_ice_candidate(&candidate).await {
            Ok(()) => CandidateOutcome::Applied,
            Err(e) => {
                warn!("ICE candidate for {} rejected: {}", remote_id, e);
                CandidateOutcome::Failed
            }
        }
    }

    /// Swap the outgoing video track on every connection.
    ///
    /// Connected connections are swapped concurrently; negotiating ones keep the
    /// track as pending and apply it together with their answer. A connection
    /// whose swap fails is closed, so none keeps sending the previous track.
    pub async fn replace_outgoing_video(&mut self, track: &MediaTrack) -> ReplaceSummary {
        let mut summary = ReplaceSummary::default();
        let mut swaps = Vec::new();

        for connection in self.connections.values_mut() {
            match connection.state {
                ConnectionState::Connected => {
                    let peer = connection.peer.clone();
                    let remote_id = connection.remote_id.clone();
                    swaps.push(async move {
                        let result = peer.replace_video_track(track).await;
                        (remote_id, result)
                    });
                }
                ConnectionState::Negotiating => {
                    connection.pending_video = Some(track.clone());
                    summary.deferred += 1;
                }
                ConnectionState::Closed => {}
            }
        }

        for (remote_id, result) in join_all(swaps).await {
            match result {
                Ok(()) => {
                    if let Some(connection) = self.connections.get_mut(&remote_id) {
                        connection.sent.video = Some(track.id().to_string());
                    }
                    summary.replaced += 1;
                }
                Err(e) => {
                    warn!("Video track swap failed for {}: {}", remote_id, e);
                    self.close(&remote_id).await;
                    summary.failed.push((remote_id, e));
                }
            }
        }

        summary
    }

    /// Close and discard one connection. Returns false if it did not exist.
    pub async fn close(&mut self, remote_id: &str) -> bool {
        match self.connections.remove(remote_id) {
            Some(connection) => {
                if let Err(e) = connection.shutdown().await {
                    warn!("Closing connection {} failed: {}", remote_id, e);
                }
                info!("Connection {} closed", remote_id);
                true
            }
            None => false,
        }
    }

    /// Close every connection; one failing close never stops the others
    pub async fn close_all(&mut self) -> usize {
        let connections: Vec<ParticipantConnection> = self.connections.drain().map(|(_, c)| c).collect();
        let count = connections.len();

        let closes = connections.into_iter().map(|connection| async move {
            let remote_id = connection.remote_id.clone();
            (remote_id, connection.shutdown().await)
        });
        for (remote_id, result) in join_all(closes).await {
            if let Err(e) = result {
                warn!("Closing connection {} failed: {}", remote_id, e);
            }
        }

        if count > 0 {
            info!("Closed {} peer connection(s)", count);
        }
        count
    }

    /// Close connections stuck in negotiation for at least `timeout`
    pub async fn reap_stalled(&mut self, timeout: Duration) -> Vec<String> {
        let stalled: Vec<String> = self
            .connections
            .values()
            .filter(|c| c.state == ConnectionState::Negotiating && c.age() >= timeout)
            .map(|c| c.remote_id.clone())
            .collect();

        for remote_id in &stalled {
            warn!("Negotiation with {} stalled; closing", remote_id);
            self.close(remote_id).await;
        }
        stalled
    }

    /// The event came from the live connection to `remote_id`
    pub fn is_current(&self, remote_id: &str, generation: u64) -> bool {
        self.connections
            .get(remote_id)
            .map(|c| c.generation == generation)
            .unwrap_or(false)
    }

    pub fn get(&self, remote_id: &str) -> Option<&ParticipantConnection> {
        self.connections.get(remote_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .count()
    }

    /// (remote id, state) for every connection, sorted by remote id
    pub fn states(&self) -> Vec<(String, ConnectionState)> {
        let mut states: Vec<_> = self
            .connections
            .values()
            .map(|c| (c.remote_id.clone(), c.state))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
