//! In-memory stand-ins for the signaling transport, media capture and the
//! WebRTC stack, used by unit and scenario tests.

use crate::media::{MediaError, MediaSource, MediaStream, MediaTrack, ThumbnailCapture, TrackSource};
use crate::peer::{IceCandidate, PeerConnection, PeerConnector, PeerError, PeerEvent, PeerLink};
use crate::signaling::{OutboundMessage, SignalPayload, SignalingChannel, SignalingError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct FakeSignaling {
    sent: Mutex<Vec<OutboundMessage>>,
    fail: AtomicBool,
}

impl FakeSignaling {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_events(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|m| m.event_name()).collect()
    }

    /// Signal payloads sent to `to`, in order
    pub fn signals_to(&self, to: &str) -> Vec<SignalPayload> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Signal { to: target, data, .. } if target == to => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn offers_to(&self, to: &str) -> usize {
        self.signals_to(to)
            .iter()
            .filter(|p| matches!(p, SignalPayload::Offer { .. }))
            .count()
    }
}

#[async_trait]
impl SignalingChannel for FakeSignaling {
    async fn send(&self, message: OutboundMessage) -> Result<(), SignalingError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(SignalingError::Send(format!("{} refused", message.event_name())));
        }
        self.sent.lock().push(message);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMedia {
    deny_camera: AtomicBool,
    deny_screen: AtomicBool,
    acquired: Mutex<Vec<MediaStream>>,
}

impl FakeMedia {
    pub fn deny_camera(&self, deny: bool) {
        self.deny_camera.store(deny, Ordering::Relaxed);
    }

    pub fn deny_screen(&self, deny: bool) {
        self.deny_screen.store(deny, Ordering::Relaxed);
    }

    /// Every stream handed out so far
    pub fn acquired(&self) -> Vec<MediaStream> {
        self.acquired.lock().clone()
    }

    pub fn live_tracks(&self) -> usize {
        self.acquired.lock().iter().map(|s| s.live_track_count()).sum()
    }

    pub fn last_screen_track(&self) -> Option<MediaTrack> {
        self.acquired
            .lock()
            .iter()
            .rev()
            .filter_map(|s| s.video_track())
            .find(|t| t.source() == TrackSource::Screen)
            .cloned()
    }
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire_camera_mic(&self) -> Result<MediaStream, MediaError> {
        if self.deny_camera.load(Ordering::Relaxed) {
            return Err(MediaError::Denied("camera permission refused".to_string()));
        }
        let stream = MediaStream::new(
            "camera",
            vec![
                MediaTrack::for_source(TrackSource::Microphone, "camera"),
                MediaTrack::for_source(TrackSource::Camera, "camera"),
            ],
        );
        self.acquired.lock().push(stream.clone());
        Ok(stream)
    }

    async fn acquire_screen(&self) -> Result<MediaStream, MediaError> {
        if self.deny_screen.load(Ordering::Relaxed) {
            return Err(MediaError::Denied("capture picker cancelled".to_string()));
        }
        let stream = MediaStream::new("screen", vec![MediaTrack::for_source(TrackSource::Screen, "screen")]);
        self.acquired.lock().push(stream.clone());
        Ok(stream)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerOp {
    AddTrack(String),
    CreateOffer,
    AcceptOffer,
    AcceptAnswer,
    AddCandidate,
    ReplaceVideo(String),
    Close,
}

pub struct FakePeer {
    link: PeerLink,
    ops: Mutex<Vec<PeerOp>>,
    fail_offer: bool,
    reject_candidates: AtomicBool,
    fail_close: AtomicBool,
    fail_replace: AtomicBool,
}

impl FakePeer {
    pub fn ops(&self) -> Vec<PeerOp> {
        self.ops.lock().clone()
    }

    fn count(&self, f: impl Fn(&PeerOp) -> bool) -> usize {
        self.ops.lock().iter().filter(|op| f(op)).count()
    }

    pub fn candidate_count(&self) -> usize {
        self.count(|op| *op == PeerOp::AddCandidate)
    }

    pub fn replace_count(&self) -> usize {
        self.count(|op| matches!(op, PeerOp::ReplaceVideo(_)))
    }

    /// Offers and answers, i.e. any renegotiation
    pub fn negotiation_count(&self) -> usize {
        self.count(|op| {
            matches!(
                op,
                PeerOp::CreateOffer | PeerOp::AcceptOffer | PeerOp::AcceptAnswer
            )
        })
    }

    pub fn close_attempted(&self) -> bool {
        self.count(|op| *op == PeerOp::Close) > 0
    }

    pub fn set_reject_candidates(&self, reject: bool) {
        self.reject_candidates.store(reject, Ordering::Relaxed);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_replace(&self, fail: bool) {
        self.fail_replace.store(fail, Ordering::Relaxed);
    }

    /// Raise an event as the WebRTC stack would from a callback
    pub fn emit(&self, event: PeerEvent) {
        self.link.emit(event);
    }

    pub fn generation(&self) -> u64 {
        self.link.generation
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError> {
        self.ops.lock().push(PeerOp::AddTrack(track.id().to_string()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, PeerError> {
        self.ops.lock().push(PeerOp::CreateOffer);
        if self.fail_offer {
            return Err(PeerError::Sdp("offer refused".to_string()));
        }
        Ok(format!("v=0 offer for {}", self.link.remote_id))
    }

    async fn accept_offer(&self, _sdp: &str) -> Result<String, PeerError> {
        self.ops.lock().push(PeerOp::AcceptOffer);
        Ok(format!("v=0 answer from {}", self.link.remote_id))
    }

    async fn accept_answer(&self, _sdp: &str) -> Result<(), PeerError> {
        self.ops.lock().push(PeerOp::AcceptAnswer);
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: &IceCandidate) -> Result<(), PeerError> {
        self.ops.lock().push(PeerOp::AddCandidate);
        if self.reject_candidates.load(Ordering::Relaxed) {
            return Err(PeerError::Ice("malformed candidate".to_string()));
        }
        Ok(())
    }

    async fn replace_video_track(&self, track: &MediaTrack) -> Result<(), PeerError> {
        self.ops.lock().push(PeerOp::ReplaceVideo(track.id().to_string()));
        if self.fail_replace.load(Ordering::Relaxed) {
            return Err(PeerError::Media("sender is gone".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.ops.lock().push(PeerOp::Close);
        if self.fail_close.load(Ordering::Relaxed) {
            return Err(PeerError::ConnectionFailed("transport already gone".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    peers: Mutex<HashMap<String, Arc<FakePeer>>>,
    fail_offers: AtomicBool,
}

impl FakeConnector {
    /// Latest connection created for `remote_id`
    pub fn peer(&self, remote_id: &str) -> Option<Arc<FakePeer>> {
        self.peers.lock().get(remote_id).cloned()
    }

    pub fn set_fail_offers(&self, fail: bool) {
        self.fail_offers.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, link: PeerLink) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let peer = Arc::new(FakePeer {
            link: link.clone(),
            ops: Mutex::new(Vec::new()),
            fail_offer: self.fail_offers.load(Ordering::Relaxed),
            reject_candidates: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            fail_replace: AtomicBool::new(false),
        });
        self.peers.lock().insert(link.remote_id.clone(), peer.clone());
        Ok(peer)
    }
}

/// Thumbnail capture that succeeds, fails or hangs
pub enum FakeThumbnails {
    Ok(String),
    Fail,
    Hang,
}

#[async_trait]
impl ThumbnailCapture for FakeThumbnails {
    async fn capture(&self, _stream: &MediaStream) -> Result<String, MediaError> {
        match self {
            FakeThumbnails::Ok(reference) => Ok(reference.clone()),
            FakeThumbnails::Fail => Err(MediaError::Source("no frame yet".to_string())),
            FakeThumbnails::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(MediaError::Source("unreachable".to_string()))
            }
        }
    }
}
