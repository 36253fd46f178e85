//! Scenario tests for the session manager against in-memory fakes

use super::*;
use crate::config::SessionConfig;
use crate::media::{RemoteTrackInfo, TrackKind};
use crate::peer::{ConnectionState, IceCandidate, PeerEvent, TransportState, HOST_PEER_ID};
use crate::signaling::{InboundEvent, OutboundMessage, SignalPayload};
use crate::testing::{FakeConnector, FakeMedia, FakeSignaling, FakeThumbnails};
use std::sync::Arc;
use tokio::sync::broadcast;

struct Harness {
    manager: Arc<SessionManager>,
    signaling: Arc<FakeSignaling>,
    media: Arc<FakeMedia>,
    connector: Arc<FakeConnector>,
    events: broadcast::Receiver<SessionEvent>,
}

fn config() -> SessionConfig {
    SessionConfig {
        identity: "host@example.com".to_string(),
        ..Default::default()
    }
}

fn harness_with(config: SessionConfig) -> Harness {
    let signaling = Arc::new(FakeSignaling::default());
    let media = Arc::new(FakeMedia::default());
    let connector = Arc::new(FakeConnector::default());
    let manager = Arc::new(SessionManager::new(
        &config,
        signaling.clone(),
        media.clone(),
        connector.clone(),
    ));
    let events = manager.subscribe();
    Harness {
        manager,
        signaling,
        media,
        connector,
        events,
    }
}

fn harness() -> Harness {
    harness_with(config())
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn errors(events: &[SessionEvent]) -> Vec<SessionError> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Error(err) => Some(err.clone()),
            _ => None,
        })
        .collect()
}

fn session(id: &str) -> SessionInfo {
    SessionInfo {
        id: id.to_string(),
        host_identity: "creator@example.com".to_string(),
        created_at: 1_700_000_000_000,
        viewer_count: 1,
        thumbnail_ref: None,
    }
}

fn answer(from: &str) -> InboundEvent {
    InboundEvent::Signal {
        from: from.to_string(),
        data: SignalPayload::Answer {
            sdp: "v=0 answer".to_string(),
        },
    }
}

fn chat(id: &str, timestamp: u64) -> InboundEvent {
    InboundEvent::Chat(ChatMessage {
        id: id.to_string(),
        author: "viewer@example.com".to_string(),
        text: format!("hello {}", id),
        is_system: false,
        timestamp,
        arrived_at: 0,
    })
}

async fn connect_viewer(h: &Harness, viewer: &str) {
    h.manager
        .handle_signal(InboundEvent::ViewerJoined {
            viewer_socket_id: viewer.to_string(),
        })
        .await;
    h.manager.handle_signal(answer(viewer)).await;
}

#[tokio::test]
async fn toggles_never_renegotiate() {
    let h = harness();
    h.manager.start_hosting().await.unwrap();
    connect_viewer(&h, "v1").await;

    let peer = h.connector.peer("v1").unwrap();
    let negotiations = peer.negotiation_count();
    let sent = h.signaling.sent().len();

    assert!(!h.manager.toggle_mic().await.unwrap());
    assert!(!h.manager.toggle_video().await.unwrap());
    assert!(h.manager.toggle_mic().await.unwrap());
    assert!(!h.manager.toggle_mic().await.unwrap());

    assert_eq!(peer.negotiation_count(), negotiations);
    assert_eq!(peer.replace_count(), 0);
    assert_eq!(h.signaling.sent().len(), sent);

    let camera = &h.media.acquired()[0];
    assert!(!camera.audio_track().unwrap().is_enabled());
    assert!(!camera.video_track().unwrap().is_enabled());
    let flags = h.manager.media_flags().await;
    assert!(!flags.mic_enabled);
    assert!(!flags.video_enabled);
}

#[tokio::test]
async fn screen_share_replaces_once_per_connected_viewer() {
    let h = harness();
    h.manager.start_hosting().await.unwrap();
    for viewer in ["v1", "v2", "v3"] {
        connect_viewer(&h, viewer).await;
    }

    h.manager.start_screen_share().await.unwrap();

    let screen = h.media.last_screen_track().unwrap();
    for viewer in ["v1", "v2", "v3"] {
        let peer = h.connector.peer(viewer).unwrap();
        assert_eq!(peer.replace_count(), 1, "{}", viewer);
        assert_eq!(h.signaling.offers_to(viewer), 1, "{}", viewer);
    }
    assert!(h.manager.media_flags().await.screen_sharing);
    assert_eq!(h.manager.metrics().track_replacements, 3);
    assert!(!screen.is_stopped());
}

#[tokio::test]
async fn viewer_joining_during_share_gets_screen_track() {
    let h = harness();
    h.manager.start_hosting().await.unwrap();
    h.manager.start_screen_share().await.unwrap();
    connect_viewer(&h, "v1").await;

    let screen = h.media.last_screen_track().unwrap();
    let conn_ops = h.connector.peer("v1").unwrap().ops();
    assert!(conn_ops.contains(&crate::testing::PeerOp::AddTrack(screen.id().to_string())));
}

#[tokio::test]
async fn failed_screen_swap_closes_and_reports_the_viewer() {
    let mut h = harness();
    h.manager.start_hosting().await.unwrap();
    connect_viewer(&h, "v1").await;
    connect_viewer(&h, "v2").await;
    h.connector.peer("v1").unwrap().set_fail_replace(true);
    drain(&mut h.events);

    h.manager.start_screen_share().await.unwrap();

    let events = drain(&mut h.events);
    let errs = errors(&events);
    assert_eq!(errs.len(), 1);
    assert!(matches!(errs[0], SessionError::Peer(crate::peer::PeerError::Media(_))));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::ConnectionClosed { remote_id } if remote_id == "v1")));
    assert!(h.connector.peer("v1").unwrap().close_attempted());
    assert_eq!(
        h.manager.connection_states().await,
        vec![("v2".to_string(), ConnectionState::Connected)]
    );
    assert!(h.manager.media_flags().await.screen_sharing);
}

#[tokio::test]
async fn failed_camera_swap_on_stop_share_closes_the_viewer() {
    let mut h = harness();
    h.manager.start_hosting().await.unwrap();
    connect_viewer(&h, "v1").await;
    h.manager.start_screen_share().await.unwrap();
    h.connector.peer("v1").unwrap().set_fail_replace(true);
    drain(&mut h.events);

    h.manager.stop_screen_share().await.unwrap();

    let events = drain(&mut h.events);
    assert_eq!(errors(&events).len(), 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::ConnectionClosed { remote_id } if remote_id == "v1")));
    assert!(h.manager.connection_states().await.is_empty());
    assert!(!h.manager.media_flags().await.screen_sharing);
}

#[tokio::test]
async fn failed_pending_swap_closes_viewer_without_rejecting_answer() {
    let mut h = harness();
    h.manager.start_hosting().await.unwrap();
    h.manager
        .handle_signal(InboundEvent::ViewerJoined {
            viewer_socket_id: "v1".to_string(),
        })
        .await;
    h.manager.start_screen_share().await.unwrap();
    h.connector.peer("v1").unwrap().set_fail_replace(true);
    drain(&mut h.events);

    h.manager.handle_signal(answer("v1")).await;

    let events = drain(&mut h.events);
    let errs = errors(&events);
    assert_eq!(errs.len(), 1);
    assert!(matches!(errs[0], SessionError::Peer(crate::peer::PeerError::Media(_))));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::ConnectionClosed { remote_id } if remote_id == "v1")));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::ConnectionStateChanged { .. })));
    let ops = h.connector.peer("v1").unwrap().ops();
    assert!(ops.contains(&crate::testing::PeerOp::AcceptAnswer));
    assert!(h.manager.connection_states().await.is_empty());
}

#[tokio::test]
async fn stop_screen_share_restores_camera() {
    let mut h = harness();
    h.manager.start_hosting().await.unwrap();
    connect_viewer(&h, "v1").await;
    h.manager.start_screen_share().await.unwrap();
    h.manager.stop_screen_share().await.unwrap();

    let camera = h.media.acquired()[0].video_track().unwrap().clone();
    let screen = h.media.last_screen_track().unwrap();
    let peer = h.connector.peer("v1").unwrap();
    assert_eq!(peer.replace_count(), 2);
    assert_eq!(
        peer.ops().last(),
        Some(&crate::testing::PeerOp::ReplaceVideo(camera.id().to_string()))
    );
    assert!(screen.is_stopped());
    assert!(!h.manager.media_flags().await.screen_sharing);
    assert!(errors(&drain(&mut h.events)).is_empty());
}

#[tokio::test]
async fn screen_capture_ending_stops_share() {
    let h = harness();
    h.manager.start_hosting().await.unwrap();
    connect_viewer(&h, "v1").await;
    h.manager.start_screen_share().await.unwrap();

    h.media.last_screen_track().unwrap().mark_ended();
    let mut handled = 0;
    for _ in 0..50 {
        tokio::task::yield_now().await;
        handled += h.manager.process_pending_events().await;
        if handled > 0 {
            break;
        }
    }

    assert_eq!(handled, 1);
    assert!(!h.manager.media_flags().await.screen_sharing);
    assert_eq!(h.connector.peer("v1").unwrap().replace_count(), 2);
}

#[tokio::test]
async fn join_unknown_session_fails() {
    let h = harness();
    h.manager
        .handle_signal(InboundEvent::StreamsUpdated(vec![session("s1")]))
        .await;

    let err = h.manager.join("s2").await.unwrap_err();
    assert_eq!(err, SessionError::SessionNotFound("s2".to_string()));
    assert_eq!(h.manager.state().await, SessionState::Idle);
    assert!(h.connector.peer(HOST_PEER_ID).is_none());
    assert!(h.signaling.sent().is_empty());
}

#[tokio::test]
async fn double_start_is_rejected() {
    let h = harness();
    let first = h.manager.start_hosting().await.unwrap();
    let err = h.manager.start_hosting().await.unwrap_err();

    assert_eq!(err, SessionError::AlreadyInSession);
    assert_eq!(h.manager.current_session().await.map(|s| s.id), Some(first.id));
    assert_eq!(h.signaling.sent_events(), vec!["create_stream"]);
    assert_eq!(h.media.acquired().len(), 1);
}

#[tokio::test]
async fn join_while_hosting_is_rejected() {
    let h = harness();
    h.manager
        .handle_signal(InboundEvent::StreamsUpdated(vec![session("s1")]))
        .await;
    h.manager.start_hosting().await.unwrap();
    assert_eq!(h.manager.join("s1").await.unwrap_err(), SessionError::AlreadyInSession);
    assert_eq!(h.manager.state().await, SessionState::Hosting);
}

#[tokio::test]
async fn stop_hosting_cleans_up_when_signaling_fails() {
    let mut h = harness();
    h.manager.start_hosting().await.unwrap();
    connect_viewer(&h, "v1").await;
    h.manager
        .handle_signal(InboundEvent::ViewerJoined {
            viewer_socket_id: "v2".to_string(),
        })
        .await;
    h.manager.start_screen_share().await.unwrap();
    h.connector.peer("v1").unwrap().set_fail_close(true);
    drain(&mut h.events);

    h.signaling.set_fail(true);
    h.manager.stop_hosting().await.unwrap();

    assert!(h.manager.connection_states().await.is_empty());
    assert_eq!(h.media.live_tracks(), 0);
    assert_eq!(h.manager.live_track_count().await, 0);
    assert_eq!(h.manager.state().await, SessionState::Idle);
    assert!(h.connector.peer("v1").unwrap().close_attempted());
    assert!(h.connector.peer("v2").unwrap().close_attempted());

    let events = drain(&mut h.events);
    let errs = errors(&events);
    assert_eq!(errs.len(), 1);
    assert!(matches!(errs[0], SessionError::SignalingDelivery(_)));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::SessionEnded { .. })));
    assert_eq!(h.manager.metrics().signaling_failures, 1);
}

#[tokio::test]
async fn teardown_passes_through_ending() {
    let mut h = harness();
    h.manager.start_hosting().await.unwrap();
    drain(&mut h.events);
    h.manager.stop_hosting().await.unwrap();

    let transitions: Vec<(SessionState, SessionState)> = drain(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (SessionState::Hosting, SessionState::Ending),
            (SessionState::Ending, SessionState::Ended),
            (SessionState::Ended, SessionState::Idle),
        ]
    );
    assert_eq!(h.signaling.sent_events(), vec!["create_stream", "stop_stream"]);
    assert!(h.manager.chat_log().await.is_empty());
}

#[tokio::test]
async fn chat_log_keeps_arrival_order() {
    let h = harness();
    h.manager.start_hosting().await.unwrap();
    h.manager.handle_signal(chat("c", 3_000)).await;
    h.manager.handle_signal(chat("a", 1_000)).await;
    h.manager.handle_signal(chat("b", 2_000)).await;
    let own = h.manager.send_chat_message("  hi all  ").await.unwrap();
    h.manager
        .handle_signal(InboundEvent::Chat(own.clone()))
        .await;

    let log = h.manager.chat_log().await;
    let ids: Vec<&str> = log.iter().filter(|m| !m.is_system).map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "a", "b", own.id.as_str()]);
    assert!(log.windows(2).all(|w| w[0].arrived_at <= w[1].arrived_at));
    assert_eq!(own.text, "hi all");
    assert!(log[0].is_system);
}

#[tokio::test]
async fn empty_chat_and_chat_outside_session_rejected() {
    let h = harness();
    assert_eq!(
        h.manager.send_chat_message("   ").await.unwrap_err(),
        SessionError::EmptyChatMessage
    );
    assert!(matches!(
        h.manager.send_chat_message("hello").await.unwrap_err(),
        SessionError::InvalidState { .. }
    ));
}

#[tokio::test]
async fn creator_end_to_end() {
    let h = harness();
    let info = h.manager.start_hosting().await.unwrap();
    h.manager
        .handle_signal(InboundEvent::ViewerJoined {
            viewer_socket_id: "v1".to_string(),
        })
        .await;

    assert_eq!(
        h.manager.connection_states().await,
        vec![("v1".to_string(), ConnectionState::Negotiating)]
    );
    assert_eq!(h.signaling.offers_to("v1"), 1);
    match &h.signaling.sent()[1] {
        OutboundMessage::Signal { session_id, .. } => assert_eq!(*session_id, info.id),
        other => panic!("Expected offer, got {:?}", other),
    }

    h.manager.handle_signal(answer("v1")).await;
    assert_eq!(
        h.manager.connection_states().await,
        vec![("v1".to_string(), ConnectionState::Connected)]
    );
    assert_eq!(h.manager.viewer_count().await, 0);

    h.manager
        .handle_signal(InboundEvent::ViewerCountUpdate {
            viewer_count: 5,
            session_id: Some(info.id.clone()),
        })
        .await;
    assert_eq!(h.manager.viewer_count().await, 5);
    assert_eq!(h.manager.connection_states().await.len(), 1);

    h.manager
        .handle_signal(InboundEvent::ViewerLeft {
            viewer_socket_id: "v1".to_string(),
        })
        .await;
    assert!(h.manager.connection_states().await.is_empty());
    assert_eq!(h.manager.viewer_count().await, 5);
}

#[tokio::test]
async fn viewer_end_to_end() {
    let mut h = harness_with(SessionConfig {
        identity: "viewer@example.com".to_string(),
        ..Default::default()
    });
    h.manager
        .handle_signal(InboundEvent::StreamsUpdated(vec![session("s1")]))
        .await;
    h.manager.join("s1").await.unwrap();

    assert_eq!(h.manager.state().await, SessionState::Watching);
    assert_eq!(
        h.manager.connection_states().await,
        vec![(HOST_PEER_ID.to_string(), ConnectionState::Negotiating)]
    );
    assert_eq!(h.signaling.sent_events(), vec!["join_stream"]);

    h.manager
        .handle_signal(InboundEvent::Signal {
            from: "host-sock".to_string(),
            data: SignalPayload::Offer {
                sdp: "v=0 offer".to_string(),
            },
        })
        .await;
    let replies = h.signaling.signals_to("host-sock");
    assert!(matches!(replies.as_slice(), [SignalPayload::Answer { .. }]));
    assert_eq!(
        h.manager.connection_states().await,
        vec![(HOST_PEER_ID.to_string(), ConnectionState::Connected)]
    );
    assert!(h.manager.remote_stream().await.is_none());

    let peer = h.connector.peer(HOST_PEER_ID).unwrap();
    peer.emit(PeerEvent::RemoteTrack(RemoteTrackInfo {
        id: "video-1".to_string(),
        stream_id: "camera".to_string(),
        kind: TrackKind::Video,
    }));
    drain(&mut h.events);
    assert_eq!(h.manager.process_pending_events().await, 1);

    let remote = h.manager.remote_stream().await.unwrap();
    assert_eq!(remote.tracks.len(), 1);
    assert!(drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, SessionEvent::RemoteStreamReady(_))));

    h.manager.leave().await.unwrap();
    assert_eq!(h.manager.state().await, SessionState::Idle);
    assert!(h.manager.remote_stream().await.is_none());
    assert_eq!(h.signaling.sent_events().last(), Some(&"leave_stream"));
}

#[tokio::test]
async fn viewer_queues_candidates_before_offer() {
    let h = harness();
    h.manager
        .handle_signal(InboundEvent::StreamsUpdated(vec![session("s1")]))
        .await;
    h.manager.join("s1").await.unwrap();

    let candidate = InboundEvent::Signal {
        from: "host-sock".to_string(),
        data: SignalPayload::Candidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        },
    };
    h.manager.handle_signal(candidate).await;
    let peer = h.connector.peer(HOST_PEER_ID).unwrap();
    assert_eq!(peer.candidate_count(), 0);

    h.manager
        .handle_signal(InboundEvent::Signal {
            from: "host-sock".to_string(),
            data: SignalPayload::Offer {
                sdp: "v=0 offer".to_string(),
            },
        })
        .await;
    assert_eq!(peer.candidate_count(), 1);
}

#[tokio::test]
async fn denied_screen_share_leaves_state_intact() {
    let mut h = harness();
    h.manager.start_hosting().await.unwrap();
    connect_viewer(&h, "v1").await;
    let peer = h.connector.peer("v1").unwrap();
    let ops_before = peer.ops();
    drain(&mut h.events);

    h.media.deny_screen(true);
    let err = h.manager.start_screen_share().await.unwrap_err();

    assert!(matches!(err, SessionError::MediaAcquisition(_)));
    assert_eq!(h.manager.state().await, SessionState::Hosting);
    assert!(!h.manager.media_flags().await.screen_sharing);
    assert_eq!(peer.ops(), ops_before);
    assert_eq!(
        h.manager.connection_states().await,
        vec![("v1".to_string(), ConnectionState::Connected)]
    );
    assert_eq!(errors(&drain(&mut h.events)).len(), 1);
}

#[tokio::test]
async fn denied_camera_keeps_idle() {
    let h = harness();
    h.media.deny_camera(true);
    let err = h.manager.start_hosting().await.unwrap_err();
    assert!(matches!(err, SessionError::MediaAcquisition(_)));
    assert_eq!(h.manager.state().await, SessionState::Idle);
    assert!(h.signaling.sent().is_empty());

    h.media.deny_camera(false);
    assert!(h.manager.start_hosting().await.is_ok());
}

#[tokio::test]
async fn stream_ended_forces_viewer_teardown() {
    let h = harness();
    h.manager
        .handle_signal(InboundEvent::StreamsUpdated(vec![session("s1")]))
        .await;
    h.manager.join("s1").await.unwrap();

    h.manager
        .handle_signal(InboundEvent::StreamEnded {
            session_id: "s1".to_string(),
        })
        .await;

    assert_eq!(h.manager.state().await, SessionState::Idle);
    assert!(h.manager.connection_states().await.is_empty());
    assert!(h.connector.peer(HOST_PEER_ID).unwrap().close_attempted());
    assert!(h.manager.known_sessions().await.is_empty());
    assert_eq!(h.signaling.sent_events(), vec!["join_stream"]);
}

#[tokio::test]
async fn stream_ended_for_other_session_is_ignored() {
    let h = harness();
    h.manager
        .handle_signal(InboundEvent::StreamsUpdated(vec![session("s1"), session("s2")]))
        .await;
    h.manager.join("s1").await.unwrap();
    h.manager
        .handle_signal(InboundEvent::StreamEnded {
            session_id: "s2".to_string(),
        })
        .await;
    assert_eq!(h.manager.state().await, SessionState::Watching);
    assert_eq!(h.manager.known_sessions().await.len(), 1);
}

#[tokio::test]
async fn stream_error_is_not_fatal() {
    let mut h = harness();
    h.manager.start_hosting().await.unwrap();
    drain(&mut h.events);
    h.manager
        .handle_signal(InboundEvent::StreamError {
            message: "relay overloaded".to_string(),
        })
        .await;
    assert_eq!(h.manager.state().await, SessionState::Hosting);
    assert!(drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, SessionEvent::StreamError { message } if message == "relay overloaded")));
}

#[tokio::test]
async fn stray_signals_after_teardown_are_noops() {
    let h = harness();
    h.manager.start_hosting().await.unwrap();
    h.manager
        .handle_signal(InboundEvent::ViewerJoined {
            viewer_socket_id: "v1".to_string(),
        })
        .await;
    let old_peer = h.connector.peer("v1").unwrap();
    h.manager.stop_hosting().await.unwrap();

    h.manager.handle_signal(answer("v1")).await;
    old_peer.emit(PeerEvent::LocalCandidate(IceCandidate {
        candidate: "candidate:9".to_string(),
        sdp_mid: None,
        sdp_mline_index: None,
    }));
    h.manager.process_pending_events().await;

    assert_eq!(h.manager.state().await, SessionState::Idle);
    assert!(!old_peer.ops().contains(&crate::testing::PeerOp::AcceptAnswer));
    assert!(h
        .signaling
        .signals_to("v1")
        .iter()
        .all(|p| !matches!(p, SignalPayload::Candidate { .. })));
}

#[tokio::test]
async fn local_candidates_are_forwarded_only_from_live_connection() {
    let h = harness();
    h.manager.start_hosting().await.unwrap();
    h.manager
        .handle_signal(InboundEvent::ViewerJoined {
            viewer_socket_id: "v1".to_string(),
        })
        .await;
    let stale = h.connector.peer("v1").unwrap();
    h.manager
        .handle_signal(InboundEvent::ViewerJoined {
            viewer_socket_id: "v1".to_string(),
        })
        .await;
    let live = h.connector.peer("v1").unwrap();
    assert_ne!(stale.generation(), live.generation());

    let candidate = IceCandidate {
        candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    };
    stale.emit(PeerEvent::LocalCandidate(candidate.clone()));
    live.emit(PeerEvent::LocalCandidate(candidate));
    assert_eq!(h.manager.process_pending_events().await, 2);

    let candidates = h
        .signaling
        .signals_to("v1")
        .into_iter()
        .filter(|p| matches!(p, SignalPayload::Candidate { .. }))
        .count();
    assert_eq!(candidates, 1);
    assert!(stale.close_attempted());
}

#[tokio::test]
async fn failed_transport_removes_connection() {
    let mut h = harness();
    h.manager.start_hosting().await.unwrap();
    connect_viewer(&h, "v1").await;
    drain(&mut h.events);

    h.connector
        .peer("v1")
        .unwrap()
        .emit(PeerEvent::Transport(TransportState::Failed));
    h.manager.process_pending_events().await;

    assert!(h.manager.connection_states().await.is_empty());
    assert!(drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, SessionEvent::ConnectionClosed { remote_id } if remote_id == "v1")));
    assert_eq!(h.manager.state().await, SessionState::Hosting);
}

#[tokio::test]
async fn stalled_negotiation_is_closed_and_reported() {
    let mut h = harness_with(SessionConfig {
        negotiation_timeout_secs: 0,
        ..config()
    });
    h.manager.start_hosting().await.unwrap();
    connect_viewer(&h, "v1").await;
    h.manager
        .handle_signal(InboundEvent::ViewerJoined {
            viewer_socket_id: "v2".to_string(),
        })
        .await;
    drain(&mut h.events);

    let stalled = h.manager.reap_stalled_negotiations().await;

    assert_eq!(stalled, vec!["v2".to_string()]);
    assert_eq!(
        h.manager.connection_states().await,
        vec![("v1".to_string(), ConnectionState::Connected)]
    );
    assert_eq!(
        errors(&drain(&mut h.events)),
        vec![SessionError::NegotiationStalled("v2".to_string())]
    );
    assert_eq!(h.manager.metrics().stalled_negotiations, 1);
}

#[tokio::test]
async fn thumbnail_failure_does_not_block_start() {
    for thumbnails in [FakeThumbnails::Hang, FakeThumbnails::Fail] {
        let manager = SessionManager::new(
            &SessionConfig {
                thumbnail_timeout_ms: 20,
                ..config()
            },
            Arc::new(FakeSignaling::default()),
            Arc::new(FakeMedia::default()),
            Arc::new(FakeConnector::default()),
        )
        .with_thumbnails(Arc::new(thumbnails));

        let info = manager.start_hosting().await.unwrap();
        assert_eq!(info.thumbnail_ref, None);
        assert_eq!(manager.state().await, SessionState::Hosting);
    }
}

#[tokio::test]
async fn thumbnail_reference_is_announced() {
    let signaling = Arc::new(FakeSignaling::default());
    let manager = SessionManager::new(
        &config(),
        signaling.clone(),
        Arc::new(FakeMedia::default()),
        Arc::new(FakeConnector::default()),
    )
    .with_thumbnails(Arc::new(FakeThumbnails::Ok("thumbs/s1.jpg".to_string())));

    let info = manager.start_hosting().await.unwrap();
    assert_eq!(info.thumbnail_ref.as_deref(), Some("thumbs/s1.jpg"));
    match &signaling.sent()[0] {
        OutboundMessage::CreateStream { thumbnail_ref, .. } => {
            assert_eq!(thumbnail_ref.as_deref(), Some("thumbs/s1.jpg"))
        }
        other => panic!("Expected create_stream, got {:?}", other),
    }
}

#[tokio::test]
async fn operations_in_wrong_state_are_rejected() {
    let h = harness();
    assert!(matches!(
        h.manager.toggle_mic().await.unwrap_err(),
        SessionError::InvalidState { operation: "toggle microphone", state: SessionState::Idle }
    ));
    assert!(matches!(h.manager.stop_hosting().await, Err(SessionError::InvalidState { .. })));
    assert!(matches!(h.manager.leave().await, Err(SessionError::InvalidState { .. })));
    assert!(matches!(
        h.manager.start_screen_share().await,
        Err(SessionError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn snapshot_reflects_session() {
    let h = harness();
    h.manager.start_hosting().await.unwrap();
    connect_viewer(&h, "v1").await;

    let snapshot = h.manager.snapshot().await;
    assert_eq!(snapshot.state, SessionState::Hosting);
    assert_eq!(snapshot.connections.len(), 1);
    assert_eq!(snapshot.connected, 1);
    assert!(snapshot.media.mic_enabled);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["state"], "hosting");
    assert_eq!(json["connections"][0]["state"], "connected");
    assert_eq!(json["media"]["screenSharing"], false);
}

#[tokio::test]
async fn run_loop_drives_inbound_events() {
    let h = harness();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let runner = tokio::spawn(h.manager.clone().run(rx));

    tx.send(InboundEvent::StreamsUpdated(vec![session("s1")])).unwrap();
    drop(tx);
    runner.await.unwrap();

    assert_eq!(h.manager.known_sessions().await.len(), 1);
}
