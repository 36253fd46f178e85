//! HTTP server for health checks, session status and metrics

use crate::session::{SessionManager, SessionSnapshot};
use axum::{extract::State, routing::get, Json, Router};
use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

/// State shared with the HTTP handlers
#[derive(Clone)]
pub struct StatusState {
    manager: Arc<SessionManager>,
    started: Instant,
}

impl StatusState {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            manager,
            started: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/session", get(session_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve the status endpoint until the listener fails
pub async fn run_http_server(host: &str, port: u16, state: StatusState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP status server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    Ok(())
}

async fn health_handler(State(state): State<StatusState>) -> String {
    let session_state = state.manager.state().await;

    format!(
        r#"{{
  "status": "healthy",
  "uptime_seconds": {:.2},
  "session_state": "{}",
  "version": "{}"
}}"#,
        state.uptime().as_secs_f64(),
        session_state,
        env!("CARGO_PKG_VERSION")
    )
}

async fn session_handler(State(state): State<StatusState>) -> Json<SessionSnapshot> {
    Json(state.manager.snapshot().await)
}

/// Prometheus text format
async fn metrics_handler(State(state): State<StatusState>) -> String {
    let snapshot = state.manager.snapshot().await;
    let metrics = state.manager.metrics();

    format!(
        r#"# HELP livecast_uptime_seconds Process uptime in seconds
# TYPE livecast_uptime_seconds counter
livecast_uptime_seconds {}
# HELP livecast_session_active Whether a session is live locally
# TYPE livecast_session_active gauge
livecast_session_active {}
# HELP livecast_connections Current number of peer connections
# TYPE livecast_connections gauge
livecast_connections {}
# HELP livecast_connections_connected Peer connections that completed negotiation
# TYPE livecast_connections_connected gauge
livecast_connections_connected {}
# HELP livecast_viewers Viewer count reported by the signaling service
# TYPE livecast_viewers gauge
livecast_viewers {}
# HELP livecast_connections_opened_total Peer connections opened
# TYPE livecast_connections_opened_total counter
livecast_connections_opened_total {}
# HELP livecast_chat_messages_total Chat messages sent or received
# TYPE livecast_chat_messages_total counter
livecast_chat_messages_total {}
# HELP livecast_stalled_negotiations_total Connections closed by the negotiation timeout
# TYPE livecast_stalled_negotiations_total counter
livecast_stalled_negotiations_total {}
# HELP livecast_signaling_failures_total Signaling messages that could not be delivered
# TYPE livecast_signaling_failures_total counter
livecast_signaling_failures_total {}
# HELP livecast_track_replacements_total Outgoing video track swaps
# TYPE livecast_track_replacements_total counter
livecast_track_replacements_total {}
"#,
        state.uptime().as_secs_f64(),
        u8::from(snapshot.state.is_active()),
        snapshot.connections.len(),
        snapshot.connected,
        snapshot.viewer_count,
        metrics.connections_opened,
        metrics.chat_messages,
        metrics.stalled_negotiations,
        metrics.signaling_failures,
        metrics.track_replacements,
    )
}
