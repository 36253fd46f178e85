//! livecast-core - Main entry point
//!
//! Runs one live session as host or viewer against a WebSocket signaling service.

mod args;

use args::{Args, Role};
use clap::Parser;
use livecast_core::config::Config;
use livecast_core::media::{FileMediaSource, LogSink};
use livecast_core::peer::RtcPeerConnector;
use livecast_core::session::{SessionEvent, SessionManager, SessionState};
use livecast_core::signaling::WebSocketSignaling;
use livecast_core::web::{run_http_server, StatusState};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::task;

/// How long a viewer waits for its session to show up in the roster
const ROSTER_WAIT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let loaded = args.load_config();

    // Initialize logging with noise filtering for third-party WebRTC crates
    let log_level = match (&loaded, args.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(cfg), false) => cfg.logging.level.clone(),
        (Err(_), false) => "info".to_string(),
    };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("LIVECAST_LOG").unwrap_or(log_level))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .init();

    info!("livecast-core v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match loaded {
        Ok(cfg) => {
            info!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    };
    args.apply_overrides(&mut config);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    let (signaling, inbound) = WebSocketSignaling::connect(&config.signaling.url).await?;
    let manager = Arc::new(
        SessionManager::new(
            &config.session,
            Arc::new(signaling),
            Arc::new(FileMediaSource::new(config.media.clone())),
            Arc::new(RtcPeerConnector::new(config.webrtc.clone())),
        )
        .with_sink(Arc::new(LogSink)),
    );

    let mut events = manager.subscribe();
    let mut roster_events = manager.subscribe();
    let run_handle = task::spawn(manager.clone().run(inbound));

    let event_handle = task::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let http_handle = if config.http.enabled {
        let state = StatusState::new(manager.clone());
        let host = config.http.host.clone();
        let port = config.http.port;
        Some(task::spawn(async move {
            if let Err(e) = run_http_server(&host, port, state).await {
                error!("HTTP server error: {}", e);
            }
        }))
    } else {
        None
    };

    let mut session_events = manager.subscribe();
    let started = async {
        match args.role {
            Role::Host => {
                let info = manager.start_hosting().await?;
                info!("Session id: {}", info.id);
            }
            Role::Watch => {
                let session_id = args
                    .session
                    .clone()
                    .ok_or("--session is required with --role watch")?;
                wait_for_session(&manager, &mut roster_events, &session_id).await?;
                manager.join(&session_id).await?;
            }
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    }
    .await;
    drop(roster_events);

    if let Err(e) = &started {
        error!("Could not start session: {}", e);
    } else {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let shutdown = signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                event = session_events.recv() => {
                    if ends_command_loop(&event) {
                        break;
                    }
                }
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => {
                        if !handle_command(&manager, line.trim()).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("stdin error: {}", e);
                        break;
                    }
                },
            }
            if !manager.state().await.is_active() {
                info!("Session is over");
                break;
            }
        }
    }
    drop(session_events);

    info!("Initiating graceful shutdown...");
    let stopped = match manager.state().await {
        SessionState::Hosting => manager.stop_hosting().await,
        SessionState::Watching => manager.leave().await,
        _ => Ok(()),
    };
    if let Err(e) = stopped {
        warn!("Session teardown reported: {}", e);
    }

    for handle in [Some(run_handle), Some(event_handle), http_handle].into_iter().flatten() {
        if !handle.is_finished() {
            handle.abort();
            let _ = handle.await;
        }
    }

    info!("livecast-core stopped");
    started
}

async fn wait_for_session(
    manager: &SessionManager,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    session_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let wait = async {
        loop {
            if manager.known_sessions().await.iter().any(|s| s.id == session_id) {
                return Ok(());
            }
            match events.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Err("event stream closed".to_string()),
            }
        }
    };

    info!("Waiting for session {} to appear...", session_id);
    match tokio::time::timeout(ROSTER_WAIT, wait).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(format!("session {} did not appear within {:?}", session_id, ROSTER_WAIT).into()),
    }
}

/// The session ended remotely or the manager went away
fn ends_command_loop(event: &Result<SessionEvent, RecvError>) -> bool {
    match event {
        Ok(SessionEvent::SessionEnded { session_id, reason }) => {
            info!("Session {} ended ({}); exiting", session_id, reason);
            true
        }
        Ok(_) | Err(RecvError::Lagged(_)) => false,
        Err(RecvError::Closed) => true,
    }
}

/// Returns false when the user asked to quit
async fn handle_command(manager: &SessionManager, line: &str) -> bool {
    let result = match line {
        "" => return true,
        "/quit" => return false,
        "/mic" => manager.toggle_mic().await.map(|on| info!("Microphone {}", if on { "on" } else { "muted" })),
        "/video" => manager.toggle_video().await.map(|on| info!("Video {}", if on { "on" } else { "off" })),
        "/share" => manager.start_screen_share().await,
        "/unshare" => manager.stop_screen_share().await,
        text => manager.send_chat_message(text).await.map(|_| ()),
    };
    if let Err(e) = result {
        warn!("{}", e);
    }
    true
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Chat(message) if message.is_system => info!("* {}", message.text),
        SessionEvent::Chat(message) => info!("<{}> {}", message.author, message.text),
        SessionEvent::ViewerCount(count) => info!("Viewers: {}", count),
        SessionEvent::StreamError { message } => warn!("Stream error: {}", message),
        SessionEvent::Error(e) => warn!("{}", e),
        SessionEvent::SessionEnded { session_id, reason } => info!("Session {} ended ({})", session_id, reason),
        other => debug!("{:?}", other),
    }
}
