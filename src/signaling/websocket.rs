//! WebSocket signaling client
//!
//! One writer task drains an unbounded channel into the socket; one reader task
//! parses text frames into [`InboundEvent`]s for the session manager.

use super::{InboundEvent, OutboundMessage, SignalingChannel, SignalingError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub struct WebSocketSignaling {
    tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    send_task: JoinHandle<()>,
    recv_task: JoinHandle<()>,
}

impl WebSocketSignaling {
    /// Connect and start the reader/writer tasks.
    ///
    /// Returns the channel handle and the stream of inbound events.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InboundEvent>), SignalingError> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SignalingError::Connect(format!("{}: {}", url, e)))?;
        info!("Signaling connected to {}", url);

        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundEvent>();
        let connected = Arc::new(AtomicBool::new(true));

        let send_connected = connected.clone();
        let send_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(Message::Text(msg)).await {
                    warn!("Signaling write failed: {}", e);
                    break;
                }
            }
            send_connected.store(false, Ordering::Relaxed);
            let _ = ws_sender.close().await;
        });

        let recv_connected = connected.clone();
        let recv_task = tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(Message::Text(text)) => match InboundEvent::parse(&text) {
                        Ok(event) => {
                            if inbound_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Dropping signaling frame: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        info!("Signaling connection closed by server");
                        break;
                    }
                    Ok(_) => {
                        debug!("Ignoring non-text signaling frame");
                    }
                    Err(e) => {
                        error!("Signaling WebSocket error: {}", e);
                        break;
                    }
                }
            }
            recv_connected.store(false, Ordering::Relaxed);
        });

        Ok((
            Self {
                tx,
                connected,
                send_task,
                recv_task,
            },
            inbound_rx,
        ))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Drop for WebSocketSignaling {
    fn drop(&mut self) {
        self.send_task.abort();
        self.recv_task.abort();
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignaling {
    async fn send(&self, message: OutboundMessage) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }
        let payload = message.to_json()?;
        debug!("Signaling -> {} ({})", message.event_name(), message.session_id());
        self.tx
            .send(payload)
            .map_err(|e| SignalingError::Send(format!("writer closed: {}", e)))
    }
}
