//! Client connection hub.
//!
//! Accepts WebSocket connections, assigns sessions, buffers inbound audio,
//! fans server messages out to every connected client, and enforces the
//! heartbeat/liveness state machine. Each connection runs a receive loop,
//! an outbound writer task, and a buffer-forwarder task; the hub never
//! blocks the pipeline on a slow client.

pub mod protocol;
pub mod session;

pub use protocol::{AckPayload, ClientMessage, ServerMessage};
pub use session::{AudioBuffer, AudioFrame, ClientSession, Liveness, Outbound, PushOutcome};

use crate::clock::Clock;
use crate::defaults;
use crate::dispatch::VolumeCommand;
use crate::error::{AttuneError, Result};
use crate::resilience::Warning;
use crate::stt::Transcript;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hub timing parameters.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(defaults::HEARTBEAT_INTERVAL_SECS),
            heartbeat_timeout: Duration::from_secs(defaults::HEARTBEAT_TIMEOUT_SECS),
        }
    }
}

/// Events the hub publishes to the pipeline.
#[derive(Debug, Clone)]
pub enum HubEvent {
    Connected(Uuid),
    FrameArrived(AudioFrame),
    Disconnected(Uuid),
    /// Client settings blob; the core forwards it without interpretation.
    ClientConfig {
        client_id: Uuid,
        payload: serde_json::Value,
    },
}

/// The connection hub.
pub struct ConnectionHub {
    config: HubConfig,
    clock: Arc<dyn Clock>,
    sessions: RwLock<HashMap<Uuid, Arc<ClientSession>>>,
    event_tx: mpsc::Sender<HubEvent>,
}

impl ConnectionHub {
    /// Creates a hub publishing events into `event_tx`.
    pub fn new(
        config: HubConfig,
        clock: Arc<dyn Clock>,
        event_tx: mpsc::Sender<HubEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            sessions: RwLock::new(HashMap::new()),
            event_tx,
        })
    }

    /// Serve WebSocket connections on an already-bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let router = Router::new()
            .route("/", any(ws_upgrade))
            .route("/ws", any(ws_upgrade))
            .with_state(self);
        axum::serve(listener, router)
            .await
            .map_err(|e| AttuneError::Transport {
                message: format!("websocket server failed: {e}"),
            })
    }

    /// Currently connected sessions.
    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Fan a transcript out to every connected client.
    pub async fn broadcast_transcript(&self, transcript: &Transcript) {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            session.send(ServerMessage::transcript(transcript.clone()));
        }
    }

    /// Fan a volume command out to every connected client.
    pub async fn broadcast_command(&self, command: &VolumeCommand) {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            session.send(ServerMessage::volume_action(command.clone(), session.id));
        }
    }

    /// Fan a degraded-operation warning out to every connected client.
    pub async fn broadcast_warning(&self, warning: &Warning) {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            session.send(ServerMessage::warning(warning.clone()));
        }
    }

    /// Terminate a session: close its socket, release its buffer, publish
    /// exactly one disconnected event.
    pub async fn terminate(&self, id: Uuid) {
        let session = self.sessions.write().await.remove(&id);
        if let Some(session) = session {
            if session.begin_termination() {
                session.cancel();
                info!(client = %id, "session terminated");
                let _ = self.event_tx.send(HubEvent::Disconnected(id)).await;
            }
        }
    }

    /// Terminate every session (server shutdown).
    pub async fn terminate_all(&self) {
        let ids: Vec<Uuid> = self.sessions.read().await.keys().copied().collect();
        for id in ids {
            self.terminate(id).await;
        }
    }

    /// Spawn the periodic liveness sweep.
    pub fn spawn_heartbeat_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hub.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately and sweeps a fresh, all-alive map
            loop {
                ticker.tick().await;
                hub.sweep().await;
            }
        })
    }

    /// One liveness pass: terminate stale peers, ping the rest.
    async fn sweep(&self) {
        let now = self.clock.now();
        let sessions: Vec<Arc<ClientSession>> =
            self.sessions.read().await.values().cloned().collect();

        for session in sessions {
            let silent_for = session.liveness.since_last_heartbeat(now);
            let was_alive = session.liveness.take_alive();
            if !was_alive || silent_for > self.config.heartbeat_timeout {
                warn!(client = %session.id, ?silent_for, "peer stale, terminating");
                self.terminate(session.id).await;
            } else {
                session.send_ping();
            }
        }
    }

    /// Drive one accepted WebSocket connection to completion.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let (session, outbound_rx, cancel_rx) = ClientSession::new(&*self.clock);
        let id = session.id;
        self.sessions.write().await.insert(id, Arc::clone(&session));
        let _ = self.event_tx.send(HubEvent::Connected(id)).await;
        info!(client = %id, "client connected");

        let (ws_tx, ws_rx) = socket.split();
        let writer = tokio::spawn(write_loop(ws_tx, outbound_rx, cancel_rx.clone()));

        // Ack goes out first, well inside the 500ms deadline
        session.send(ServerMessage::ack(id));

        let forwarder = tokio::spawn(forward_frames(
            Arc::clone(&session),
            self.event_tx.clone(),
            cancel_rx.clone(),
        ));

        self.receive_loop(&session, ws_rx, cancel_rx).await;

        self.terminate(id).await;
        let _ = writer.await;
        let _ = forwarder.await;
    }

    async fn receive_loop(
        &self,
        session: &Arc<ClientSession>,
        mut ws_rx: SplitStream<WebSocket>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        loop {
            let next = tokio::select! {
                _ = cancel_rx.changed() => break,
                next = ws_rx.next() => next,
            };
            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    warn!(client = %session.id, "socket error: {e}");
                    break;
                }
                None => break,
            };

            match message {
                Message::Binary(data) => self.on_audio(session, data.to_vec()),
                Message::Text(text) => self.on_control(session, text.as_str()).await,
                Message::Pong(_) => session.liveness.refresh(self.clock.now()),
                // The websocket layer answers pings with pongs on its own
                Message::Ping(_) => {}
                Message::Close(_) => break,
            }
        }
    }

    fn on_audio(&self, session: &Arc<ClientSession>, pcm: Vec<u8>) {
        let frame = AudioFrame {
            client_id: session.id,
            sequence: session.next_sequence(),
            received_at: self.clock.now(),
            pcm,
        };
        let outcome = session.buffer.lock().unwrap().push(frame);
        if let PushOutcome::DroppedOldest { warn: true } = outcome {
            warn!(client = %session.id, "audio buffer overflow, dropping oldest frames");
        }
        session.buffer_notify.notify_one();
    }

    async fn on_control(&self, session: &Arc<ClientSession>, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(ClientMessage::Heartbeat { .. }) => {
                session.liveness.refresh(self.clock.now());
                session.send(ServerMessage::heartbeat());
            }
            Ok(ClientMessage::Config { payload, .. }) => {
                let _ = self
                    .event_tx
                    .send(HubEvent::ClientConfig {
                        client_id: session.id,
                        payload,
                    })
                    .await;
            }
            Err(e) => {
                // Malformed control traffic is dropped; the session stays up
                debug!(client = %session.id, "malformed client message: {e}");
            }
        }
    }
}

async fn ws_upgrade(State(hub): State<Arc<ConnectionHub>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| hub.handle_socket(socket))
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    loop {
        let outbound = tokio::select! {
            _ = cancel_rx.changed() => break,
            outbound = outbound_rx.recv() => outbound,
        };
        let Some(outbound) = outbound else { break };

        let message = match outbound {
            Outbound::Message(message) => match message.to_json() {
                Ok(json) => Message::Text(json.into()),
                Err(e) => {
                    warn!("failed to serialize server message: {e}");
                    continue;
                }
            },
            Outbound::Ping => Message::Ping(Vec::new().into()),
        };
        if ws_tx.send(message).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

/// Pump buffered frames into the pipeline in arrival order.
async fn forward_frames(
    session: Arc<ClientSession>,
    event_tx: mpsc::Sender<HubEvent>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    loop {
        if *cancel_rx.borrow() {
            break;
        }
        let frame = session.buffer.lock().unwrap().pop();
        match frame {
            Some(frame) => {
                if event_tx.send(HubEvent::FrameArrived(frame)).await.is_err() {
                    break;
                }
            }
            None => {
                tokio::select! {
                    _ = session.buffer_notify.notified() => {}
                    _ = cancel_rx.changed() => {}
                }
            }
        }
    }
}
