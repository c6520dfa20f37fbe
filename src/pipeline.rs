//! Pipeline orchestrator.
//!
//! Wires the stages together and manages the complete streaming flow:
//! Hub frames → VoiceFilter → TranscriptionBridge → AttentionEngine →
//! Dispatcher → Hub broadcast. Wiring is unidirectional: the dispatcher
//! ends in a command channel the hub drains, never a call back upstream.

use crate::attention::AttentionEngine;
use crate::config::Config;
use crate::dispatch::{DispatcherHandle, VolumeCommand};
use crate::filter::VoiceFilter;
use crate::hub::{ConnectionHub, HubEvent};
use crate::resilience::Resilience;
use crate::stt::{BridgeEvent, BridgeHandle};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observability events published by the pipeline stages.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A frame matched an ignore profile and was dropped before STT.
    FrameFiltered {
        client_id: Uuid,
        profile_id: String,
    },
    /// A transcript was fanned out to clients.
    TranscriptBroadcast { is_partial: bool },
    /// A volume command was fanned out to clients.
    CommandBroadcast(VolumeCommand),
}

/// Handle to the running pipeline stages.
pub struct PipelineHandle {
    tasks: Vec<tokio::task::JoinHandle<()>>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl PipelineHandle {
    /// Subscribe to pipeline observability events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Abort all pipeline stages.
    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Wire up and spawn all pipeline stages.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    hub: Arc<ConnectionHub>,
    hub_events: mpsc::Receiver<HubEvent>,
    filter: Arc<VoiceFilter>,
    bridge: BridgeHandle,
    bridge_events: mpsc::Receiver<BridgeEvent>,
    engine: Arc<Mutex<AttentionEngine>>,
    dispatcher: DispatcherHandle,
    command_rx: mpsc::Receiver<VolumeCommand>,
    config: Arc<RwLock<Config>>,
    resilience: Arc<Resilience>,
) -> PipelineHandle {
    let (event_tx, _) = broadcast::channel(256);

    let tasks = vec![
        tokio::spawn(frame_stage(
            hub_events,
            filter,
            bridge,
            event_tx.clone(),
        )),
        tokio::spawn(transcript_stage(
            bridge_events,
            Arc::clone(&hub),
            engine,
            dispatcher,
            config,
            event_tx.clone(),
        )),
        tokio::spawn(command_stage(command_rx, Arc::clone(&hub), event_tx.clone())),
        tokio::spawn(warning_stage(resilience.subscribe_warnings(), hub)),
    ];

    PipelineHandle { tasks, event_tx }
}

/// Filter inbound frames and feed the survivors to the bridge.
async fn frame_stage(
    mut hub_events: mpsc::Receiver<HubEvent>,
    filter: Arc<VoiceFilter>,
    bridge: BridgeHandle,
    event_tx: broadcast::Sender<PipelineEvent>,
) {
    while let Some(event) = hub_events.recv().await {
        match event {
            HubEvent::FrameArrived(frame) => {
                let result = filter.check(&frame.pcm).await;
                if result.is_match {
                    let _ = event_tx.send(PipelineEvent::FrameFiltered {
                        client_id: frame.client_id,
                        profile_id: result.profile_id.unwrap_or_default(),
                    });
                    continue;
                }
                if !bridge.feed(frame.pcm) {
                    debug!("bridge saturated, frame dropped");
                }
            }
            HubEvent::Connected(id) => debug!(client = %id, "pipeline saw connect"),
            HubEvent::Disconnected(id) => debug!(client = %id, "pipeline saw disconnect"),
            HubEvent::ClientConfig { client_id, .. } => {
                debug!(client = %client_id, "client config forwarded");
            }
        }
    }
    info!("frame stage stopped");
}

/// Broadcast transcripts; run finals through the attention engine.
async fn transcript_stage(
    mut bridge_events: mpsc::Receiver<BridgeEvent>,
    hub: Arc<ConnectionHub>,
    engine: Arc<Mutex<AttentionEngine>>,
    dispatcher: DispatcherHandle,
    config: Arc<RwLock<Config>>,
    event_tx: broadcast::Sender<PipelineEvent>,
) {
    while let Some(event) = bridge_events.recv().await {
        match event {
            BridgeEvent::Partial(transcript) => {
                hub.broadcast_transcript(&transcript).await;
                let _ = event_tx.send(PipelineEvent::TranscriptBroadcast { is_partial: true });
            }
            BridgeEvent::Final(transcript) => {
                hub.broadcast_transcript(&transcript).await;
                let _ = event_tx.send(PipelineEvent::TranscriptBroadcast { is_partial: false });

                let sensitivity = config.read().await.detection.sensitivity;
                let verdict = engine.lock().await.analyze(&transcript, sensitivity).await;
                debug!(kind = ?verdict.kind, text = %transcript.text, "verdict");
                dispatcher.deliver(verdict).await;
            }
            BridgeEvent::QueueOverflow { dropped } => {
                warn!(dropped, "transcription retry queue overflowed");
            }
            BridgeEvent::SegmentDiscarded { retries } => {
                warn!(retries, "audio segment discarded after retries");
            }
            BridgeEvent::SessionClosed { audio_segment_id } => {
                debug!(segment = %audio_segment_id, "transcription session closed");
            }
        }
    }
    info!("transcript stage stopped");
}

/// Fan dispatcher commands out to every client.
async fn command_stage(
    mut command_rx: mpsc::Receiver<VolumeCommand>,
    hub: Arc<ConnectionHub>,
    event_tx: broadcast::Sender<PipelineEvent>,
) {
    while let Some(command) = command_rx.recv().await {
        hub.broadcast_command(&command).await;
        let _ = event_tx.send(PipelineEvent::CommandBroadcast(command));
    }
    info!("command stage stopped");
}

/// Surface resilience warnings on the client channel.
async fn warning_stage(
    mut warnings: broadcast::Receiver<crate::resilience::Warning>,
    hub: Arc<ConnectionHub>,
) {
    loop {
        match warnings.recv().await {
            Ok(warning) => hub.broadcast_warning(&warning).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "warning feed lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
