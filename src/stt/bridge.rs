//! Bridge between the audio pipeline and the streaming transcription service.
//!
//! Owns the single live STT session (lazy-opened on the first non-filtered
//! frame), routes partial and final transcripts downstream, and keeps a
//! bounded retry queue with exponential backoff for audio that could not be
//! delivered. Transport errors never propagate upstream; the pipeline always
//! continues with the next frame.

use crate::defaults;
use crate::error::{AttuneError, Result};
use crate::resilience::Resilience;
use crate::stt::{SttSession, SttStream, Transcript};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bridge connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Events emitted by the bridge.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// Interim transcript, display-only.
    Partial(Transcript),
    /// Stable transcript, feeds the attention engine.
    Final(Transcript),
    /// Retry queue dropped its oldest entry.
    QueueOverflow { dropped: usize },
    /// An audio segment exhausted its retries and was discarded.
    SegmentDiscarded { retries: u32 },
    /// The service closed the live session.
    SessionClosed { audio_segment_id: Uuid },
}

/// Bridge tuning parameters.
#[derive(Debug, Clone)]
pub struct TranscriptionBridgeConfig {
    pub retry_queue_capacity: usize,
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for TranscriptionBridgeConfig {
    fn default() -> Self {
        Self {
            retry_queue_capacity: defaults::RETRY_QUEUE_CAPACITY,
            max_retries: defaults::MAX_SEND_RETRIES,
            base_retry_delay: Duration::from_millis(defaults::BASE_RETRY_DELAY_MS),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Handle to a running bridge task.
#[derive(Clone)]
pub struct BridgeHandle {
    audio_tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: mpsc::Sender<()>,
    state_rx: watch::Receiver<BridgeState>,
}

impl BridgeHandle {
    /// Feed one PCM frame; returns false if the bridge is gone or saturated.
    pub fn feed(&self, pcm: Vec<u8>) -> bool {
        self.audio_tx.try_send(pcm).is_ok()
    }

    /// Current bridge state.
    pub fn state(&self) -> BridgeState {
        *self.state_rx.borrow()
    }

    /// Ask the bridge to close its session and stop.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

struct RetryItem {
    pcm: Vec<u8>,
    retries: u32,
    next_attempt: Instant,
}

enum LoopEvent {
    Frame(Option<Vec<u8>>),
    Result(Option<crate::stt::SttResult>),
    RetryDue,
    Shutdown,
}

/// The bridge actor.
pub struct TranscriptionBridge {
    stream: Arc<dyn SttStream>,
    resilience: Arc<Resilience>,
    config: TranscriptionBridgeConfig,
    event_tx: mpsc::Sender<BridgeEvent>,
    state_tx: watch::Sender<BridgeState>,
    session: Option<SttSession>,
    segment_id: Uuid,
    retry_queue: VecDeque<RetryItem>,
}

impl TranscriptionBridge {
    /// Spawn the bridge task and return its handle.
    pub fn spawn(
        stream: Arc<dyn SttStream>,
        resilience: Arc<Resilience>,
        config: TranscriptionBridgeConfig,
        event_tx: mpsc::Sender<BridgeEvent>,
    ) -> BridgeHandle {
        let (audio_tx, audio_rx) = mpsc::channel(defaults::AUDIO_BUFFER_FRAMES);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(BridgeState::Idle);

        let bridge = Self {
            stream,
            resilience,
            config,
            event_tx,
            state_tx,
            session: None,
            segment_id: Uuid::new_v4(),
            retry_queue: VecDeque::new(),
        };
        tokio::spawn(bridge.run(audio_rx, shutdown_rx));

        BridgeHandle {
            audio_tx,
            shutdown_tx,
            state_rx,
        }
    }

    async fn run(
        mut self,
        mut audio_rx: mpsc::Receiver<Vec<u8>>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        loop {
            let retry_due = !self.retry_queue.is_empty();
            let next_attempt = self
                .retry_queue
                .front()
                .map(|item| item.next_attempt)
                .unwrap_or_else(Instant::now);

            let event = if let Some(session) = self.session.as_mut() {
                tokio::select! {
                    frame = audio_rx.recv() => LoopEvent::Frame(frame),
                    result = session.results.recv() => LoopEvent::Result(result),
                    _ = tokio::time::sleep_until(next_attempt), if retry_due => LoopEvent::RetryDue,
                    _ = shutdown_rx.recv() => LoopEvent::Shutdown,
                }
            } else {
                tokio::select! {
                    frame = audio_rx.recv() => LoopEvent::Frame(frame),
                    _ = tokio::time::sleep_until(next_attempt), if retry_due => LoopEvent::RetryDue,
                    _ = shutdown_rx.recv() => LoopEvent::Shutdown,
                }
            };

            match event {
                LoopEvent::Frame(Some(pcm)) => self.handle_frame(pcm).await,
                LoopEvent::Frame(None) | LoopEvent::Shutdown => {
                    self.close_session().await;
                    let _ = self.state_tx.send(BridgeState::Closed);
                    break;
                }
                LoopEvent::Result(Some(result)) => self.route_result(result).await,
                LoopEvent::Result(None) => {
                    info!("transcription session closed by service");
                    self.session = None;
                    let _ = self.state_tx.send(BridgeState::Closed);
                    self.emit(BridgeEvent::SessionClosed {
                        audio_segment_id: self.segment_id,
                    })
                    .await;
                }
                LoopEvent::RetryDue => self.process_retry().await,
            }
        }
    }

    async fn handle_frame(&mut self, pcm: Vec<u8>) {
        if self.session.is_none() {
            self.try_connect().await;
        }

        // Queued audio must drain first to preserve arrival order.
        if self.session.is_none() || !self.retry_queue.is_empty() {
            self.enqueue(pcm);
            return;
        }

        if let Err(e) = self.send_now(&pcm).await {
            self.on_send_failure(e).await;
            self.enqueue(pcm);
        }
    }

    async fn send_now(&mut self, pcm: &[u8]) -> Result<()> {
        let session = self.session.as_mut().ok_or_else(|| AttuneError::SttUnavailable {
            message: "no live session".to_string(),
        })?;
        let result = session.sender.send_audio(pcm).await;
        if result.is_ok() {
            self.resilience.record_success("stt_send");
        }
        result
    }

    async fn on_send_failure(&mut self, error: AttuneError) {
        warn!("audio send failed: {error}");
        self.resilience.record_failure("stt_send", &error.to_string());
        self.resilience.breaker("stt").record_failure();
        self.session = None;
        let _ = self.state_tx.send(BridgeState::Closed);
    }

    async fn try_connect(&mut self) {
        let breaker = self.resilience.breaker("stt");
        if let Err(e) = breaker.check() {
            debug!("transcription connect gated: {e}");
            return;
        }

        let _ = self.state_tx.send(BridgeState::Connecting);
        let attempt = tokio::time::timeout(self.config.connect_timeout, self.stream.connect()).await;
        let result = match attempt {
            Ok(result) => result,
            Err(_) => Err(AttuneError::SttUnavailable {
                message: "connect timed out".to_string(),
            }),
        };

        match result {
            Ok(session) => {
                breaker.record_success();
                self.resilience.record_success("stt_connect");
                self.segment_id = Uuid::new_v4();
                self.session = Some(session);
                let _ = self.state_tx.send(BridgeState::Connected);
                info!(segment_id = %self.segment_id, "transcription session opened");
            }
            Err(e) => {
                breaker.record_failure();
                self.resilience.record_failure("stt_connect", &e.to_string());
                let _ = self.state_tx.send(BridgeState::Closed);
                warn!("transcription connect failed: {e}");
            }
        }
    }

    fn enqueue(&mut self, pcm: Vec<u8>) {
        if self.retry_queue.len() >= self.config.retry_queue_capacity {
            self.retry_queue.pop_front();
            let event = BridgeEvent::QueueOverflow { dropped: 1 };
            if self.event_tx.try_send(event).is_err() {
                debug!("event channel saturated, overflow event dropped");
            }
            warn!("retry queue full, oldest segment dropped");
        }
        let delay = self.config.base_retry_delay;
        self.retry_queue.push_back(RetryItem {
            pcm,
            retries: 0,
            next_attempt: Instant::now() + delay,
        });
    }

    async fn process_retry(&mut self) {
        let Some(mut item) = self.retry_queue.pop_front() else {
            return;
        };

        if self.session.is_none() {
            self.try_connect().await;
        }

        let outcome = match self.session.is_some() {
            true => self.send_now(&item.pcm).await,
            false => Err(AttuneError::SttUnavailable {
                message: "not connected".to_string(),
            }),
        };

        match outcome {
            Ok(()) => {
                debug!(retries = item.retries, "queued segment delivered");
            }
            Err(e) => {
                if self.session.is_some() {
                    // A live session rejected the send; tear it down.
                    self.on_send_failure(e).await;
                }
                item.retries += 1;
                if item.retries >= self.config.max_retries {
                    warn!(retries = item.retries, "segment discarded after retries");
                    self.emit(BridgeEvent::SegmentDiscarded {
                        retries: item.retries,
                    })
                    .await;
                } else {
                    item.next_attempt = Instant::now()
                        + self.config.base_retry_delay * 2u32.saturating_pow(item.retries);
                    self.retry_queue.push_front(item);
                }
            }
        }
    }

    async fn route_result(&mut self, result: crate::stt::SttResult) {
        let text = result.text.trim();
        if text.is_empty() {
            return;
        }
        let transcript = Transcript::new(
            text.to_string(),
            result.confidence,
            !result.is_final,
            self.segment_id,
        );
        let event = if result.is_final {
            BridgeEvent::Final(transcript)
        } else {
            BridgeEvent::Partial(transcript)
        };
        self.emit(event).await;
    }

    async fn emit(&self, event: BridgeEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("bridge event receiver gone");
        }
    }

    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = self.state_tx.send(BridgeState::Closing);
            session.sender.close().await;
        }
    }
}
