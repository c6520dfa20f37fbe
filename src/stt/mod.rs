//! Streaming speech-to-text integration.
//!
//! Defines the transcript type shared across the pipeline, the `SttStream`
//! seam to the external transcription service, and the bridge that feeds
//! audio in and routes partial/final transcripts out.

pub mod bridge;
pub mod deepgram;

pub use bridge::{
    BridgeEvent, BridgeHandle, BridgeState, TranscriptionBridge, TranscriptionBridgeConfig,
};
pub use deepgram::DeepgramStream;

use crate::error::{AttuneError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// A transcript produced by the external transcription service.
///
/// Partials are display-only and may be revised; only finals feed the
/// attention engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub id: Uuid,
    pub text: String,
    /// Service-reported confidence in [0, 1].
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    pub is_partial: bool,
    /// Ties the transcript to the streaming session it came from.
    pub audio_segment_id: Uuid,
}

impl Transcript {
    /// Creates a transcript stamped with the current time.
    pub fn new(text: String, confidence: f32, is_partial: bool, audio_segment_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
            is_partial,
            audio_segment_id,
        }
    }
}

/// One decoded result record from the transcription service.
///
/// The bridge depends on exactly these three fields of the service's
/// response; everything else the service sends is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct SttResult {
    pub text: String,
    pub confidence: f32,
    pub is_final: bool,
}

/// A live streaming session.
///
/// The result receiver is wired up by `connect` before any audio is
/// written, so early results cannot be missed.
pub struct SttSession {
    pub sender: Box<dyn SttSender>,
    pub results: mpsc::Receiver<SttResult>,
}

/// Write side of a streaming session.
#[async_trait::async_trait]
pub trait SttSender: Send + Sync {
    /// Forward raw 16kHz mono S16_LE PCM.
    async fn send_audio(&mut self, pcm: &[u8]) -> Result<()>;

    /// Close the session, flushing any in-flight audio.
    async fn close(&mut self);
}

/// Factory for streaming transcription sessions.
///
/// This trait allows swapping implementations (real Deepgram vs mock).
#[async_trait::async_trait]
pub trait SttStream: Send + Sync {
    /// Open a new streaming session.
    async fn connect(&self) -> Result<SttSession>;
}

/// Mock STT stream for testing.
///
/// Results pushed with [`MockStt::push_result`] (or scripted up front) flow
/// to the live session; connect and send failures can be injected to
/// exercise retry and breaker paths.
#[derive(Clone, Default)]
pub struct MockStt {
    scripted: Arc<Mutex<Vec<SttResult>>>,
    live_tx: Arc<Mutex<Option<mpsc::Sender<SttResult>>>>,
    connect_failures: Arc<AtomicU32>,
    send_failures: Arc<AtomicU32>,
    connects: Arc<AtomicU32>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockStt {
    /// Create a mock with no scripted results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script results every new session emits immediately.
    pub fn with_results(self, results: Vec<SttResult>) -> Self {
        *self.scripted.lock().unwrap() = results;
        self
    }

    /// Fail the next `count` connect attempts.
    pub fn with_connect_failures(self, count: u32) -> Self {
        self.connect_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` audio sends.
    pub fn with_send_failures(self, count: u32) -> Self {
        self.send_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Number of successful connects so far.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Audio payloads successfully sent, in order.
    pub fn sent_audio(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// Push a result to the most recently opened session.
    pub async fn push_result(&self, result: SttResult) {
        let tx = self.live_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(result).await;
        }
    }

    /// Drop the live session's result feed, as a service-side close would.
    pub fn close_live(&self) {
        *self.live_tx.lock().unwrap() = None;
    }
}

#[async_trait::async_trait]
impl SttStream for MockStt {
    async fn connect(&self) -> Result<SttSession> {
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AttuneError::SttUnavailable {
                message: "mock connect failure".to_string(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (result_tx, result_rx) = mpsc::channel(100);
        for result in self.scripted.lock().unwrap().iter().cloned() {
            let _ = result_tx.try_send(result);
        }
        *self.live_tx.lock().unwrap() = Some(result_tx);

        Ok(SttSession {
            sender: Box::new(MockSttSender {
                send_failures: Arc::clone(&self.send_failures),
                sent: Arc::clone(&self.sent),
            }),
            results: result_rx,
        })
    }
}

struct MockSttSender {
    send_failures: Arc<AtomicU32>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait::async_trait]
impl SttSender for MockSttSender {
    async fn send_audio(&mut self, pcm: &[u8]) -> Result<()> {
        let remaining = self.send_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.send_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AttuneError::SttUnavailable {
                message: "mock send failure".to_string(),
            });
        }
        self.sent.lock().unwrap().push(pcm.to_vec());
        Ok(())
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_clamps_confidence() {
        let t = Transcript::new("hi".to_string(), 1.7, false, Uuid::new_v4());
        assert_eq!(t.confidence, 1.0);

        let t = Transcript::new("hi".to_string(), -0.3, false, Uuid::new_v4());
        assert_eq!(t.confidence, 0.0);
    }

    #[test]
    fn test_transcript_json_roundtrip() {
        let transcript = Transcript::new("hello there".to_string(), 0.92, true, Uuid::new_v4());
        let json = serde_json::to_string(&transcript).unwrap();
        let parsed: Transcript = serde_json::from_str(&json).unwrap();
        assert_eq!(transcript, parsed);
    }

    #[test]
    fn test_transcript_wire_field_names() {
        let transcript = Transcript::new("hey".to_string(), 0.5, false, Uuid::new_v4());
        let json = serde_json::to_string(&transcript).unwrap();
        assert!(json.contains("\"isPartial\""));
        assert!(json.contains("\"audioSegmentId\""));
        assert!(!json.contains("\"is_partial\""));
    }

    #[tokio::test]
    async fn test_mock_stt_records_sent_audio() {
        let stt = MockStt::new();
        let mut session = stt.connect().await.unwrap();

        session.sender.send_audio(&[1, 2, 3]).await.unwrap();
        session.sender.send_audio(&[4, 5]).await.unwrap();

        assert_eq!(stt.sent_audio(), vec![vec![1, 2, 3], vec![4, 5]]);
        assert_eq!(stt.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_stt_connect_failures_exhaust() {
        let stt = MockStt::new().with_connect_failures(2);

        assert!(stt.connect().await.is_err());
        assert!(stt.connect().await.is_err());
        assert!(stt.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_stt_send_failures_exhaust() {
        let stt = MockStt::new().with_send_failures(1);
        let mut session = stt.connect().await.unwrap();

        assert!(session.sender.send_audio(&[0]).await.is_err());
        assert!(session.sender.send_audio(&[0]).await.is_ok());
        assert_eq!(stt.sent_audio().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_stt_emits_scripted_then_pushed_results() {
        let stt = MockStt::new().with_results(vec![SttResult {
            text: "partial".to_string(),
            confidence: 0.4,
            is_final: false,
        }]);
        let mut session = stt.connect().await.unwrap();

        let first = session.results.recv().await.unwrap();
        assert!(!first.is_final);

        stt.push_result(SttResult {
            text: "final".to_string(),
            confidence: 0.9,
            is_final: true,
        })
        .await;
        let second = session.results.recv().await.unwrap();
        assert!(second.is_final);
        assert_eq!(second.text, "final");
    }
}
