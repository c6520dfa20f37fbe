//! Deepgram live-streaming transcription backend.
//!
//! Speaks the Deepgram listen WebSocket protocol: binary PCM frames go up,
//! JSON result records come down. Only the transcript text, confidence, and
//! finality flag are consumed; every other response field is ignored.

use crate::error::{AttuneError, Result};
use crate::stt::{SttResult, SttSender, SttSession, SttStream};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Factory for Deepgram live sessions.
pub struct DeepgramStream {
    endpoint: String,
    api_key: String,
}

impl DeepgramStream {
    /// Create a stream factory for the given listen endpoint and API key.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl SttStream for DeepgramStream {
    async fn connect(&self) -> Result<SttSession> {
        let mut request =
            self.endpoint
                .as_str()
                .into_client_request()
                .map_err(|e| AttuneError::SttUnavailable {
                    message: format!("invalid endpoint: {e}"),
                })?;

        if !self.api_key.is_empty() {
            let value = format!("Token {}", self.api_key).parse().map_err(|_| {
                AttuneError::SttUnavailable {
                    message: "API key is not a valid header value".to_string(),
                }
            })?;
            request.headers_mut().insert("Authorization", value);
        }

        let (socket, _) =
            connect_async(request)
                .await
                .map_err(|e| AttuneError::SttUnavailable {
                    message: format!("websocket handshake failed: {e}"),
                })?;

        let (write, mut read) = socket.split();
        let (result_tx, result_rx) = mpsc::channel(100);

        // Reader task starts before the session is handed out, so results
        // arriving immediately after the handshake are never missed.
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Some(result) = parse_result(text.as_str()) {
                            debug!(
                                text = %result.text,
                                is_final = result.is_final,
                                "transcription result"
                            );
                            if result_tx.send(result).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("transcription stream closed by service");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("transcription stream read error: {e}");
                        break;
                    }
                }
            }
        });

        Ok(SttSession {
            sender: Box::new(DeepgramSender {
                write,
                closed: false,
            }),
            results: result_rx,
        })
    }
}

struct DeepgramSender {
    write: WsSink,
    closed: bool,
}

#[async_trait::async_trait]
impl SttSender for DeepgramSender {
    async fn send_audio(&mut self, pcm: &[u8]) -> Result<()> {
        self.write
            .send(Message::Binary(pcm.to_vec().into()))
            .await
            .map_err(|e| AttuneError::SttUnavailable {
                message: format!("audio send failed: {e}"),
            })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // CloseStream asks the service to flush pending results before
        // tearing the socket down.
        let _ = self
            .write
            .send(Message::Text(r#"{"type":"CloseStream"}"#.into()))
            .await;
        let _ = self.write.send(Message::Close(None)).await;
    }
}

/// Parse one service response into a result record.
///
/// Expected shape: `{"channel":{"alternatives":[{"transcript":..,
/// "confidence":..}]},"is_final":..}`. Metadata and unknown message kinds
/// return `None`.
fn parse_result(raw: &str) -> Option<SttResult> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let alternative = value.get("channel")?.get("alternatives")?.get(0)?;
    let text = alternative.get("transcript")?.as_str()?.to_string();
    let confidence = alternative
        .get("confidence")
        .and_then(|c| c.as_f64())
        .unwrap_or(0.0) as f32;
    let is_final = value
        .get("is_final")
        .and_then(|f| f.as_bool())
        .unwrap_or(false);

    Some(SttResult {
        text,
        confidence,
        is_final,
    })
}
