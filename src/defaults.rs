//! Default configuration constants for attune.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Audio sample rate in Hz expected from clients.
///
/// 16kHz mono S16_LE is the standard input for streaming speech recognition
/// and is what the transcription service consumes without resampling.
pub const SAMPLE_RATE: u32 = 16000;

/// Default sensitivity for both the ignore filter and attention escalation.
pub const SENSITIVITY: f32 = 0.7;

/// Default silence timeout before a dimmed client auto-restores (milliseconds).
pub const SILENCE_TIMEOUT_MS: u64 = 5000;

/// Minimum accepted silence timeout (milliseconds).
///
/// Anything shorter would restore volume mid-sentence.
pub const MIN_SILENCE_TIMEOUT_MS: u64 = 1000;

/// Default attention keywords checked against final transcripts.
pub const ATTENTION_KEYWORDS: [&str; 4] = ["hey", "hello", "excuse me", "hi"];

/// Per-session audio buffer capacity in frames.
///
/// Overflow drops the oldest frame; at typical 50ms frames this buffers
/// five seconds of audio.
pub const AUDIO_BUFFER_FRAMES: usize = 100;

/// Interval between heartbeat sweeps (seconds).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// A peer silent for this long is considered stale and terminated (seconds).
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Deadline for delivering the connection ack (milliseconds).
pub const ACK_DEADLINE_MS: u64 = 500;

/// Retry queue capacity for undelivered transcription audio.
pub const RETRY_QUEUE_CAPACITY: usize = 100;

/// Base delay for exponential-backoff retries (milliseconds).
pub const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Maximum retries before an audio segment is discarded.
pub const MAX_SEND_RETRIES: u32 = 5;

/// Consecutive failures of one operation before a warning event fires.
pub const FAILURE_WARNING_THRESHOLD: u32 = 3;

/// Circuit breaker: consecutive failures before the circuit opens.
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Circuit breaker: time the circuit stays open before a probe (seconds).
pub const BREAKER_RESET_TIMEOUT_SECS: u64 = 30;

/// Circuit breaker: successful probes required to close a half-open circuit.
pub const BREAKER_HALF_OPEN_PROBES: u32 = 3;

/// Rule confidence below which the LLM fallback is consulted.
pub const UNCERTAINTY_THRESHOLD: f32 = 0.5;

/// Attention context window: final transcripts retained for LLM prompts.
pub const CONTEXT_BUFFER_CAPACITY: usize = 10;

/// Final transcripts actually included in an LLM prompt.
pub const CONTEXT_PROMPT_WINDOW: usize = 5;

/// Per-request deadline for LLM calls (milliseconds).
pub const LLM_TIMEOUT_MS: u64 = 10_000;

/// Default HTTP control API port.
pub const CONTROL_PORT: u16 = 7860;

/// Default client WebSocket port.
pub const WS_PORT: u16 = 7861;

/// Default LLM generate endpoint (Ollama-compatible).
pub const LLM_ENDPOINT: &str = "http://127.0.0.1:11434/api/generate";

/// Default LLM model name.
pub const LLM_MODEL: &str = "llama3.2";

/// Default streaming transcription endpoint (Deepgram live API).
pub const STT_ENDPOINT: &str =
    "wss://api.deepgram.com/v1/listen?encoding=linear16&sample_rate=16000&channels=1&interim_results=true";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_timeout_respects_minimum() {
        assert!(SILENCE_TIMEOUT_MS >= MIN_SILENCE_TIMEOUT_MS);
    }

    #[test]
    fn heartbeat_timeout_exceeds_interval() {
        assert!(HEARTBEAT_TIMEOUT_SECS > HEARTBEAT_INTERVAL_SECS);
    }

    #[test]
    fn default_keywords_are_lowercase() {
        for kw in ATTENTION_KEYWORDS {
            assert_eq!(kw, kw.to_lowercase());
        }
    }
}
