//! LLM fallback client.
//!
//! Talks to an Ollama-compatible generate endpoint with a strict per-request
//! deadline. The model is asked for a JSON object `{directed, confidence,
//! reason}`; non-conforming responses fall back to a permissive extraction,
//! and unparseable ones yield a non-directed judgement rather than an error.

use crate::error::{AttuneError, Result};
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// The model's answer to "is this directed at the listener?".
#[derive(Debug, Clone, PartialEq)]
pub struct LlmJudgement {
    pub directed: bool,
    pub confidence: f32,
    pub reason: String,
}

impl LlmJudgement {
    /// Judgement used when the model's output cannot be understood.
    pub fn unparseable() -> Self {
        Self {
            directed: false,
            confidence: 0.0,
            reason: "could not parse".to_string(),
        }
    }
}

/// Seam to the external language model.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Classify a prompt; errors mean the service was unreachable.
    async fn classify(&self, prompt: &str) -> Result<LlmJudgement>;
}

/// Ollama-compatible HTTP client.
pub struct OllamaClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaClient {
    /// Create a client with the given endpoint, model, and request deadline.
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client construction cannot fail with these options"),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for OllamaClient {
    async fn classify(&self, prompt: &str) -> Result<LlmJudgement> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": 0.1, "num_predict": 100 },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AttuneError::LlmUnavailable {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AttuneError::LlmUnavailable {
                message: format!("status {}", response.status()),
            });
        }

        #[derive(Deserialize)]
        struct GenerateResponse {
            response: String,
        }

        let generated: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| AttuneError::LlmUnavailable {
                    message: e.to_string(),
                })?;

        Ok(parse_judgement(&generated.response))
    }
}

/// Parse the model's text into a judgement.
///
/// Tries strict JSON first (the whole string, then the outermost braces),
/// then a permissive field scrape.
pub fn parse_judgement(raw: &str) -> LlmJudgement {
    #[derive(Deserialize)]
    struct Shape {
        directed: bool,
        #[serde(default)]
        confidence: f32,
        #[serde(default)]
        reason: String,
    }

    let candidates = [Some(raw), extract_braced(raw)];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(shape) = serde_json::from_str::<Shape>(candidate) {
            return LlmJudgement {
                directed: shape.directed,
                confidence: shape.confidence.clamp(0.0, 1.0),
                reason: shape.reason,
            };
        }
    }

    // Last resort: scrape fields out of malformed output.
    let lowered = raw.to_lowercase();
    let directed = match scrape_bool(&lowered, "directed") {
        Some(value) => value,
        None => {
            debug!("unparseable model output: {raw}");
            return LlmJudgement::unparseable();
        }
    };
    let confidence = scrape_number(&lowered, "confidence").unwrap_or(0.0);
    LlmJudgement {
        directed,
        confidence: confidence.clamp(0.0, 1.0),
        reason: "extracted from malformed response".to_string(),
    }
}

fn extract_braced(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn scrape_bool(text: &str, field: &str) -> Option<bool> {
    let at = text.find(field)? + field.len();
    let rest = &text[at..];
    let true_at = rest.find("true");
    let false_at = rest.find("false");
    match (true_at, false_at) {
        (Some(t), Some(f)) => Some(t < f),
        (Some(_), None) => Some(true),
        (None, Some(_)) => Some(false),
        (None, None) => None,
    }
}

fn scrape_number(text: &str, field: &str) -> Option<f32> {
    let at = text.find(field)? + field.len();
    let rest = &text[at..];
    let digits: String = rest
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

/// Mock LLM for testing: scripted judgement or injected failure.
#[derive(Clone)]
pub struct MockLlm {
    judgement: Arc<Mutex<LlmJudgement>>,
    fail: Arc<Mutex<bool>>,
    calls: Arc<AtomicU32>,
}

impl MockLlm {
    /// Create a mock that answers "not directed" with zero confidence.
    pub fn new() -> Self {
        Self {
            judgement: Arc::new(Mutex::new(LlmJudgement {
                directed: false,
                confidence: 0.0,
                reason: "mock".to_string(),
            })),
            fail: Arc::new(Mutex::new(false)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Script the judgement returned by subsequent calls.
    pub fn with_judgement(self, directed: bool, confidence: f32) -> Self {
        *self.judgement.lock().unwrap() = LlmJudgement {
            directed,
            confidence,
            reason: "mock".to_string(),
        };
        self
    }

    /// Make subsequent calls fail.
    pub fn with_failure(self) -> Self {
        *self.fail.lock().unwrap() = true;
        self
    }

    /// Number of classify calls made.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmClient for MockLlm {
    async fn classify(&self, _prompt: &str) -> Result<LlmJudgement> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock().unwrap() {
            return Err(AttuneError::LlmUnavailable {
                message: "mock llm failure".to_string(),
            });
        }
        Ok(self.judgement.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_json() {
        let judgement =
            parse_judgement(r#"{"directed": true, "confidence": 0.9, "reason": "asked a question"}"#);
        assert!(judgement.directed);
        assert!((judgement.confidence - 0.9).abs() < 1e-6);
        assert_eq!(judgement.reason, "asked a question");
    }

    #[test]
    fn test_parse_json_wrapped_in_prose() {
        let raw = r#"Sure! Here's my answer: {"directed": false, "confidence": 0.2, "reason": "tv"} Hope that helps."#;
        let judgement = parse_judgement(raw);
        assert!(!judgement.directed);
        assert!((judgement.confidence - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_parse_malformed_fields_scraped() {
        let raw = "directed: true, confidence: 0.75 (they used your name)";
        let judgement = parse_judgement(raw);
        assert!(judgement.directed);
        assert!((judgement.confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_parse_hopeless_output_is_not_directed() {
        let judgement = parse_judgement("I am a language model and cannot answer that.");
        assert_eq!(judgement, LlmJudgement::unparseable());
        assert_eq!(judgement.reason, "could not parse");
    }

    #[test]
    fn test_parse_clamps_confidence() {
        let judgement = parse_judgement(r#"{"directed": true, "confidence": 7.5, "reason": ""}"#);
        assert_eq!(judgement.confidence, 1.0);
    }

    #[test]
    fn test_parse_missing_optional_fields() {
        let judgement = parse_judgement(r#"{"directed": true}"#);
        assert!(judgement.directed);
        assert_eq!(judgement.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_mock_llm_counts_calls() {
        let llm = MockLlm::new().with_judgement(true, 0.8);
        llm.classify("x").await.unwrap();
        llm.classify("y").await.unwrap();
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_llm_failure() {
        let llm = MockLlm::new().with_failure();
        let result = llm.classify("x").await;
        assert!(matches!(result, Err(AttuneError::LlmUnavailable { .. })));
        assert_eq!(llm.call_count(), 1);
    }
}
