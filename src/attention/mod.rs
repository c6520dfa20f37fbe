//! Attention-detection decision engine.
//!
//! Classifies final transcripts as directed at the listener or not. Rules
//! run in a fixed order — keywords, then patterns, then soft signals — and
//! an optional LLM is consulted only when the rules are uncertain. The
//! engine never fails the caller: any LLM trouble silently degrades to the
//! rule-based verdict.

pub mod llm;
pub mod patterns;

pub use llm::{LlmClient, LlmJudgement, MockLlm, OllamaClient};
pub use patterns::PatternSet;

use crate::config::DetectionConfig;
use crate::defaults;
use crate::resilience::Resilience;
use crate::stt::Transcript;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Classification of a final transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    Ignore,
    ProbablyToMe,
    DefinitelyToMe,
}

/// Why the engine decided what it decided.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub matched_keywords: Vec<String>,
    pub matched_patterns: Vec<String>,
    pub llm_consulted: bool,
    pub llm_reason: Option<String>,
}

/// The engine's verdict for one final transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionVerdict {
    pub kind: VerdictKind,
    pub confidence: f32,
    pub explanation: Explanation,
}

/// Rule-plus-LLM attention classifier.
pub struct AttentionEngine {
    keywords: BTreeSet<String>,
    user_name: Option<String>,
    patterns: PatternSet,
    uncertainty_threshold: f32,
    llm_enabled: bool,
    llm: Option<Arc<dyn LlmClient>>,
    context: VecDeque<String>,
    resilience: Arc<Resilience>,
}

impl AttentionEngine {
    /// Build an engine from detection config and an optional LLM client.
    pub fn new(
        config: &DetectionConfig,
        llm: Option<Arc<dyn LlmClient>>,
        llm_enabled: bool,
        resilience: Arc<Resilience>,
    ) -> Self {
        let keywords = config
            .attention_keywords
            .iter()
            .filter_map(|kw| normalize_keyword(kw))
            .collect();
        Self {
            keywords,
            user_name: config.user_name.clone(),
            patterns: PatternSet::standard(),
            uncertainty_threshold: defaults::UNCERTAINTY_THRESHOLD,
            llm_enabled,
            llm,
            context: VecDeque::new(),
            resilience,
        }
    }

    /// Classify a final transcript at the given sensitivity.
    ///
    /// Partials are never analyzed; they come back `Ignore` untouched.
    pub async fn analyze(&mut self, transcript: &Transcript, sensitivity: f32) -> AttentionVerdict {
        if transcript.is_partial {
            debug!("partial transcript reached the engine, ignoring");
            return AttentionVerdict {
                kind: VerdictKind::Ignore,
                confidence: 1.0,
                explanation: Explanation::default(),
            };
        }

        let verdict = self.classify(&transcript.text, sensitivity).await;
        self.remember(&transcript.text);
        verdict
    }

    async fn classify(&self, text: &str, sensitivity: f32) -> AttentionVerdict {
        let lowered = text.to_lowercase();

        // 1. Keywords and the listener's name are decisive.
        let matched_keywords = self.matched_keywords(&lowered);
        if !matched_keywords.is_empty() {
            return AttentionVerdict {
                kind: VerdictKind::DefinitelyToMe,
                confidence: 0.95,
                explanation: Explanation {
                    matched_keywords,
                    ..Default::default()
                },
            };
        }

        // 2. Interrogative or direct-address shape.
        let matched_pattern = self
            .patterns
            .matched_question(&lowered)
            .or_else(|| self.patterns.matched_direct_address(&lowered));
        if let Some(pattern) = matched_pattern {
            return AttentionVerdict {
                kind: VerdictKind::ProbablyToMe,
                confidence: 0.7,
                explanation: Explanation {
                    matched_patterns: vec![pattern],
                    ..Default::default()
                },
            };
        }

        // 3. Soft signals; uncertain results may escalate to the LLM.
        let rule_confidence = rule_confidence(text, &lowered);
        if rule_confidence < self.uncertainty_threshold {
            if let Some(verdict) = self.consult_llm(text, sensitivity, rule_confidence).await {
                return verdict;
            }
        }

        AttentionVerdict {
            kind: VerdictKind::Ignore,
            confidence: 1.0 - rule_confidence,
            explanation: Explanation::default(),
        }
    }

    /// 4. LLM fallback. Returns `None` when the LLM is disabled, gated, or
    /// unavailable — the caller then falls back to the rule verdict.
    async fn consult_llm(
        &self,
        text: &str,
        sensitivity: f32,
        rule_confidence: f32,
    ) -> Option<AttentionVerdict> {
        if !self.llm_enabled {
            return None;
        }
        let llm = self.llm.as_ref()?;
        let breaker = self.resilience.breaker("llm");
        if breaker.check().is_err() {
            debug!("llm gated by open circuit");
            return None;
        }

        let prompt = self.build_prompt(text);
        match llm.classify(&prompt).await {
            Ok(judgement) => {
                breaker.record_success();
                self.resilience.record_success("llm");
                let adjusted = judgement.confidence * sensitivity;
                let kind = if !judgement.directed {
                    VerdictKind::Ignore
                } else if adjusted >= 0.8 {
                    VerdictKind::DefinitelyToMe
                } else if adjusted >= 0.5 {
                    VerdictKind::ProbablyToMe
                } else {
                    VerdictKind::Ignore
                };
                let confidence = match kind {
                    VerdictKind::Ignore => 1.0 - adjusted,
                    _ => adjusted,
                };
                Some(AttentionVerdict {
                    kind,
                    confidence,
                    explanation: Explanation {
                        llm_consulted: true,
                        llm_reason: Some(judgement.reason),
                        ..Default::default()
                    },
                })
            }
            Err(e) => {
                breaker.record_failure();
                self.resilience.record_failure("llm", &e.to_string());
                warn!("llm fallback unavailable, using rule verdict: {e}");
                Some(AttentionVerdict {
                    kind: VerdictKind::Ignore,
                    confidence: 1.0 - rule_confidence,
                    explanation: Explanation {
                        llm_consulted: true,
                        llm_reason: Some("llm_fallback".to_string()),
                        ..Default::default()
                    },
                })
            }
        }
    }

    fn matched_keywords(&self, lowered: &str) -> Vec<String> {
        let mut matched: Vec<String> = self
            .keywords
            .iter()
            .filter(|kw| lowered.contains(kw.as_str()))
            .cloned()
            .collect();
        if let Some(name) = &self.user_name {
            let name = name.to_lowercase();
            if !name.is_empty() && lowered.contains(&name) && !matched.contains(&name) {
                matched.push(name);
            }
        }
        matched
    }

    fn build_prompt(&self, text: &str) -> String {
        let mut prompt = String::from(
            "You are deciding whether speech overheard near a headphone user \
             is directed at them.\n",
        );
        let window: Vec<&String> = self
            .context
            .iter()
            .rev()
            .take(defaults::CONTEXT_PROMPT_WINDOW)
            .collect();
        if !window.is_empty() {
            prompt.push_str("Recent speech, oldest first:\n");
            for line in window.into_iter().rev() {
                prompt.push_str("- ");
                prompt.push_str(line);
                prompt.push('\n');
            }
        }
        prompt.push_str(&format!(
            "Current utterance: \"{text}\"\nAnswer with JSON only: \
             {{\"directed\": true|false, \"confidence\": 0.0-1.0, \"reason\": \"...\"}}"
        ));
        prompt
    }

    fn remember(&mut self, text: &str) {
        if self.context.len() >= defaults::CONTEXT_BUFFER_CAPACITY {
            self.context.pop_front();
        }
        self.context.push_back(text.to_string());
    }

    /// Add an attention keyword (normalized and deduplicated).
    pub fn add_keyword(&mut self, keyword: &str) -> bool {
        match normalize_keyword(keyword) {
            Some(keyword) => self.keywords.insert(keyword),
            None => false,
        }
    }

    /// Remove an attention keyword; returns whether it was present.
    pub fn remove_keyword(&mut self, keyword: &str) -> bool {
        match normalize_keyword(keyword) {
            Some(keyword) => self.keywords.remove(&keyword),
            None => false,
        }
    }

    /// Current keyword set.
    pub fn keywords(&self) -> Vec<String> {
        self.keywords.iter().cloned().collect()
    }

    /// Set or clear the listener's name.
    pub fn set_user_name(&mut self, name: Option<String>) {
        self.user_name = name.filter(|n| !n.trim().is_empty());
    }

    /// Add a question pattern.
    pub fn add_question_pattern(&mut self, pattern: &str) -> crate::error::Result<()> {
        self.patterns.add_question(pattern)
    }

    /// Add a direct-address pattern.
    pub fn add_direct_address_pattern(&mut self, pattern: &str) -> crate::error::Result<()> {
        self.patterns.add_direct_address(pattern)
    }

    /// Adjust when the LLM fallback kicks in.
    pub fn set_uncertainty_threshold(&mut self, threshold: f32) {
        self.uncertainty_threshold = threshold.clamp(0.0, 1.0);
    }

    /// Enable the LLM fallback.
    pub fn enable_llm(&mut self) {
        self.llm_enabled = true;
    }

    /// Disable the LLM fallback.
    pub fn disable_llm(&mut self) {
        self.llm_enabled = false;
    }

    /// Re-apply detection config (keywords and user name) wholesale.
    pub fn apply_detection_config(&mut self, config: &DetectionConfig) {
        self.keywords = config
            .attention_keywords
            .iter()
            .filter_map(|kw| normalize_keyword(kw))
            .collect();
        self.user_name = config.user_name.clone();
    }
}

fn normalize_keyword(keyword: &str) -> Option<String> {
    let normalized = keyword.trim().to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

/// Soft-signal confidence that a transcript is directed at the listener.
fn rule_confidence(original: &str, lowered: &str) -> f32 {
    let mut confidence = 0.0f32;
    if lowered.contains('?') {
        confidence += 0.2;
    }
    if has_word(lowered, "you") {
        confidence += 0.15;
    }
    if has_word(lowered, "your") {
        confidence += 0.1;
    }
    if original.len() < 50 {
        confidence += 0.1;
    }
    if original.chars().next().is_some_and(|c| c.is_uppercase()) {
        confidence += 0.05;
    }
    confidence.min(1.0)
}

fn has_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|token| token == word)
}
