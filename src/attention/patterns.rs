//! Question and direct-address pattern sets.
//!
//! Patterns run against lowercased transcript text. The standard sets cover
//! interrogative shapes and common attention bids; callers can extend both
//! sets at runtime.

use crate::error::{AttuneError, Result};
use regex::Regex;

/// Compiled pattern sets for the attention rules.
pub struct PatternSet {
    question: Vec<Regex>,
    direct_address: Vec<Regex>,
}

impl PatternSet {
    /// The built-in pattern sets.
    pub fn standard() -> Self {
        let question = [
            // Terminal question mark
            r"\?\s*$",
            // Leading WH-word
            r"^(who|what|when|where|why|which|how)\b",
            // Leading auxiliary verb
            r"^(is|are|was|were|am|do|does|did|can|could|will|would|should|shall|may|might|have|has|had)\b",
            // Second person inside a question
            r"\b(you|your)\b.*\?",
        ];
        let direct_address = [
            // Greeting followed by a name
            r"^(hey|hi|hello|yo)\s+\w+",
            // Formal address terms
            r"\b(sir|ma'am|madam|miss|mister|mr|mrs|ms)\b",
            // Apology-style attention bids
            r"\b(excuse me|pardon me)\b",
            // Imperative attention bids
            r"^(look|listen)\b",
        ];
        Self {
            question: question.iter().map(|p| Regex::new(p).unwrap()).collect(),
            direct_address: direct_address
                .iter()
                .map(|p| Regex::new(p).unwrap())
                .collect(),
        }
    }

    /// Compile and add a question pattern.
    pub fn add_question(&mut self, pattern: &str) -> Result<()> {
        self.question.push(compile(pattern)?);
        Ok(())
    }

    /// Compile and add a direct-address pattern.
    pub fn add_direct_address(&mut self, pattern: &str) -> Result<()> {
        self.direct_address.push(compile(pattern)?);
        Ok(())
    }

    /// First question pattern matching the text, if any.
    pub fn matched_question(&self, text: &str) -> Option<String> {
        self.question
            .iter()
            .find(|regex| regex.is_match(text))
            .map(|regex| regex.as_str().to_string())
    }

    /// First direct-address pattern matching the text, if any.
    pub fn matched_direct_address(&self, text: &str) -> Option<String> {
        self.direct_address
            .iter()
            .find(|regex| regex.is_match(text))
            .map(|regex| regex.as_str().to_string())
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::standard()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AttuneError::InvalidInput {
        message: format!("invalid pattern '{pattern}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_question_mark() {
        let patterns = PatternSet::standard();
        assert!(patterns.matched_question("what time is it?").is_some());
        assert!(patterns.matched_question("it is late").is_none());
    }

    #[test]
    fn test_leading_wh_word() {
        let patterns = PatternSet::standard();
        assert!(patterns.matched_question("where did everyone go").is_some());
        assert!(patterns.matched_question("how about that").is_some());
        assert!(patterns.matched_question("somewhere over there").is_none());
    }

    #[test]
    fn test_leading_auxiliary() {
        let patterns = PatternSet::standard();
        assert!(patterns.matched_question("can we leave now").is_some());
        assert!(patterns.matched_question("did it work").is_some());
        assert!(patterns.matched_question("candy is great").is_none());
    }

    #[test]
    fn test_second_person_with_question_mark() {
        let patterns = PatternSet::standard();
        assert!(patterns.matched_question("i wonder if you knew that?").is_some());
        assert!(patterns
            .matched_question("i told you that yesterday")
            .is_none());
    }

    #[test]
    fn test_greeting_with_name() {
        let patterns = PatternSet::standard();
        assert!(patterns.matched_direct_address("hey alex").is_some());
        assert!(patterns.matched_direct_address("hello stranger").is_some());
        assert!(patterns.matched_direct_address("they said hello").is_none());
    }

    #[test]
    fn test_formal_address() {
        let patterns = PatternSet::standard();
        assert!(patterns
            .matched_direct_address("right this way sir")
            .is_some());
        assert!(patterns.matched_direct_address("thanks ma'am").is_some());
    }

    #[test]
    fn test_attention_bids() {
        let patterns = PatternSet::standard();
        assert!(patterns
            .matched_direct_address("excuse me for a second")
            .is_some());
        assert!(patterns.matched_direct_address("pardon me").is_some());
        assert!(patterns.matched_direct_address("listen up").is_some());
        assert!(patterns.matched_direct_address("look at this").is_some());
        assert!(patterns
            .matched_direct_address("outlook is cloudy")
            .is_none());
    }

    #[test]
    fn test_custom_question_pattern() {
        let mut patterns = PatternSet::standard();
        patterns.add_question(r"\bright\?$").unwrap();
        assert!(patterns.matched_question("we agreed, right?").is_some());
    }

    #[test]
    fn test_custom_direct_address_pattern() {
        let mut patterns = PatternSet::standard();
        patterns.add_direct_address(r"^oi\b").unwrap();
        assert!(patterns.matched_direct_address("oi mate").is_some());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut patterns = PatternSet::standard();
        let result = patterns.add_question("([unclosed");
        assert!(matches!(result, Err(AttuneError::InvalidInput { .. })));
    }

    #[test]
    fn test_match_reports_pattern_text() {
        let patterns = PatternSet::standard();
        let matched = patterns.matched_question("why not").unwrap();
        assert!(matched.contains("who|what|when|where|why"));
    }
}
