use serde::{Deserialize, Serialize};

/// Default style/mood applied when the LLM response omits a field, or when
/// the response is not a JSON object at all (§3, §9).
pub const DEFAULT_STYLE: &str = "abstract";
pub const DEFAULT_MOOD: &str = "dynamic";

/// Short reactive visual prompt produced by Fast Brain on every flush.
/// Invariant: all three fields are non-empty on emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptResult {
    pub prompt: String,
    pub style: String,
    pub mood: String,
}

impl PromptResult {
    /// Build the fallback result for a raw accumulation text when the LLM
    /// is unreachable, times out, or returns something that isn't a JSON
    /// object (§4.C, §9 "Dynamic LLM response types").
    pub fn fallback(raw_text: &str) -> Self {
        let truncated: String = raw_text.chars().take(200).collect();
        Self {
            prompt: truncated,
            style: DEFAULT_STYLE.to_string(),
            mood: DEFAULT_MOOD.to_string(),
        }
    }

    /// Fill in defaults for any field missing from a parsed JSON object,
    /// falling back to the raw source text for an absent `prompt`.
    pub fn from_partial(
        prompt: Option<String>,
        style: Option<String>,
        mood: Option<String>,
        raw_text: &str,
    ) -> Self {
        Self {
            prompt: prompt
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| raw_text.chars().take(200).collect()),
            style: style.filter(|s| !s.is_empty()).unwrap_or_else(|| DEFAULT_STYLE.to_string()),
            mood: mood.filter(|s| !s.is_empty()).unwrap_or_else(|| DEFAULT_MOOD.to_string()),
        }
    }
}

/// Free-form long-horizon output from Slow Brain: either a text summary or
/// a richer visual description, depending on which timer fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryResult {
    pub text: String,
}

impl SummaryResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_truncates_to_200_chars() {
        let long = "x".repeat(500);
        let result = PromptResult::fallback(&long);
        assert_eq!(result.prompt.len(), 200);
        assert_eq!(result.style, DEFAULT_STYLE);
        assert_eq!(result.mood, DEFAULT_MOOD);
    }

    #[test]
    fn from_partial_fills_missing_fields() {
        let result = PromptResult::from_partial(Some("neon city".into()), None, None, "fallback text");
        assert_eq!(result.prompt, "neon city");
        assert_eq!(result.style, DEFAULT_STYLE);
        assert_eq!(result.mood, DEFAULT_MOOD);
    }

    #[test]
    fn from_partial_uses_raw_text_when_prompt_missing() {
        let result = PromptResult::from_partial(None, Some("noir".into()), Some("tense".into()), "hello world");
        assert_eq!(result.prompt, "hello world");
        assert_eq!(result.style, "noir");
        assert_eq!(result.mood, "tense");
    }
}
