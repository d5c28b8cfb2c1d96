//! Query Understanding
//!
//! First pipeline stage: normalizes the raw user request into a
//! `QueryUnderstandingResult` (search intent, keywords, hard constraints and
//! metadata). Two interchangeable strategies implement the same trait:
//!
//! - [`RuleBasedUnderstanding`]: deterministic, no I/O
//! - [`LlmUnderstanding`]: one chat completion with a JSON output contract
//!
//! Which one runs is decided when the engine is built, never per request.

pub mod llm;
pub mod rule;

pub use llm::LlmUnderstanding;
pub use rule::RuleBasedUnderstanding;

use crate::text::{char_len, dedupe};
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{EngineRequest, JsonMap, QueryUnderstandingResult, UserTier};
use serde_json::Value;

/// Utterances at most this long are treated as "keep writing"
const SHORT_UTTERANCE_CHARS: usize = 6;

/// Phrases that signal a continuation request
const CONTINUATION_SIGNALS: &[&str] = &[
    "继续",
    "接着写",
    "接着",
    "续写",
    "往下写",
    "下一段",
    "再来一段",
    "continue",
    "keep going",
    "go on",
    "next part",
];

/// Query understanding stage
#[async_trait]
pub trait QueryUnderstanding: Send + Sync {
    /// Strategy name for logs and reports
    fn name(&self) -> &str;

    /// Turn the request into a structured search intent
    async fn understand(
        &self,
        request: &EngineRequest,
        tier: UserTier,
    ) -> Result<QueryUnderstandingResult, EngineError>;
}

/// True for short "keep writing" style utterances
pub fn is_continuation(query: &str) -> bool {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return false;
    }
    if char_len(trimmed) <= SHORT_UTTERANCE_CHARS {
        return true;
    }
    let lower = trimmed.to_lowercase();
    CONTINUATION_SIGNALS.iter().any(|s| lower.contains(s))
}

/// Search intent that explicitly anchors a continuation to the prior excerpt
pub fn continuation_intent(excerpt: &str, query: &str) -> String {
    format!(
        "Based on the prior excerpt “{}”, continue generating: {}",
        excerpt.trim(),
        query.trim()
    )
}

/// Constraint list from options, then context; options come first
pub(crate) fn collect_list(request: &EngineRequest, key: &str) -> Vec<String> {
    dedupe(
        request
            .option_list(key)
            .into_iter()
            .chain(request.context_list(key)),
    )
}

/// style / tone / genre (options override context), filters, tier
pub(crate) fn base_metadata(request: &EngineRequest, tier: UserTier) -> JsonMap {
    let mut metadata = JsonMap::new();

    for key in ["style", "tone", "genre"] {
        if let Some(value) = request.option_str(key).or_else(|| request.context_str(key)) {
            metadata.insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    if let Some(Value::Object(filters)) = request.options.get("filters") {
        metadata.insert("filters".to_string(), Value::Object(filters.clone()));
    }

    metadata.insert("tier".to_string(), Value::String(tier.label().to_string()));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_short_utterances_are_continuations() {
        assert!(is_continuation("继续"));
        assert!(is_continuation("more"));
        assert!(is_continuation("请接着写下去，主角要登场了"));
        assert!(is_continuation("Please CONTINUE the duel scene"));
        assert!(!is_continuation("写一段雪夜里两位剑客对决的场景"));
        assert!(!is_continuation("   "));
    }

    #[test]
    fn test_collect_list_options_first() {
        let req = EngineRequest::new("q")
            .with_option("must_include", json!(["剑", "雪"]))
            .with_context("must_include", json!(["雪", "月"]));
        assert_eq!(collect_list(&req, "must_include"), vec!["剑", "雪", "月"]);
    }

    #[test]
    fn test_base_metadata_option_overrides_context() {
        let req = EngineRequest::new("q")
            .with_context("style", json!("古风"))
            .with_option("style", json!("现代"))
            .with_context("tone", json!("沉郁"))
            .with_option("filters", json!({"book_id": 7}));
        let meta = base_metadata(&req, UserTier::Regular);
        assert_eq!(meta["style"], "现代");
        assert_eq!(meta["tone"], "沉郁");
        assert_eq!(meta["filters"]["book_id"], 7);
        assert_eq!(meta["tier"], "regular");
    }
}
