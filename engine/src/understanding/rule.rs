//! Rule-based query understanding
//!
//! Deterministic and side-effect free. Collects constraint lists from the
//! request, detects continuation requests and anchors them to the last
//! excerpt, and folds known entities into the keywords for VIP requests.

use super::{base_metadata, collect_list, continuation_intent, is_continuation, QueryUnderstanding};
use crate::text::dedupe;
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{EngineRequest, QueryUnderstandingResult, UserTier};
use serde_json::Value;

#[derive(Debug, Default, Clone)]
pub struct RuleBasedUnderstanding;

impl RuleBasedUnderstanding {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core, shared with the LLM strategy's fallback path
    pub fn analyze(&self, request: &EngineRequest, tier: UserTier) -> QueryUnderstandingResult {
        let query = request.user_query.trim();

        let mut keywords = collect_list(request, "keywords");
        if tier == UserTier::Vip {
            keywords = dedupe(keywords.into_iter().chain(request.context_list("entities")));
        }

        let continuation = is_continuation(query);
        let search_intent = match (continuation, request.context_str("last_excerpt")) {
            (true, Some(excerpt)) => continuation_intent(excerpt, query),
            _ => query.to_string(),
        };

        let mut metadata = base_metadata(request, tier);
        metadata.insert("continuation".to_string(), Value::Bool(continuation));

        QueryUnderstandingResult {
            search_intent,
            keywords,
            must_include: collect_list(request, "must_include"),
            must_avoid: collect_list(request, "must_avoid"),
            metadata,
        }
    }
}

#[async_trait]
impl QueryUnderstanding for RuleBasedUnderstanding {
    fn name(&self) -> &str {
        "rule"
    }

    async fn understand(
        &self,
        request: &EngineRequest,
        tier: UserTier,
    ) -> Result<QueryUnderstandingResult, EngineError> {
        let result = self.analyze(request, tier);
        tracing::debug!(
            "Rule-based understanding: {} keywords, {} required, {} forbidden",
            result.keywords.len(),
            result.must_include.len(),
            result.must_avoid.len()
        );
        Ok(result)
    }
}
