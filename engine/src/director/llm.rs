//! LLM-based director
//!
//! Asks the model for a plan under a strict JSON schema and overlays what it
//! returns on the rule director's tier-default plan. Each of the seven
//! sections, and each field within a section, is taken from the model only
//! if it decodes; everything else keeps its default. A response with no
//! recoverable object yields the default plan with the raw answer echoed in
//! `plan_summary`. Tier enrichment and clamping run last in every case.

use super::{Director, RuleDirector};
use crate::llm::json::{parse_object, str_field, ParsedJson};
use crate::llm::ChatClient;
use crate::policy::TierPolicy;
use crate::text::{dedupe, excerpt};
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{
    DirectorPlan, EngineRequest, JsonMap, QueryUnderstandingResult, RetrievedMemory, UserTier,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

/// Characters of the raw answer echoed by the fallback plan
const FALLBACK_ECHO_CHARS: usize = 200;

/// Characters of each memory shown as its key points
const KEY_POINT_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = r#"You are the director of a fiction-writing team. You do not write prose yourself:
you study the request, the retrieved memories and the creative context, then hand the writer a precise plan.

Answer with ONE JSON object and nothing else, using exactly this schema:
{
  "plan_summary": "one or two sentences",
  "content_structure": {"introduction": "", "development": "", "climax": "", "conclusion": ""},
  "writing_guidelines": {"style": "", "tone": "", "pace": "", "detail_level": ""},
  "resource_utilization": {"primary_memories": ["memory ids"], "secondary_memories": ["memory ids"], "integration_strategy": ""},
  "quality_constraints": {"must_include": [""], "must_avoid": [""], "consistency_checks": [""]},
  "generation_parameters": {"max_length": 800, "creativity_level": 6, "focus_areas": [""]},
  "success_criteria": {"content_quality": "", "relevance": "", "consistency": "", "creativity": ""}
}

Rules:
- max_length is in characters and must not exceed the tier limit you are given
- creativity_level is an integer from 1 to 10
- Keep every must_include / must_avoid term you are given"#;

pub struct LlmDirector {
    chat: ChatClient,
    policy: TierPolicy,
    defaults: RuleDirector,
}

impl LlmDirector {
    pub fn new(chat: ChatClient, policy: TierPolicy) -> Self {
        Self {
            chat,
            defaults: RuleDirector::new(policy.clone()),
            policy,
        }
    }

    fn build_prompt(
        &self,
        request: &EngineRequest,
        query: &QueryUnderstandingResult,
        memories: &[RetrievedMemory],
        tier: UserTier,
    ) -> String {
        let mut creative_context = request.context.clone();
        creative_context.remove("memory_corpus");

        let mut preferences = request.options.clone();
        preferences.remove("filters");
        preferences.remove("owner");

        let memory_notes: Vec<Value> = memories
            .iter()
            .map(|m| {
                json!({
                    "id": m.id,
                    "relevance": m.score,
                    "key_points": excerpt(&m.content, KEY_POINT_CHARS),
                })
            })
            .collect();

        let context = json!({
            "query": request.user_query.trim(),
            "query_understanding": query,
            "memories": memory_notes,
            "creative_context": creative_context,
            "user_preferences": preferences,
            "tier": {
                "name": tier.label(),
                "max_length": self.policy.max_length(tier),
                "creativity_ceiling": self.policy.creativity_ceiling(tier),
            },
        });

        let body = serde_json::to_string_pretty(&context).unwrap_or_else(|_| context.to_string());
        format!("Plan the next piece of writing.\n\n{}", body)
    }

    /// Decode a model answer into a complete, tier-adjusted plan
    pub fn parse_plan(
        &self,
        raw: &str,
        request: &EngineRequest,
        query: &QueryUnderstandingResult,
        memories: &[RetrievedMemory],
        tier: UserTier,
    ) -> DirectorPlan {
        let defaults = self.defaults.build_plan(request, query, memories, tier);
        let parsed = parse_object(raw);
        tracing::debug!("Director response parsed via {} tier", parsed.tier());

        let mut plan = match parsed {
            ParsedJson::Strict(map) | ParsedJson::Extracted(map) => overlay_plan(defaults, &map),
            ParsedJson::Unparsed(text) => {
                tracing::warn!("Director response was not JSON, using fallback plan");
                DirectorPlan {
                    plan_summary: format!(
                        "Fallback plan (unstructured director answer): {}",
                        excerpt(&text, FALLBACK_ECHO_CHARS)
                    ),
                    ..defaults
                }
            }
        };

        // Caller constraints survive whatever the model proposed
        let constraints = &mut plan.quality_constraints;
        constraints.must_include =
            dedupe(constraints.must_include.iter().chain(&query.must_include));
        constraints.must_avoid = dedupe(constraints.must_avoid.iter().chain(&query.must_avoid));

        self.policy.enrich_plan(&mut plan, tier);
        plan
    }
}

#[async_trait]
impl Director for LlmDirector {
    fn name(&self) -> &str {
        "llm"
    }

    async fn plan(
        &self,
        request: &EngineRequest,
        query: &QueryUnderstandingResult,
        memories: &[RetrievedMemory],
        tier: UserTier,
    ) -> Result<DirectorPlan, EngineError> {
        let prompt = self.build_prompt(request, query, memories, tier);
        let raw = self.chat.complete(SYSTEM_PROMPT, &prompt).await?;
        Ok(self.parse_plan(&raw, request, query, memories, tier))
    }
}

fn overlay_plan(defaults: DirectorPlan, raw: &JsonMap) -> DirectorPlan {
    DirectorPlan {
        plan_summary: str_field(raw, "plan_summary")
            .filter(|s| !s.trim().is_empty())
            .map(String::from)
            .unwrap_or(defaults.plan_summary),
        content_structure: overlay(defaults.content_structure, raw.get("content_structure")),
        writing_guidelines: overlay(defaults.writing_guidelines, raw.get("writing_guidelines")),
        resource_utilization: overlay(
            defaults.resource_utilization,
            raw.get("resource_utilization"),
        ),
        quality_constraints: overlay(defaults.quality_constraints, raw.get("quality_constraints")),
        generation_parameters: overlay(
            defaults.generation_parameters,
            raw.get("generation_parameters"),
        ),
        success_criteria: overlay(defaults.success_criteria, raw.get("success_criteria")),
        keywords: defaults.keywords,
        memory_hints: defaults.memory_hints,
    }
}

/// Apply each field of `raw` onto `default`, keeping only fields that decode
/// and carry content. Blank strings and lists with no non-blank entry are the
/// schema's own placeholders and leave the default in place.
fn overlay<T>(default: T, raw: Option<&Value>) -> T
where
    T: Serialize + DeserializeOwned,
{
    let Some(Value::Object(fields)) = raw else {
        return default;
    };
    let Ok(Value::Object(mut current)) = serde_json::to_value(&default) else {
        return default;
    };

    let mut result = default;
    for (key, value) in fields {
        if !current.contains_key(key) {
            continue;
        }
        let Some(value) = with_content(value) else {
            tracing::debug!("Director left {} blank, keeping default", key);
            continue;
        };
        let previous = current.insert(key.clone(), value);
        match serde_json::from_value::<T>(Value::Object(current.clone())) {
            Ok(updated) => result = updated,
            Err(e) => {
                tracing::debug!("Ignoring director field {}: {}", key, e);
                if let Some(previous) = previous {
                    current.insert(key.clone(), previous);
                }
            }
        }
    }
    result
}

/// `value` without blank list entries, or `None` if nothing is left
fn with_content(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::Array(items) => {
            let kept: Vec<Value> = items
                .iter()
                .filter(|item| !matches!(item, Value::String(s) if s.trim().is_empty()))
                .cloned()
                .collect();
            (!kept.is_empty()).then_some(Value::Array(kept))
        }
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_sdk::types::{ContentStructure, GenerationParameters};

    fn director() -> LlmDirector {
        struct Unused;

        #[async_trait]
        impl crate::llm::LLMProvider for Unused {
            fn name(&self) -> &str {
                "unused"
            }
            fn is_local(&self) -> bool {
                true
            }
            async fn generate(&self, _: &[crate::llm::Message]) -> crate::llm::Result<String> {
                Err(crate::llm::LLMError::ProviderUnavailable("unused".to_string()))
            }
        }

        let chat = ChatClient::new(
            std::sync::Arc::new(Unused),
            std::time::Duration::from_secs(1),
        );
        LlmDirector::new(chat, TierPolicy::default())
    }

    fn query() -> QueryUnderstandingResult {
        QueryUnderstandingResult {
            search_intent: "雪夜对决".to_string(),
            must_include: vec!["剑".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_overlay_keeps_valid_fields_only() {
        let default = GenerationParameters {
            max_length: 500,
            creativity_level: 5,
            focus_areas: vec![],
        };
        let raw = serde_json::json!({"max_length": "lots", "creativity_level": 7, "unknown": 1});
        let merged = overlay(default, Some(&raw));
        assert_eq!(merged.max_length, 500);
        assert_eq!(merged.creativity_level, 7);
    }

    #[test]
    fn test_overlay_skips_blank_placeholders() {
        let default = ContentStructure {
            introduction: "Open on the snowfield".to_string(),
            development: "d".to_string(),
            ..Default::default()
        };
        let raw = serde_json::json!({"introduction": "  ", "development": "Close in"});
        let merged = overlay(default, Some(&raw));
        assert_eq!(merged.introduction, "Open on the snowfield");
        assert_eq!(merged.development, "Close in");
    }

    #[test]
    fn test_schema_template_echo_keeps_defaults() {
        let start = SYSTEM_PROMPT.find('{').unwrap();
        let end = SYSTEM_PROMPT.rfind('}').unwrap();
        let template = &SYSTEM_PROMPT[start..=end];
        let request = EngineRequest::new("写一段雪夜里两位剑客在孤城外对决的场景");
        let tier = UserTier::Standard;

        let plan = director().parse_plan(template, &request, &query(), &[], tier);
        let mut expected = RuleDirector::new(TierPolicy::default())
            .build_plan(&request, &query(), &[], tier);
        expected.quality_constraints.must_include =
            dedupe(expected.quality_constraints.must_include.iter().chain(&query().must_include));

        let s = &plan.content_structure;
        assert_eq!(s, &expected.content_structure);
        assert!(!s.introduction.is_empty());
        assert_eq!(plan.writing_guidelines.style, expected.writing_guidelines.style);
        assert_eq!(plan.writing_guidelines.tone, expected.writing_guidelines.tone);
        assert!(!plan.writing_guidelines.style.is_empty());
        assert_eq!(
            plan.resource_utilization.integration_strategy,
            expected.resource_utilization.integration_strategy
        );
        assert!(!plan.resource_utilization.integration_strategy.is_empty());
        let (got, want) = (&plan.success_criteria, &expected.success_criteria);
        assert_eq!(got.relevance, want.relevance);
        assert_eq!(got.consistency, want.consistency);
        assert_eq!(got.content_quality, want.content_quality);
        assert!(!got.relevance.is_empty());
        assert_eq!(
            got.creativity,
            format!("creativity level {}/10", plan.generation_parameters.creativity_level)
        );
        assert_eq!(
            plan.quality_constraints.consistency_checks,
            expected.quality_constraints.consistency_checks
        );
        assert!(plan.quality_constraints.must_avoid.iter().all(|t| !t.is_empty()));
        assert_eq!(plan.plan_summary, "one or two sentences");
    }

    #[test]
    fn test_overlay_ignores_non_objects() {
        let default = ContentStructure {
            introduction: "i".to_string(),
            ..Default::default()
        };
        let merged = overlay(default.clone(), Some(&Value::String("nope".to_string())));
        assert_eq!(merged, default);
    }

    #[test]
    fn test_full_response_is_used_and_clamped() {
        let raw = r#"{
            "plan_summary": "雪夜里的决斗",
            "content_structure": {"introduction": "a", "development": "b", "climax": "c", "conclusion": "d"},
            "writing_guidelines": {"style": "冷峻", "tone": "紧张", "pace": "快", "detail_level": "x"},
            "resource_utilization": {"primary_memories": ["m1"], "secondary_memories": [], "integration_strategy": "s"},
            "quality_constraints": {"must_include": ["雪"], "must_avoid": [], "consistency_checks": []},
            "generation_parameters": {"max_length": 9000, "creativity_level": 10, "focus_areas": ["剑"]},
            "success_criteria": {"content_quality": "q", "relevance": "r", "consistency": "c", "creativity": "k"}
        }"#;
        let plan = director().parse_plan(
            raw,
            &EngineRequest::new("q"),
            &query(),
            &[],
            UserTier::Regular,
        );

        assert_eq!(plan.plan_summary, "雪夜里的决斗");
        assert_eq!(plan.writing_guidelines.style, "冷峻");
        assert_eq!(plan.writing_guidelines.detail_level, "detailed");
        assert_eq!(plan.generation_parameters.max_length, 1000);
        assert_eq!(plan.generation_parameters.creativity_level, 8);
        assert_eq!(plan.quality_constraints.must_include, vec!["雪", "剑"]);
    }

    #[test]
    fn test_unparsed_response_gives_fallback_plan() {
        let plan = director().parse_plan(
            "I think the scene should be tense.",
            &EngineRequest::new("q"),
            &query(),
            &[],
            UserTier::Vip,
        );
        assert!(plan.plan_summary.contains("I think the scene should be tense."));
        assert!(!plan.content_structure.climax.is_empty());
        assert_eq!(plan.generation_parameters.max_length, 2000);
        // VIP default 8 plus the bonus
        assert_eq!(plan.generation_parameters.creativity_level, 10);
        assert_eq!(plan.success_criteria.creativity, "creativity level 10/10");
    }
}
