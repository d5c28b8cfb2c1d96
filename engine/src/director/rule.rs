//! Rule-based director
//!
//! Fixed four-beat outline with tier defaults. Also provides the default
//! plan the LLM director falls back to, section by section.

use super::Director;
use crate::policy::TierPolicy;
use crate::text::{dedupe, excerpt};
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{
    ContentStructure, DirectorPlan, EngineRequest, GenerationParameters, MemoryHint,
    QualityConstraints, QueryUnderstandingResult, ResourceUtilization, RetrievedMemory,
    SuccessCriteria, UserTier, WritingGuidelines,
};

/// Memories beyond this many are secondary
const PRIMARY_MEMORIES: usize = 3;

/// Characters kept per memory hint
const HINT_CHARS: usize = 120;

/// Focus areas taken from the keywords
const MAX_FOCUS_AREAS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct RuleDirector {
    policy: TierPolicy,
}

impl RuleDirector {
    pub fn new(policy: TierPolicy) -> Self {
        Self { policy }
    }

    /// Build the tier-default plan
    pub fn build_plan(
        &self,
        request: &EngineRequest,
        query: &QueryUnderstandingResult,
        memories: &[RetrievedMemory],
        tier: UserTier,
    ) -> DirectorPlan {
        let continuation = request.context_str("last_excerpt").is_some();
        let subject = if query.search_intent.trim().is_empty() {
            request.user_query.trim()
        } else {
            query.search_intent.trim()
        };

        let mut plan = DirectorPlan {
            plan_summary: format!("{} draft: {}", tier.label(), excerpt(subject, 80)),
            content_structure: outline(continuation, &query.keywords),
            writing_guidelines: WritingGuidelines {
                style: request
                    .context_str("style")
                    .unwrap_or_else(|| self.policy.default_style(tier))
                    .to_string(),
                tone: request
                    .context_str("tone")
                    .unwrap_or("consistent with the story so far")
                    .to_string(),
                pace: self.policy.default_pace(tier).to_string(),
                detail_level: self.policy.detail_level(tier).to_string(),
            },
            resource_utilization: ResourceUtilization {
                primary_memories: memories
                    .iter()
                    .take(PRIMARY_MEMORIES)
                    .map(|m| m.id.clone())
                    .collect(),
                secondary_memories: memories
                    .iter()
                    .skip(PRIMARY_MEMORIES)
                    .map(|m| m.id.clone())
                    .collect(),
                integration_strategy: "Take facts and continuity from the primary memories; \
                    borrow texture and detail from the secondary ones"
                    .to_string(),
            },
            quality_constraints: QualityConstraints {
                must_include: query.must_include.clone(),
                must_avoid: query.must_avoid.clone(),
                consistency_checks: consistency_checks(continuation),
            },
            generation_parameters: GenerationParameters {
                max_length: request
                    .option_usize("max_length")
                    .unwrap_or_else(|| self.policy.max_length(tier)),
                creativity_level: request
                    .option_usize("creativity_level")
                    .map(|c| c.min(u8::MAX as usize) as u8)
                    .unwrap_or(0),
                focus_areas: dedupe(query.keywords.iter().take(MAX_FOCUS_AREAS)),
            },
            success_criteria: SuccessCriteria {
                content_quality: self.policy.content_quality(tier).to_string(),
                relevance: format!("Directly answers the request: {}", excerpt(subject, 60)),
                consistency: "No contradictions with the retrieved memories or earlier text"
                    .to_string(),
                creativity: String::new(),
            },
            keywords: query.keywords.clone(),
            memory_hints: memories
                .iter()
                .map(|m| MemoryHint {
                    id: m.id.clone(),
                    excerpt: excerpt(&m.content, HINT_CHARS),
                })
                .collect(),
        };

        self.policy.clamp_plan(&mut plan, tier);
        self.policy.describe_creativity(&mut plan);
        plan
    }
}

#[async_trait]
impl Director for RuleDirector {
    fn name(&self) -> &str {
        "rule"
    }

    async fn plan(
        &self,
        request: &EngineRequest,
        query: &QueryUnderstandingResult,
        memories: &[RetrievedMemory],
        tier: UserTier,
    ) -> Result<DirectorPlan, EngineError> {
        let plan = self.build_plan(request, query, memories, tier);
        tracing::debug!(
            "Rule director planned max_length={}, creativity={}",
            plan.generation_parameters.max_length,
            plan.generation_parameters.creativity_level
        );
        Ok(plan)
    }
}

fn outline(continuation: bool, keywords: &[String]) -> ContentStructure {
    let introduction = if continuation {
        "Pick up exactly where the previous excerpt stops, same voice and point of view".to_string()
    } else {
        "Open by establishing the scene, the characters present and what they want".to_string()
    };
    let development = if keywords.is_empty() {
        "Advance the situation step by step, letting each paragraph raise the stakes".to_string()
    } else {
        format!(
            "Advance the situation step by step around {}, letting each paragraph raise the stakes",
            keywords.join(", ")
        )
    };

    ContentStructure {
        introduction,
        development,
        climax: "Bring the central tension to a head in a single decisive moment".to_string(),
        conclusion: "Resolve the moment and leave a thread for what comes next".to_string(),
    }
}

fn consistency_checks(continuation: bool) -> Vec<String> {
    let mut checks = vec![
        "Names, relationships and abilities match the retrieved memories".to_string(),
        "Timeline and locations stay coherent".to_string(),
    ];
    if continuation {
        checks.push("Nothing contradicts the previous excerpt".to_string());
    }
    checks
}
