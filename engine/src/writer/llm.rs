//! LLM-backed writer
//!
//! Sends the brief and the plan to the model and returns its prose. This
//! stage has no fallback: an empty answer is a `GenerationFailure`.

use super::{Brief, Writer};
use crate::llm::ChatClient;
use crate::text::char_len;
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{
    DirectorPlan, EngineRequest, QueryUnderstandingResult, RetrievedMemory, UserTier,
};

const SYSTEM_PROMPT: &str = "You are a novelist. Write the passage described by the brief and \
the plan. Output only the prose itself: no title, no notes, no markdown. Stay within the \
length limit, use every required term, never use a forbidden term, and keep names and facts \
consistent with the reference memories.";

pub struct LlmWriter {
    chat: ChatClient,
    snippets: usize,
}

impl LlmWriter {
    pub fn new(chat: ChatClient, snippets: usize) -> Self {
        Self { chat, snippets }
    }

    fn build_prompt(
        &self,
        request: &EngineRequest,
        memories: &[RetrievedMemory],
        plan: &DirectorPlan,
        tier: UserTier,
    ) -> String {
        let brief = Brief::new(request, memories, plan, self.snippets);
        let mut lines = brief.prompt_lines();

        let structure = &plan.content_structure;
        lines.push(String::new());
        lines.push(format!("Plan: {}", plan.plan_summary));
        lines.push(format!("- Introduction: {}", structure.introduction));
        lines.push(format!("- Development: {}", structure.development));
        lines.push(format!("- Climax: {}", structure.climax));
        lines.push(format!("- Conclusion: {}", structure.conclusion));
        lines.push(format!(
            "Pace: {}. Detail: {}.",
            plan.writing_guidelines.pace, plan.writing_guidelines.detail_level
        ));

        if !plan.quality_constraints.consistency_checks.is_empty() {
            lines.push("Checks the passage must satisfy:".to_string());
            for check in &plan.quality_constraints.consistency_checks {
                lines.push(format!("- {}", check));
            }
        }

        let params = &plan.generation_parameters;
        lines.push(format!(
            "Length: between {} and {} characters. Creativity: {}/10. Reader tier: {}.",
            params.max_length / 2,
            params.max_length,
            params.creativity_level,
            tier.label()
        ));
        if !params.focus_areas.is_empty() {
            lines.push(format!("Focus on: {}", params.focus_areas.join(", ")));
        }

        lines.join("\n")
    }
}

#[async_trait]
impl Writer for LlmWriter {
    fn name(&self) -> &str {
        "llm"
    }

    async fn write(
        &self,
        request: &EngineRequest,
        _query: &QueryUnderstandingResult,
        memories: &[RetrievedMemory],
        plan: &DirectorPlan,
        tier: UserTier,
    ) -> Result<String, EngineError> {
        let prompt = self.build_prompt(request, memories, plan, tier);
        let raw = self.chat.complete(SYSTEM_PROMPT, &prompt).await?;
        let draft = raw.trim();

        if draft.is_empty() {
            tracing::error!("LLM writer returned an empty draft");
            return Err(EngineError::GenerationFailure(
                "Writer model returned no text".to_string(),
            ));
        }

        tracing::debug!("LLM writer produced {} chars", char_len(draft));
        Ok(draft.to_string())
    }
}
