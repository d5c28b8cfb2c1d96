//! Writer
//!
//! Fourth pipeline stage: produces the draft from the plan. Both strategies
//! start from the same [`Brief`], assembled in a fixed order: continuation
//! preamble, style/tone line, the raw request, memory snippets, then the
//! constraint lines. The template writer prints the brief as the draft's
//! header and follows it with body prose; the LLM writer sends it, plus the
//! plan, as its prompt.

pub mod llm;
pub mod template;

pub use llm::LlmWriter;
pub use template::TemplateWriter;

use crate::text::{contains_ci, excerpt};
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{
    DirectorPlan, EngineRequest, QueryUnderstandingResult, RetrievedMemory, UserTier,
};

/// Characters of memory content shown per snippet
const SNIPPET_CHARS: usize = 140;

/// Characters of the previous excerpt quoted in the preamble
const PREAMBLE_CHARS: usize = 80;

#[async_trait]
pub trait Writer: Send + Sync {
    fn name(&self) -> &str;

    async fn write(
        &self,
        request: &EngineRequest,
        query: &QueryUnderstandingResult,
        memories: &[RetrievedMemory],
        plan: &DirectorPlan,
        tier: UserTier,
    ) -> Result<String, EngineError>;
}

/// Writing brief shared by all writer strategies
#[derive(Debug, Clone, PartialEq)]
pub struct Brief {
    pub preamble: Option<String>,
    pub style_line: String,
    pub request: String,
    /// `(id, snippet)` pairs
    pub snippets: Vec<(String, String)>,
    pub must_include: Vec<String>,
    pub must_avoid: Vec<String>,
}

impl Brief {
    /// Assemble the brief. Memories mentioning a must-avoid term are left out.
    pub fn new(
        request: &EngineRequest,
        memories: &[RetrievedMemory],
        plan: &DirectorPlan,
        max_snippets: usize,
    ) -> Self {
        let guidelines = &plan.writing_guidelines;
        let must_avoid = plan.quality_constraints.must_avoid.clone();

        Self {
            preamble: request.context_str("last_excerpt").map(|last| {
                format!(
                    "Continuing from the previous excerpt: “{}”",
                    excerpt(last, PREAMBLE_CHARS)
                )
            }),
            style_line: format!("Style: {}. Tone: {}.", guidelines.style, guidelines.tone),
            request: request.user_query.trim().to_string(),
            snippets: usable_memories(memories, &must_avoid)
                .take(max_snippets)
                .map(|m| (m.id.clone(), excerpt(&m.content, SNIPPET_CHARS)))
                .collect(),
            must_include: plan.quality_constraints.must_include.clone(),
            must_avoid,
        }
    }

    /// Header lines printed at the top of a template draft.
    ///
    /// Forbidden terms are only counted here: restating them would put them
    /// in the draft.
    pub fn header_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(preamble) = &self.preamble {
            lines.push(preamble.clone());
        }
        lines.push(self.style_line.clone());
        lines.push(format!("Request: {}", self.request));
        for (id, snippet) in &self.snippets {
            lines.push(format!("[{}] {}", id, snippet));
        }
        if !self.must_include.is_empty() {
            lines.push(format!("Must include: {}", self.must_include.join("、")));
        }
        if !self.must_avoid.is_empty() {
            lines.push(format!(
                "Must avoid: {} restricted term(s)",
                self.must_avoid.len()
            ));
        }
        lines
    }

    /// Prompt lines for a model, with forbidden terms spelled out
    pub fn prompt_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(preamble) = &self.preamble {
            lines.push(preamble.clone());
        }
        lines.push(self.style_line.clone());
        lines.push(format!("Request: {}", self.request));
        if !self.snippets.is_empty() {
            lines.push("Reference memories:".to_string());
            for (id, snippet) in &self.snippets {
                lines.push(format!("- [{}] {}", id, snippet));
            }
        }
        if !self.must_include.is_empty() {
            lines.push(format!("Must include: {}", self.must_include.join(", ")));
        }
        if !self.must_avoid.is_empty() {
            lines.push(format!("Must avoid: {}", self.must_avoid.join(", ")));
        }
        lines
    }
}

/// Memories that do not mention any forbidden term
pub(crate) fn usable_memories<'a>(
    memories: &'a [RetrievedMemory],
    must_avoid: &'a [String],
) -> impl Iterator<Item = &'a RetrievedMemory> + 'a {
    memories
        .iter()
        .filter(move |m| !must_avoid.iter().any(|t| contains_ci(&m.content, t)))
}
