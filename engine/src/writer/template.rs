//! Template writer
//!
//! Deterministic drafting with no model behind it. Prints the brief as a
//! header, then body paragraphs built from the plan's beats and the usable
//! memories until the draft reaches about 80% of `max_length`. The result is
//! cut at `max_length` characters.
//!
//! On a retry the plan carries `Repair:` notes. Flagged terms are removed
//! from the request, preamble, style and dialogue lines, and any other line
//! that mentions one is dropped. Missing terms are restated in the header,
//! and the length, paragraph and dialogue targets are raised. Each note is
//! acknowledged by a `Revised:` line in the header.

use super::{usable_memories, Brief, Writer};
use crate::consistency::{FormatRequirements, RepairNote};
use crate::text::{char_len, contains_ci, remove_terms, truncate_chars};
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{
    DirectorPlan, EngineRequest, QueryUnderstandingResult, RetrievedMemory, UserTier,
};

/// Body is extended until the draft reaches this share of `max_length`
const FILL_RATIO: f64 = 0.8;

/// Upper bound on filler rounds
const MAX_ROUNDS: usize = 32;

#[derive(Debug, Clone)]
pub struct TemplateWriter {
    snippets: usize,
}

impl Default for TemplateWriter {
    fn default() -> Self {
        Self::new(5)
    }
}

impl TemplateWriter {
    pub fn new(snippets: usize) -> Self {
        Self { snippets }
    }

    /// Synchronous core
    pub fn compose(
        &self,
        request: &EngineRequest,
        memories: &[RetrievedMemory],
        plan: &DirectorPlan,
    ) -> String {
        let revision = Revision::from_plan(plan);
        let max_length = plan.generation_parameters.max_length;
        let target = ((max_length as f64 * FILL_RATIO).ceil() as usize)
            .max(revision.min_length)
            .min(max_length);

        let mut brief = Brief::new(request, memories, plan, self.snippets);
        revision.scrub_brief(&mut brief);

        // The header may use at most half the budget so the constraint
        // lines survive the final cut
        let render = |brief: &Brief| {
            let mut lines = brief.header_lines();
            lines.extend(revision.acknowledgements());
            lines.join("\n")
        };
        let mut header = render(&brief);
        while char_len(&header) > max_length / 2 && brief.snippets.pop().is_some() {
            header = render(&brief);
        }

        let mut paragraphs = vec![header];

        let structure = &plan.content_structure;
        let beats: Vec<&str> = [
            structure.introduction.as_str(),
            structure.development.as_str(),
            structure.climax.as_str(),
            structure.conclusion.as_str(),
        ]
        .into_iter()
        .map(str::trim)
        .filter(|b| !b.is_empty() && revision.keeps(b))
        .collect();

        if let Some(first) = beats.first() {
            paragraphs.push(format!("{}.", first.trim_end_matches('.')));
        }
        let wants_dialogue = revision.dialogue
            || matches!(
                FormatRequirements::from_request(request),
                Ok(Some(FormatRequirements {
                    require_dialogue: true,
                    ..
                }))
            );
        // Placed early so the final cut cannot remove it
        if wants_dialogue {
            let line = [brief.request.as_str()]
                .into_iter()
                .chain(beats.iter().copied())
                .find(|l| !l.trim().is_empty())
                .unwrap_or("……");
            paragraphs.push(format!("“{}”", line.trim()));
        }

        for memory in usable_memories(memories, &plan.quality_constraints.must_avoid) {
            if revision.keeps(&memory.content) {
                paragraphs.push(memory.content.trim().to_string());
            }
        }
        for beat in beats.iter().skip(1) {
            paragraphs.push(format!("{}.", beat.trim_end_matches('.')));
        }

        // Filler falls back to the scrubbed request when every beat was dropped
        let filler: Vec<&str> = if beats.is_empty() && !brief.request.is_empty() {
            vec![brief.request.as_str()]
        } else {
            beats.clone()
        };
        let mut round = 1;
        while (draft_len(&paragraphs) < target || paragraphs.len() < revision.min_paragraphs)
            && round <= MAX_ROUNDS
            && !filler.is_empty()
        {
            let line = filler[(round - 1) % filler.len()];
            paragraphs.push(format!(
                "Movement {}: {}.",
                round,
                line.trim_end_matches('.')
            ));
            round += 1;
        }

        truncate_chars(&paragraphs.join("\n\n"), max_length)
    }
}

/// What the repair notes on a plan ask the template writer to change
#[derive(Debug, Default)]
struct Revision {
    flagged: Vec<String>,
    min_length: usize,
    min_paragraphs: usize,
    dialogue: bool,
    notes: Vec<String>,
}

impl Revision {
    fn from_plan(plan: &DirectorPlan) -> Self {
        let mut revision = Self::default();
        for note in RepairNote::from_plan(plan) {
            let line = match note {
                RepairNote::ForbiddenTerms(terms) => {
                    let line = format!("removed {} flagged term(s)", terms.len());
                    revision.flagged.extend(terms);
                    line
                }
                RepairNote::MissingTerms(terms) => format!("restated {}", terms.join("、")),
                RepairNote::Length { min, .. } => {
                    revision.min_length = revision.min_length.max(min);
                    format!("lengthened to at least {} chars", min)
                }
                RepairNote::Paragraphs { min } => {
                    revision.min_paragraphs = revision.min_paragraphs.max(min);
                    format!("at least {} paragraphs", min)
                }
                RepairNote::Dialogue => {
                    revision.dialogue = true;
                    "added dialogue".to_string()
                }
                RepairNote::Other(text) => text,
            };
            revision.notes.push(line);
        }
        revision
    }

    /// False when the text mentions a flagged term
    fn keeps(&self, text: &str) -> bool {
        !self.flagged.iter().any(|t| contains_ci(text, t))
    }

    fn scrub_brief(&self, brief: &mut Brief) {
        if self.flagged.is_empty() {
            return;
        }
        brief.preamble = brief
            .preamble
            .as_deref()
            .map(|p| remove_terms(p, &self.flagged));
        brief.style_line = remove_terms(&brief.style_line, &self.flagged);
        brief.request = remove_terms(&brief.request, &self.flagged)
            .trim()
            .to_string();
        brief.snippets.retain(|(_, snippet)| self.keeps(snippet));
    }

    /// Header lines acknowledging each note, without the flagged terms
    fn acknowledgements(&self) -> Vec<String> {
        self.notes
            .iter()
            .map(|n| format!("Revised: {}", remove_terms(n, &self.flagged)))
            .collect()
    }
}

fn draft_len(paragraphs: &[String]) -> usize {
    let body: usize = paragraphs.iter().map(|p| char_len(p)).sum();
    body + paragraphs.len().saturating_sub(1) * 2
}

#[async_trait]
impl Writer for TemplateWriter {
    fn name(&self) -> &str {
        "template"
    }

    async fn write(
        &self,
        request: &EngineRequest,
        _query: &QueryUnderstandingResult,
        memories: &[RetrievedMemory],
        plan: &DirectorPlan,
        _tier: UserTier,
    ) -> Result<String, EngineError> {
        let draft = self.compose(request, memories, plan);
        tracing::debug!("Template writer produced {} chars", char_len(&draft));
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::director::RuleDirector;
    use crate::text::split_paragraphs;
    use serde_json::json;

    fn plan_for(request: &EngineRequest, tier: UserTier) -> DirectorPlan {
        let query = QueryUnderstandingResult {
            search_intent: request.user_query.clone(),
            keywords: vec!["雪夜".to_string()],
            must_include: request.option_list("must_include"),
            must_avoid: request.option_list("must_avoid"),
            ..Default::default()
        };
        RuleDirector::default().build_plan(request, &query, &[], tier)
    }

    #[test]
    fn test_draft_fills_toward_target_within_limit() {
        for tier in UserTier::ALL {
            let req = EngineRequest::new("写一段雪夜里两位剑客对决的场景");
            let plan = plan_for(&req, tier);
            let draft = TemplateWriter::default().compose(&req, &[], &plan);
            let len = char_len(&draft);
            let max = plan.generation_parameters.max_length;
            assert!(len <= max, "{} > {}", len, max);
            assert!(len * 2 >= max, "{} too short for {}", len, max);
        }
    }

    #[test]
    fn test_draft_contains_required_and_no_forbidden_terms() {
        let req = EngineRequest::new("写一段雪夜对决")
            .with_option("must_include", json!(["长剑"]))
            .with_option("must_avoid", json!(["blood"]));
        let plan = plan_for(&req, UserTier::Standard);
        let memories = vec![RetrievedMemory {
            id: "m1".to_string(),
            content: "Blood on the snow".to_string(),
            score: 1.0,
            ..Default::default()
        }];
        let draft = TemplateWriter::default().compose(&req, &memories, &plan);
        assert!(draft.contains("长剑"));
        assert!(!draft.to_lowercase().contains("blood"));
    }

    #[test]
    fn test_dialogue_and_paragraphs() {
        let req = EngineRequest::new("写一段雪夜对决")
            .with_option("format_requirements", json!({"require_dialogue": true}));
        let plan = plan_for(&req, UserTier::Regular);
        let draft = TemplateWriter::default().compose(&req, &[], &plan);
        assert!(crate::text::has_dialogue(&draft));
        assert!(split_paragraphs(&draft).len() >= 3);
    }

    #[test]
    fn test_continuation_preamble_first() {
        let req = EngineRequest::new("继续").with_context("last_excerpt", json!("他握紧了剑。"));
        let plan = plan_for(&req, UserTier::Standard);
        let draft = TemplateWriter::default().compose(&req, &[], &plan);
        assert!(draft.starts_with("Continuing from the previous excerpt"));
    }

    fn with_notes(mut plan: DirectorPlan, notes: &[&str]) -> DirectorPlan {
        plan.quality_constraints
            .consistency_checks
            .extend(notes.iter().map(|n| format!("Repair: {}", n)));
        plan
    }

    #[test]
    fn test_repair_removes_flagged_terms_everywhere() {
        let req = EngineRequest::new("写一段雪夜里两位剑客在孤城外对决的场景")
            .with_option("must_avoid", json!(["雪夜"]));
        let memories = vec![RetrievedMemory {
            id: "m1".to_string(),
            content: "那年雪夜，城门紧闭".to_string(),
            score: 1.0,
            ..Default::default()
        }];
        let writer = TemplateWriter::default();

        let first = writer.compose(&req, &memories, &plan_for(&req, UserTier::Standard));
        assert!(first.contains("Request: 写一段雪夜里"));

        let plan = with_notes(
            plan_for(&req, UserTier::Standard),
            &["Contains forbidden terms: 雪夜"],
        );
        let draft = writer.compose(&req, &memories, &plan);
        assert!(!draft.contains("雪夜"), "{}", draft);
        assert!(draft.contains("Request: 写一段里两位剑客在孤城外对决的场景"));
        assert!(draft.contains("Revised: removed 1 flagged term(s)"));
        assert!(char_len(&draft) * 2 >= plan.generation_parameters.max_length);
    }

    #[test]
    fn test_repair_raises_format_targets() {
        let req = EngineRequest::new("写一段对决");
        let plan = with_notes(
            plan_for(&req, UserTier::Vip),
            &[
                "Dialogue is required but none was found",
                "Expected at least 9 paragraphs, found 2",
                "Missing required terms: 长剑",
                "llm_judge: quality score below threshold (40)",
            ],
        );
        let draft = TemplateWriter::default().compose(&req, &[], &plan);

        assert!(crate::text::has_dialogue(&draft));
        assert!(split_paragraphs(&draft).len() >= 9);
        assert!(draft.contains("Revised: restated 长剑"));
        assert!(draft.contains("Revised: llm_judge: quality score below threshold (40)"));
    }
}
