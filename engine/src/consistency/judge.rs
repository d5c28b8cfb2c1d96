//! Semantic judges
//!
//! [`LlmJudge`] asks a model to score the draft for relevance, logical and
//! stylistic consistency, creative quality and completeness. What happens
//! when no verdict can be obtained is an explicit policy:
//!
//! - `fail_open`: the draft passes with a warning saying the check did not run
//! - `fail_closed`: an unparseable verdict fails the draft; an unreachable
//!   judge propagates the service error
//!
//! [`NoopJudge`] always passes and marks the report repairable.

use super::ConsistencyChecker;
use crate::config::JudgeFailurePolicy;
use crate::llm::json::{list_field, parse_object};
use crate::llm::ChatClient;
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{
    ConsistencyReport, DirectorPlan, EngineRequest, JsonMap, QueryUnderstandingResult,
    RetrievedMemory, UserTier,
};
use serde_json::{json, Value};

pub const LLM_JUDGE_NAME: &str = "llm_judge";
pub const NOOP_JUDGE_NAME: &str = "noop_judge";

const SYSTEM_PROMPT: &str = r#"You are a strict fiction editor evaluating a draft.
Score it from 0 to 100 on five criteria: relevance to the request, logical consistency,
style consistency with the guidelines, creative quality, and completeness.

Answer with ONE JSON object and nothing else:
{"pass": true, "score": 85, "violations": ["blocking problems"], "warnings": ["minor problems"], "details": {"relevance": 90}}

Set "pass" to false only for problems serious enough that the draft must be rewritten."#;

pub struct LlmJudge {
    chat: ChatClient,
    policy: JudgeFailurePolicy,
    pass_threshold: u8,
}

impl LlmJudge {
    pub fn new(chat: ChatClient, policy: JudgeFailurePolicy, pass_threshold: u8) -> Self {
        Self {
            chat,
            policy,
            pass_threshold,
        }
    }

    fn build_prompt(
        &self,
        draft: &str,
        request: &EngineRequest,
        query: &QueryUnderstandingResult,
        plan: &DirectorPlan,
        tier: UserTier,
    ) -> String {
        let context = json!({
            "request": request.user_query.trim(),
            "query_understanding": query,
            "guidelines": {
                "writing_guidelines": plan.writing_guidelines,
                "quality_constraints": plan.quality_constraints,
                "success_criteria": plan.success_criteria,
            },
            "tier": tier.label(),
        });
        let body = serde_json::to_string_pretty(&context).unwrap_or_else(|_| context.to_string());
        format!("{}\n\nDraft:\n{}", body, draft)
    }

    /// Turn a model answer into a report, applying the failure policy
    pub fn parse_verdict(&self, raw: &str) -> ConsistencyReport {
        let parsed = parse_object(raw);
        tracing::debug!("Judge response parsed via {} tier", parsed.tier());

        match parsed.into_object().and_then(|map| self.verdict(&map)) {
            Some(report) => report,
            None => {
                tracing::warn!("Judge response had no usable verdict");
                self.unavailable("unparseable judge response".to_string())
            }
        }
    }

    fn verdict(&self, map: &JsonMap) -> Option<ConsistencyReport> {
        let score = map
            .get("score")
            .and_then(Value::as_f64)
            .map(|s| s.round().clamp(0.0, 100.0) as u8);
        let pass = match map.get("pass").and_then(Value::as_bool) {
            Some(pass) => pass,
            None => score? >= self.pass_threshold,
        };

        Some(ConsistencyReport {
            checker: LLM_JUDGE_NAME.to_string(),
            pass,
            violations: list_field(map, "violations"),
            warnings: list_field(map, "warnings"),
            score,
            details: match map.get("details") {
                Some(Value::Object(details)) => Some(details.clone()),
                _ => None,
            },
            repairable: Some(
                map.get("repairable")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            ),
        })
    }

    fn unavailable(&self, reason: String) -> ConsistencyReport {
        let message = format!("Semantic check could not run: {}", reason);
        let mut report = ConsistencyReport {
            checker: LLM_JUDGE_NAME.to_string(),
            repairable: Some(true),
            ..Default::default()
        };
        match self.policy {
            JudgeFailurePolicy::FailOpen => {
                report.pass = true;
                report.warnings.push(message);
            }
            JudgeFailurePolicy::FailClosed => {
                report.pass = false;
                report.violations.push(message);
            }
        }
        report
    }
}

#[async_trait]
impl ConsistencyChecker for LlmJudge {
    fn name(&self) -> &str {
        LLM_JUDGE_NAME
    }

    async fn check(
        &self,
        draft: &str,
        request: &EngineRequest,
        query: &QueryUnderstandingResult,
        _memories: &[RetrievedMemory],
        plan: &DirectorPlan,
        tier: UserTier,
    ) -> Result<ConsistencyReport, EngineError> {
        let prompt = self.build_prompt(draft, request, query, plan, tier);
        match self.chat.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(raw) => Ok(self.parse_verdict(&raw)),
            Err(e) if self.policy == JudgeFailurePolicy::FailOpen => {
                tracing::warn!("Judge unavailable, failing open: {}", e);
                Ok(self.unavailable(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

/// Judge that always passes
#[derive(Debug, Clone, Default)]
pub struct NoopJudge;

#[async_trait]
impl ConsistencyChecker for NoopJudge {
    fn name(&self) -> &str {
        NOOP_JUDGE_NAME
    }

    async fn check(
        &self,
        _draft: &str,
        _request: &EngineRequest,
        _query: &QueryUnderstandingResult,
        _memories: &[RetrievedMemory],
        _plan: &DirectorPlan,
        _tier: UserTier,
    ) -> Result<ConsistencyReport, EngineError> {
        Ok(ConsistencyReport {
            repairable: Some(true),
            ..ConsistencyReport::passed(NOOP_JUDGE_NAME)
        })
    }
}
