//! Deterministic consistency gate
//!
//! Seven independent checks, each subtracting a fixed penalty from a score
//! that starts at 100. Length, term, format and sensitive-content failures
//! are violations; coherence and repetition only warn. A draft passes when
//! there are no violations and the score reaches the threshold.
//!
//! Required and forbidden terms that overlap can never both be satisfied;
//! that is reported as its own violation and makes the report unrepairable,
//! as does any sensitive-content hit.

use super::repair::{
    paragraphs_violation, FORBIDDEN_TERMS, LENGTH_PREFIX, MISSING_DIALOGUE, MISSING_TERMS,
    TERM_SEPARATOR,
};
use super::{CheckerSettings, ConsistencyChecker, FormatRequirements};
use crate::text::{
    char_len, dedupe, excerpt, find_terms, has_dialogue, split_paragraphs, split_sentences,
    split_tokens,
};
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{
    ConsistencyReport, DirectorPlan, EngineRequest, JsonMap, QueryUnderstandingResult,
    RetrievedMemory, UserTier,
};
use serde_json::{json, Value};
use std::collections::HashMap;

pub const CHECKER_NAME: &str = "low_level";

const PENALTY_LENGTH: u8 = 10;
const PENALTY_MUST_INCLUDE: u8 = 15;
const PENALTY_MUST_AVOID: u8 = 20;
const PENALTY_COHERENCE: u8 = 5;
const PENALTY_FORMAT: u8 = 5;
const PENALTY_REPETITION: u8 = 8;
const PENALTY_SENSITIVE: u8 = 25;

/// Tokens this short are never counted as repetition
const MIN_REPEAT_TOKEN_CHARS: usize = 3;

/// Shortest allowed draft as a share of `max_length`
const MIN_LENGTH_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub struct LowLevelChecker {
    settings: CheckerSettings,
}

/// Accumulates findings while the checks run
struct Findings {
    score: u8,
    violations: Vec<String>,
    warnings: Vec<String>,
    details: JsonMap,
    repairable: bool,
}

impl Findings {
    fn new() -> Self {
        Self {
            score: 100,
            violations: Vec::new(),
            warnings: Vec::new(),
            details: JsonMap::new(),
            repairable: true,
        }
    }

    fn penalize(&mut self, penalty: u8) {
        self.score = self.score.saturating_sub(penalty);
    }

    fn record(&mut self, check: &str, ok: bool, detail: Value) {
        let mut entry = match detail {
            Value::Object(map) => map,
            _ => JsonMap::new(),
        };
        entry.insert("ok".to_string(), Value::Bool(ok));
        self.details.insert(check.to_string(), Value::Object(entry));
    }
}

impl LowLevelChecker {
    pub fn new(settings: CheckerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CheckerSettings {
        &self.settings
    }

    /// Run all checks. Fails only on malformed `format_requirements`.
    pub fn evaluate(
        &self,
        draft: &str,
        request: &EngineRequest,
        query: &QueryUnderstandingResult,
        plan: &DirectorPlan,
        tier: UserTier,
    ) -> Result<ConsistencyReport, EngineError> {
        let format = FormatRequirements::from_request(request)?;
        let mut findings = Findings::new();

        self.check_length(draft, plan, tier, &mut findings);
        self.check_terms(draft, query, plan, &mut findings);
        self.check_coherence(draft, &mut findings);
        self.check_format(draft, format.as_ref(), &mut findings);
        self.check_repetition(draft, &mut findings);
        self.check_sensitive(draft, &mut findings);

        let pass = findings.violations.is_empty() && findings.score >= self.settings.pass_threshold;
        tracing::debug!(
            "Low-level check: pass={}, score={}, violations={}, warnings={}",
            pass,
            findings.score,
            findings.violations.len(),
            findings.warnings.len()
        );

        Ok(ConsistencyReport {
            checker: CHECKER_NAME.to_string(),
            pass,
            violations: findings.violations,
            warnings: findings.warnings,
            score: Some(findings.score),
            details: Some(findings.details),
            repairable: Some(findings.repairable),
        })
    }

    fn check_length(
        &self,
        draft: &str,
        plan: &DirectorPlan,
        tier: UserTier,
        findings: &mut Findings,
    ) {
        let length = char_len(draft.trim());
        let max_length = plan.generation_parameters.max_length as f64;
        let tolerance = self.settings.length_tolerance.get(tier);
        let lower = max_length * MIN_LENGTH_RATIO;
        let upper = max_length * (1.0 + tolerance);

        let ok = (length as f64) >= lower && (length as f64) <= upper;
        if !ok {
            findings.penalize(PENALTY_LENGTH);
            findings.violations.push(format!(
                "{}{} chars is outside the allowed range [{}, {}]",
                LENGTH_PREFIX,
                length,
                lower.ceil() as usize,
                upper.floor() as usize
            ));
        }
        findings.record(
            "length",
            ok,
            json!({"chars": length, "min": lower, "max": upper}),
        );
    }

    fn check_terms(
        &self,
        draft: &str,
        query: &QueryUnderstandingResult,
        plan: &DirectorPlan,
        findings: &mut Findings,
    ) {
        let required = dedupe(
            plan.quality_constraints
                .must_include
                .iter()
                .chain(&query.must_include),
        );
        let forbidden = dedupe(
            plan.quality_constraints
                .must_avoid
                .iter()
                .chain(&query.must_avoid),
        );

        let found = find_terms(draft, &required);
        let missing: Vec<&str> = required
            .iter()
            .map(String::as_str)
            .filter(|t| !found.contains(t))
            .collect();
        if !missing.is_empty() {
            findings.penalize(PENALTY_MUST_INCLUDE);
            findings
                .violations
                .push(format!("{}{}", MISSING_TERMS, missing.join(TERM_SEPARATOR)));
        }
        findings.record(
            "must_include",
            missing.is_empty(),
            json!({"missing": missing}),
        );

        let present = find_terms(draft, &forbidden);
        if !present.is_empty() {
            findings.penalize(PENALTY_MUST_AVOID);
            findings
                .violations
                .push(format!("{}{}", FORBIDDEN_TERMS, present.join(TERM_SEPARATOR)));
        }
        findings.record("must_avoid", present.is_empty(), json!({"found": present}));

        let conflicts: Vec<&str> = required
            .iter()
            .filter(|r| forbidden.iter().any(|f| f.to_lowercase() == r.to_lowercase()))
            .map(String::as_str)
            .collect();
        if !conflicts.is_empty() {
            findings.repairable = false;
            findings.violations.push(format!(
                "Unsatisfiable constraints, terms both required and forbidden: {}",
                conflicts.join(", ")
            ));
        }
    }

    fn check_coherence(&self, draft: &str, findings: &mut Findings) {
        let sentences = split_sentences(draft);
        if sentences.len() < 2 {
            findings.record("coherence", true, json!({"skipped": true}));
            return;
        }

        let lengths: Vec<f64> = sentences.iter().map(|s| char_len(s) as f64).collect();
        let n = lengths.len() as f64;
        let mean = lengths.iter().sum::<f64>() / n;
        let variance = lengths.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n;

        let ok = variance <= 2.0 * mean * mean;
        if !ok {
            findings.penalize(PENALTY_COHERENCE);
            findings.warnings.push(format!(
                "Sentence lengths are very uneven (variance {:.1}, mean {:.1})",
                variance, mean
            ));
        }
        findings.record("coherence", ok, json!({"mean": mean, "variance": variance}));
    }

    fn check_format(
        &self,
        draft: &str,
        format: Option<&FormatRequirements>,
        findings: &mut Findings,
    ) {
        let Some(format) = format else {
            findings.record("format", true, json!({"skipped": true}));
            return;
        };

        let paragraphs = split_paragraphs(draft).len();
        let mut problems = Vec::new();
        if let Some(min) = format.min_paragraphs {
            if paragraphs < min {
                problems.push(paragraphs_violation(min, paragraphs));
            }
        }
        if format.require_dialogue && !has_dialogue(draft) {
            problems.push(MISSING_DIALOGUE.to_string());
        }

        let ok = problems.is_empty();
        if !ok {
            findings.penalize(PENALTY_FORMAT);
            findings.violations.extend(problems);
        }
        findings.record("format", ok, json!({"paragraphs": paragraphs}));
    }

    fn check_repetition(&self, draft: &str, findings: &mut Findings) {
        let mut problems = Vec::new();

        let sentences = split_sentences(draft);
        for pair in sentences.windows(2) {
            if pair[0] == pair[1] {
                problems.push(format!(
                    "Sentence repeated back to back: “{}”",
                    excerpt(pair[0], 40)
                ));
            }
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut order = Vec::new();
        for token in split_tokens(draft) {
            if char_len(token) < MIN_REPEAT_TOKEN_CHARS {
                continue;
            }
            let key = token.to_lowercase();
            let count = counts.entry(key.clone()).or_insert(0);
            if *count == 0 {
                order.push(key);
            }
            *count += 1;
        }
        let overused: Vec<String> = order
            .into_iter()
            .filter_map(|t| {
                let n = counts[&t];
                (n > self.settings.max_token_repeats).then(|| format!("{}×{}", t, n))
            })
            .collect();
        if !overused.is_empty() {
            problems.push(format!("Overused tokens: {}", overused.join(", ")));
        }

        let ok = problems.is_empty();
        if !ok {
            findings.penalize(PENALTY_REPETITION);
            findings.warnings.extend(problems);
        }
        findings.record("repetition", ok, json!({"overused": overused}));
    }

    fn check_sensitive(&self, draft: &str, findings: &mut Findings) {
        let hits = find_terms(draft, &self.settings.sensitive_words);
        if !hits.is_empty() {
            findings.penalize(PENALTY_SENSITIVE);
            findings.repairable = false;
            findings
                .violations
                .push(format!("Sensitive content detected: {}", hits.join(", ")));
        }
        findings.record("sensitive", hits.is_empty(), json!({"found": hits}));
    }
}

#[async_trait]
impl ConsistencyChecker for LowLevelChecker {
    fn name(&self) -> &str {
        CHECKER_NAME
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
        self.evaluate(draft, request, query, plan, tier)
    }
}
