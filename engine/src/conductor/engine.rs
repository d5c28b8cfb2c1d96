//! Engine orchestrator
//!
//! Drives one request through the five stages and the repair loop:
//!
//! ```text
//! UNDERSTOOD -> RETRIEVED -> PLANNED -> DRAFTED -> LOW_CHECKED -> HIGH_CHECKED
//!                                          ^                         |
//!                                          +------- RETRY <----------+--> ACCEPTED
//!                                                                    +--> REJECTED
//! ```
//!
//! The semantic judge only sees drafts that cleared the deterministic gate.
//! A failed draft is rewritten when its report is repairable and the retry
//! budget is not spent; the violations are appended to the plan's
//! consistency checks as `Repair:` notes before the writer runs again.
//!
//! # Limits
//!
//! - Retry budget: `max_retries` rewrites after the first draft (default 2)
//! - Overall deadline: `request_timeout` around the whole run
//! - Per-call LLM deadlines are enforced by [`crate::llm::ChatClient`]

pub use crate::consistency::REPAIR_PREFIX;

use crate::consistency::{ConsistencyChecker, FormatRequirements};
use crate::director::Director;
use crate::policy::TierPolicy;
use crate::retrieval::Retriever;
use crate::understanding::QueryUnderstanding;
use crate::writer::Writer;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{
    ConsistencyReport, DirectorPlan, EngineRequest, QueryUnderstandingResult, RetrievedMemory,
    UserTier,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Default number of rewrites after the first draft
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default overall deadline for one request
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 600;

/// States a request passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Understood,
    Retrieved,
    Planned,
    Drafted,
    LowChecked,
    HighChecked,
    Accepted,
    Retry,
    Rejected,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Understood => "UNDERSTOOD",
            PipelineState::Retrieved => "RETRIEVED",
            PipelineState::Planned => "PLANNED",
            PipelineState::Drafted => "DRAFTED",
            PipelineState::LowChecked => "LOW_CHECKED",
            PipelineState::HighChecked => "HIGH_CHECKED",
            PipelineState::Accepted => "ACCEPTED",
            PipelineState::Retry => "RETRY",
            PipelineState::Rejected => "REJECTED",
        };
        write!(f, "{}", name)
    }
}

/// An accepted draft with its full audit trail
#[derive(Debug, Clone, Serialize)]
pub struct EngineOutput {
    pub request_id: String,
    pub draft: String,

    /// Every report produced, in order, across all attempts
    pub reports: Vec<ConsistencyReport>,

    pub plan: DirectorPlan,
    pub query_result: QueryUnderstandingResult,
    pub memories: Vec<RetrievedMemory>,

    /// Number of drafts written, including the accepted one
    pub attempts: u32,

    pub states: Vec<PipelineState>,
    pub completed_at: DateTime<Utc>,
}

/// A terminal rejection
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub request_id: String,

    /// Every violation seen across all attempts, deduplicated
    pub violations: Vec<String>,

    pub reports: Vec<ConsistencyReport>,

    /// Last draft written
    pub draft: String,

    pub plan: DirectorPlan,
    pub attempts: u32,
    pub states: Vec<PipelineState>,
}

/// Result of one run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RunOutcome {
    Accepted(EngineOutput),
    Rejected(Rejection),
}

impl RunOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RunOutcome::Accepted(_))
    }

    pub fn states(&self) -> &[PipelineState] {
        match self {
            RunOutcome::Accepted(output) => &output.states,
            RunOutcome::Rejected(rejection) => &rejection.states,
        }
    }

    pub fn reports(&self) -> &[ConsistencyReport] {
        match self {
            RunOutcome::Accepted(output) => &output.reports,
            RunOutcome::Rejected(rejection) => &rejection.reports,
        }
    }
}

/// The writing engine
///
/// Holds one implementation per stage behind its trait. Shared read-only, so
/// one `Engine` can serve many requests concurrently.
pub struct Engine {
    understanding: Arc<dyn QueryUnderstanding>,
    retriever: Arc<dyn Retriever>,
    director: Arc<dyn Director>,
    writer: Arc<dyn Writer>,
    low_checker: Arc<dyn ConsistencyChecker>,
    judge: Arc<dyn ConsistencyChecker>,
    policy: TierPolicy,
    max_retries: u32,
    replan_on_repair: bool,
    request_timeout: Duration,
}

impl Engine {
    pub fn new(
        understanding: Arc<dyn QueryUnderstanding>,
        retriever: Arc<dyn Retriever>,
        director: Arc<dyn Director>,
        writer: Arc<dyn Writer>,
        low_checker: Arc<dyn ConsistencyChecker>,
        judge: Arc<dyn ConsistencyChecker>,
        policy: TierPolicy,
    ) -> Self {
        Self {
            understanding,
            retriever,
            director,
            writer,
            low_checker,
            judge,
            policy,
            max_retries: DEFAULT_MAX_RETRIES,
            replan_on_repair: false,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Re-run the director, not only the writer, on repair
    pub fn with_replan_on_repair(mut self, replan: bool) -> Self {
        self.replan_on_repair = replan;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// `(stage, strategy)` pairs, for diagnostics
    pub fn stage_names(&self) -> Vec<(&'static str, String)> {
        vec![
            ("query_understanding", self.understanding.name().to_string()),
            ("retriever", self.retriever.name().to_string()),
            ("director", self.director.name().to_string()),
            ("writer", self.writer.name().to_string()),
            ("low_level_checker", self.low_checker.name().to_string()),
            ("judge", self.judge.name().to_string()),
        ]
    }

    /// Process one request
    ///
    /// Returns `Err` only when no verdict could be reached: invalid request,
    /// unreachable external service, writer failure or the overall deadline.
    /// A draft that fails validation is `Ok(RunOutcome::Rejected)`.
    pub async fn run(
        &self,
        request: &EngineRequest,
        tier: UserTier,
    ) -> Result<RunOutcome, EngineError> {
        validate_request(request)?;

        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("request", id = %request_id, tier = %tier);
        let secs = self.request_timeout.as_secs();

        match timeout(
            self.request_timeout,
            self.execute(&request_id, request, tier).instrument(span),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("Request {} exceeded its {}s deadline", request_id, secs);
                Err(EngineError::RequestTimeout { secs })
            }
        }
    }

    /// Process independent requests concurrently
    pub async fn run_many(
        &self,
        requests: &[(EngineRequest, UserTier)],
    ) -> Vec<Result<RunOutcome, EngineError>> {
        join_all(
            requests
                .iter()
                .map(|(request, tier)| self.run(request, *tier)),
        )
        .await
    }

    async fn execute(
        &self,
        request_id: &str,
        request: &EngineRequest,
        tier: UserTier,
    ) -> Result<RunOutcome, EngineError> {
        let started = Instant::now();
        let mut trace = Trace::default();
        info!("Starting request: {}", request.user_query.trim());

        let query = self.understanding.understand(request, tier).await?;
        trace.enter(PipelineState::Understood);
        debug!("Search intent: {}", query.search_intent);

        let memories = self.retriever.retrieve(&query, request, tier).await?;
        trace.enter(PipelineState::Retrieved);
        debug!("Retrieved {} memories", memories.len());

        let mut plan = self.plan(request, &query, &memories, tier).await?;
        trace.enter(PipelineState::Planned);

        let mut reports: Vec<ConsistencyReport> = Vec::new();
        let mut repairs: Vec<String> = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let draft = self
                .writer
                .write(request, &query, &memories, &plan, tier)
                .await?;
            trace.enter(PipelineState::Drafted);

            let low = self
                .low_checker
                .check(&draft, request, &query, &memories, &plan, tier)
                .await?;
            trace.enter(PipelineState::LowChecked);
            reports.push(low.clone());

            let failed = if low.pass {
                let high = self
                    .judge
                    .check(&draft, request, &query, &memories, &plan, tier)
                    .await?;
                trace.enter(PipelineState::HighChecked);
                reports.push(high.clone());

                if high.pass {
                    trace.enter(PipelineState::Accepted);
                    info!(
                        "Request accepted after {} attempt(s) in {}ms",
                        attempt,
                        started.elapsed().as_millis()
                    );
                    return Ok(RunOutcome::Accepted(EngineOutput {
                        request_id: request_id.to_string(),
                        draft,
                        reports,
                        plan,
                        query_result: query,
                        memories,
                        attempts: attempt,
                        states: trace.states,
                        completed_at: Utc::now(),
                    }));
                }
                high
            } else {
                low
            };

            let retries_used = attempt - 1;
            if !failed.is_repairable() || retries_used >= self.max_retries {
                trace.enter(PipelineState::Rejected);
                let violations = aggregate_violations(&reports);
                warn!(
                    "Request rejected by {} after {} attempt(s): {} violation(s)",
                    failed.checker,
                    attempt,
                    violations.len()
                );
                return Ok(RunOutcome::Rejected(Rejection {
                    request_id: request_id.to_string(),
                    violations,
                    reports,
                    draft,
                    plan,
                    attempts: attempt,
                    states: trace.states,
                }));
            }

            trace.enter(PipelineState::Retry);
            for violation in failure_violations(&failed) {
                let note = format!("{}{}", REPAIR_PREFIX, violation);
                if !repairs.contains(&note) {
                    repairs.push(note);
                }
            }
            info!(
                "Retrying draft ({}/{}) with {} repair note(s)",
                retries_used + 1,
                self.max_retries,
                repairs.len()
            );

            if self.replan_on_repair {
                plan = self.plan(request, &query, &memories, tier).await?;
                trace.enter(PipelineState::Planned);
            }
            apply_repairs(&mut plan, &repairs);
        }
    }

    async fn plan(
        &self,
        request: &EngineRequest,
        query: &QueryUnderstandingResult,
        memories: &[RetrievedMemory],
        tier: UserTier,
    ) -> Result<DirectorPlan, EngineError> {
        let mut plan = self.director.plan(request, query, memories, tier).await?;
        // Directors clamp their own plans; repeat it so a custom director
        // cannot exceed the tier budget
        self.policy.clamp_plan(&mut plan, tier);
        Ok(plan)
    }
}

#[derive(Default)]
struct Trace {
    states: Vec<PipelineState>,
}

impl Trace {
    fn enter(&mut self, state: PipelineState) {
        debug!("-> {}", state);
        self.states.push(state);
    }
}

/// Reject malformed requests before any stage runs
pub fn validate_request(request: &EngineRequest) -> Result<(), EngineError> {
    if request.user_query.trim().is_empty() {
        return Err(EngineError::InvalidRequest(
            "user_query must not be empty".to_string(),
        ));
    }
    FormatRequirements::from_request(request)?;
    Ok(())
}

/// Violations of a failed report, or a synthetic one when it names none
fn failure_violations(report: &ConsistencyReport) -> Vec<String> {
    if !report.violations.is_empty() {
        return report.violations.clone();
    }
    let reason = match report.score {
        Some(score) => format!("quality score below threshold ({})", score),
        None => "draft did not pass".to_string(),
    };
    vec![format!("{}: {}", report.checker, reason)]
}

fn aggregate_violations(reports: &[ConsistencyReport]) -> Vec<String> {
    let mut all: Vec<String> = Vec::new();
    for report in reports.iter().filter(|r| !r.pass) {
        for violation in failure_violations(report) {
            if !all.contains(&violation) {
                all.push(violation);
            }
        }
    }
    all
}

fn apply_repairs(plan: &mut DirectorPlan, repairs: &[String]) {
    let checks = &mut plan.quality_constraints.consistency_checks;
    for note in repairs {
        if !checks.contains(note) {
            checks.push(note.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::{LowLevelChecker, NoopJudge};
    use crate::director::RuleDirector;
    use crate::retrieval::{LightweightRetriever, RetrievalSettings};
    use crate::understanding::RuleBasedUnderstanding;
    use crate::writer::TemplateWriter;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Fails with the given report until `passes_from` checks have run
    struct FlakyJudge {
        calls: Mutex<u32>,
        passes_from: u32,
        repairable: bool,
    }

    #[async_trait]
    impl ConsistencyChecker for FlakyJudge {
        fn name(&self) -> &str {
            "flaky"
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
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls >= self.passes_from {
                return Ok(ConsistencyReport::passed("flaky"));
            }
            Ok(ConsistencyReport {
                checker: "flaky".to_string(),
                pass: false,
                score: Some(55),
                repairable: Some(self.repairable),
                ..Default::default()
            })
        }
    }

    fn engine(judge: Arc<dyn ConsistencyChecker>) -> Engine {
        Engine::new(
            Arc::new(RuleBasedUnderstanding::new()),
            Arc::new(LightweightRetriever::new(RetrievalSettings::default())),
            Arc::new(RuleDirector::default()),
            Arc::new(TemplateWriter::default()),
            Arc::new(LowLevelChecker::default()),
            judge,
            TierPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_accepts_clean_draft() {
        let outcome = engine(Arc::new(NoopJudge))
            .run(&EngineRequest::new("写一段雪夜里两位剑客对决的场景"), UserTier::Standard)
            .await
            .unwrap();

        assert!(outcome.is_accepted());
        assert_eq!(
            outcome.states(),
            &[
                PipelineState::Understood,
                PipelineState::Retrieved,
                PipelineState::Planned,
                PipelineState::Drafted,
                PipelineState::LowChecked,
                PipelineState::HighChecked,
                PipelineState::Accepted,
            ]
        );
        assert_eq!(outcome.reports().len(), 2);
    }

    #[tokio::test]
    async fn test_repairable_failure_is_retried() {
        let judge = Arc::new(FlakyJudge {
            calls: Mutex::new(0),
            passes_from: 2,
            repairable: true,
        });
        let outcome = engine(judge)
            .run(&EngineRequest::new("写一段雪夜对决"), UserTier::Regular)
            .await
            .unwrap();

        let RunOutcome::Accepted(output) = outcome else {
            panic!("expected acceptance");
        };
        assert_eq!(output.attempts, 2);
        assert!(output.states.contains(&PipelineState::Retry));
        assert!(output
            .plan
            .quality_constraints
            .consistency_checks
            .contains(&"Repair: flaky: quality score below threshold (55)".to_string()));
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let judge = Arc::new(FlakyJudge {
            calls: Mutex::new(0),
            passes_from: u32::MAX,
            repairable: true,
        });
        let outcome = engine(judge)
            .with_max_retries(1)
            .run(&EngineRequest::new("写一段雪夜对决"), UserTier::Standard)
            .await
            .unwrap();

        let RunOutcome::Rejected(rejection) = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(rejection.attempts, 2);
        assert_eq!(
            rejection.violations,
            vec!["flaky: quality score below threshold (55)"]
        );
        assert_eq!(rejection.states.last(), Some(&PipelineState::Rejected));
    }

    #[tokio::test]
    async fn test_unrepairable_failure_rejects_immediately() {
        let judge = Arc::new(FlakyJudge {
            calls: Mutex::new(0),
            passes_from: u32::MAX,
            repairable: false,
        });
        let outcome = engine(judge)
            .run(&EngineRequest::new("写一段雪夜对决"), UserTier::Standard)
            .await
            .unwrap();
        let RunOutcome::Rejected(rejection) = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(rejection.attempts, 1);
        assert!(!rejection.states.contains(&PipelineState::Retry));
    }

    #[tokio::test]
    async fn test_invalid_requests_fail_before_any_stage() {
        let e = engine(Arc::new(NoopJudge));
        assert!(matches!(
            e.run(&EngineRequest::new("   "), UserTier::Standard).await,
            Err(EngineError::InvalidRequest(_))
        ));

        let bad = EngineRequest::new("写雪")
            .with_option("format_requirements", json!({"min_paragraphs": "two"}));
        assert!(matches!(
            e.run(&bad, UserTier::Standard).await,
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_pipeline_state_names() {
        assert_eq!(PipelineState::LowChecked.to_string(), "LOW_CHECKED");
        assert_eq!(
            serde_json::to_value(PipelineState::HighChecked).unwrap(),
            json!("HIGH_CHECKED")
        );
    }
}
