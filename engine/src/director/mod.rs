//! Director
//!
//! Third pipeline stage: turns the request, its understanding and the
//! retrieved memories into a [`DirectorPlan`]. Every strategy returns a plan
//! with all seven sections populated and `generation_parameters` clamped to
//! the tier ceilings.

pub mod llm;
pub mod rule;

pub use llm::LlmDirector;
pub use rule::RuleDirector;

use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{
    DirectorPlan, EngineRequest, QueryUnderstandingResult, RetrievedMemory, UserTier,
};

#[async_trait]
pub trait Director: Send + Sync {
    fn name(&self) -> &str;

    async fn plan(
        &self,
        request: &EngineRequest,
        query: &QueryUnderstandingResult,
        memories: &[RetrievedMemory],
        tier: UserTier,
    ) -> Result<DirectorPlan, EngineError>;
}
