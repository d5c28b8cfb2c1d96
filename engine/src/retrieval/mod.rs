//! Memory retrieval
//!
//! Second pipeline stage. Ranks memory snippets for the query understanding
//! result. Scores are local to the strategy that produced them:
//!
//! - [`LightweightRetriever`]: substring scoring over `context.memory_corpus`
//! - [`HybridRetriever`]: vector + keyword search against a [`KnowledgeSource`],
//!   with a tier-selected search mode

pub mod embedding;
pub mod hybrid;
pub mod lightweight;
pub mod source;

pub use hybrid::HybridRetriever;
pub use lightweight::LightweightRetriever;
pub use source::{
    InMemoryKnowledgeBase, KnowledgeHit, KnowledgeRecord, KnowledgeSource, SearchScope,
};

use crate::config::{RetrievalConfig, TierTable};
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{EngineRequest, QueryUnderstandingResult, RetrievedMemory, UserTier};
use std::fmt;

/// Retrieval stage
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &str;

    /// Ranked memories, at most the tier's `top_k`
    async fn retrieve(
        &self,
        query: &QueryUnderstandingResult,
        request: &EngineRequest,
        tier: UserTier,
    ) -> Result<Vec<RetrievedMemory>, EngineError>;
}

/// Immutable retrieval settings taken from `[retrieval]`
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub merge_bonus: f64,
    pub top_k: TierTable<usize>,
    pub lightweight_top_k: TierTable<usize>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

impl RetrievalSettings {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            vector_weight: config.vector_weight,
            keyword_weight: config.keyword_weight,
            merge_bonus: config.merge_bonus,
            top_k: config.top_k,
            lightweight_top_k: config.lightweight_top_k,
        }
    }
}

/// Hybrid search mode, chosen by tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    VectorOnly,
    HybridBasic,
    HybridAdvanced,
}

impl SearchMode {
    pub fn for_tier(tier: UserTier) -> Self {
        match tier {
            UserTier::Standard => SearchMode::VectorOnly,
            UserTier::Regular => SearchMode::HybridBasic,
            UserTier::Vip => SearchMode::HybridAdvanced,
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::VectorOnly => write!(f, "vector_only"),
            SearchMode::HybridBasic => write!(f, "hybrid_basic"),
            SearchMode::HybridAdvanced => write!(f, "hybrid_advanced"),
        }
    }
}

/// Stable descending sort by score
pub(crate) fn sort_by_score(memories: &mut [RetrievedMemory]) {
    memories.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
