//! Lightweight retriever
//!
//! Scans the request's own `context.memory_corpus`. No I/O and no shared
//! state, so identical inputs always give the identical ordered list.
//!
//! Each needle (search intent, keywords, must-include terms) found as an
//! exact substring adds `1 + min(2, 12 / len)`: short keywords weigh more
//! than the long intent string.

use super::source::KnowledgeRecord;
use super::{sort_by_score, RetrievalSettings, Retriever};
use crate::text::{char_len, dedupe};
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{EngineRequest, QueryUnderstandingResult, RetrievedMemory, UserTier};

pub struct LightweightRetriever {
    settings: RetrievalSettings,
}

impl LightweightRetriever {
    pub fn new(settings: RetrievalSettings) -> Self {
        Self { settings }
    }

    fn top_k(&self, request: &EngineRequest, tier: UserTier) -> usize {
        request
            .option_usize("top_k")
            .filter(|k| *k > 0)
            .unwrap_or_else(|| self.settings.lightweight_top_k.get(tier))
    }

    /// Synchronous core
    pub fn rank(
        &self,
        query: &QueryUnderstandingResult,
        request: &EngineRequest,
        tier: UserTier,
    ) -> Vec<RetrievedMemory> {
        let corpus = match request.context.get("memory_corpus") {
            Some(value) => KnowledgeRecord::list_from_value(value),
            None => return Vec::new(),
        };

        let needles = dedupe(
            std::iter::once(query.search_intent.as_str())
                .chain(query.keywords.iter().map(String::as_str))
                .chain(query.must_include.iter().map(String::as_str)),
        );

        let mut memories: Vec<RetrievedMemory> = corpus
            .into_iter()
            .filter_map(|record| {
                let score: f64 = needles
                    .iter()
                    .filter(|n| record.content.contains(n.as_str()))
                    .map(|n| needle_weight(n))
                    .sum();
                (score > 0.0).then(|| RetrievedMemory {
                    id: record.id,
                    content: record.content,
                    score,
                    meta: record.meta,
                })
            })
            .collect();

        sort_by_score(&mut memories);
        memories.truncate(self.top_k(request, tier));
        memories
    }
}

fn needle_weight(needle: &str) -> f64 {
    let len = char_len(needle).max(1) as f64;
    1.0 + (12.0 / len).min(2.0)
}

#[async_trait]
impl Retriever for LightweightRetriever {
    fn name(&self) -> &str {
        "lightweight"
    }

    async fn retrieve(
        &self,
        query: &QueryUnderstandingResult,
        request: &EngineRequest,
        tier: UserTier,
    ) -> Result<Vec<RetrievedMemory>, EngineError> {
        let memories = self.rank(query, request, tier);
        tracing::debug!("Lightweight retrieval returned {} memories", memories.len());
        Ok(memories)
    }
}
