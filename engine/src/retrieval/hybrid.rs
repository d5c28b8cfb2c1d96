//! Hybrid retriever
//!
//! Queries a [`KnowledgeSource`] in the search mode selected by tier:
//!
//! - `vector_only`: one vector search on the search intent
//! - `hybrid_basic`: vector and keyword search merged per id with the
//!   configured weights, re-normalised by their sum
//! - `hybrid_advanced`: multi-query vector expansion, semantic expansion,
//!   keyword search and context-aware search concatenated, deduplicated by
//!   id with a damped bonus for repeated hits
//!
//! Candidates mentioning a must-avoid term are dropped, and when
//! must-include terms exist, so are candidates mentioning none of them.

use super::source::{KnowledgeSource, SearchScope};
use super::{sort_by_score, RetrievalSettings, Retriever, SearchMode};
use crate::text::{contains_ci, find_terms};
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{EngineRequest, QueryUnderstandingResult, RetrievedMemory, UserTier};
use std::collections::HashMap;
use std::sync::Arc;

/// Extra candidates fetched so that post-filtering can still fill `top_k`
const CANDIDATE_MULTIPLIER: usize = 3;

/// Context fields folded into the context-aware query
const CONTEXT_FIELDS: &[&str] = &["characters", "setting", "plot_requirements"];

pub struct HybridRetriever {
    source: Arc<dyn KnowledgeSource>,
    settings: RetrievalSettings,
}

impl HybridRetriever {
    pub fn new(source: Arc<dyn KnowledgeSource>, settings: RetrievalSettings) -> Self {
        Self { source, settings }
    }

    /// Tier depth; an explicit `top_k` option may only lower it
    fn top_k(&self, request: &EngineRequest, tier: UserTier) -> usize {
        let ceiling = self.settings.top_k.get(tier);
        match request.option_usize("top_k") {
            Some(k) if k > 0 => k.min(ceiling),
            _ => ceiling,
        }
    }

    async fn vector(
        &self,
        query: &str,
        scope: &SearchScope,
    ) -> Result<Vec<RetrievedMemory>, EngineError> {
        let hits = self
            .source
            .vector_search(query, scope)
            .await
            .map_err(|e| backend_error("vector", e))?;
        Ok(hits.into_iter().map(RetrievedMemory::from).collect())
    }

    async fn keyword(
        &self,
        query: &str,
        scope: &SearchScope,
    ) -> Result<Vec<RetrievedMemory>, EngineError> {
        let hits = self
            .source
            .keyword_search(query, scope)
            .await
            .map_err(|e| backend_error("keyword", e))?;
        Ok(hits.into_iter().map(RetrievedMemory::from).collect())
    }

    async fn hybrid_basic(
        &self,
        intent: &str,
        keyword_query: &str,
        scope: &SearchScope,
    ) -> Result<Vec<RetrievedMemory>, EngineError> {
        let vector_hits = self.vector(intent, scope).await?;
        let keyword_hits = self.keyword(keyword_query, scope).await?;
        Ok(weighted_merge(
            vector_hits,
            keyword_hits,
            self.settings.vector_weight,
            self.settings.keyword_weight,
        ))
    }

    async fn hybrid_advanced(
        &self,
        intent: &str,
        keyword_query: &str,
        query: &QueryUnderstandingResult,
        request: &EngineRequest,
        scope: &SearchScope,
    ) -> Result<Vec<RetrievedMemory>, EngineError> {
        let mut all = Vec::new();

        // Multi-query expansion
        all.extend(self.vector(intent, scope).await?);
        for keyword in &query.keywords {
            all.extend(self.vector(&format!("{} 详细", keyword), scope).await?);
        }

        // Semantic expansion
        all.extend(self.vector(&semantic_query(intent, query), scope).await?);

        all.extend(self.keyword(keyword_query, scope).await?);

        if let Some(contextual) = context_query(intent, request) {
            all.extend(self.vector(&contextual, scope).await?);
        }

        tracing::debug!("Advanced hybrid search collected {} raw hits", all.len());
        Ok(merge_duplicates(all, self.settings.merge_bonus))
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn retrieve(
        &self,
        query: &QueryUnderstandingResult,
        request: &EngineRequest,
        tier: UserTier,
    ) -> Result<Vec<RetrievedMemory>, EngineError> {
        let top_k = self.top_k(request, tier);
        let mode = SearchMode::for_tier(tier);
        let scope = SearchScope::from_request(request, top_k * CANDIDATE_MULTIPLIER);

        let intent = if query.search_intent.trim().is_empty() {
            request.user_query.trim()
        } else {
            query.search_intent.trim()
        };
        let keyword_query = std::iter::once(intent.to_string())
            .chain(query.keywords.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");

        let mut memories = match mode {
            SearchMode::VectorOnly => self.vector(intent, &scope).await?,
            SearchMode::HybridBasic => self.hybrid_basic(intent, &keyword_query, &scope).await?,
            SearchMode::HybridAdvanced => {
                self.hybrid_advanced(intent, &keyword_query, query, request, &scope)
                    .await?
            }
        };

        post_filter(&mut memories, query);
        sort_by_score(&mut memories);
        memories.truncate(top_k);

        tracing::debug!(
            "Hybrid retrieval ({}) returned {} memories, top_k={}",
            mode,
            memories.len(),
            top_k
        );
        Ok(memories)
    }
}

/// Knowledge backend failures surface as retrieval errors
fn backend_error(kind: &str, error: EngineError) -> EngineError {
    tracing::warn!("Knowledge source {} search failed: {}", kind, error);
    match error {
        EngineError::Retrieval(_) => error,
        other => EngineError::Retrieval(format!("{} search failed: {}", kind, other)),
    }
}

/// Per-id weighted combination; a side that missed the id counts as 0
fn weighted_merge(
    vector_hits: Vec<RetrievedMemory>,
    keyword_hits: Vec<RetrievedMemory>,
    vector_weight: f64,
    keyword_weight: f64,
) -> Vec<RetrievedMemory> {
    let total = vector_weight + keyword_weight;
    let mut merged: Vec<RetrievedMemory> = Vec::new();
    let mut parts: Vec<(f64, f64)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let tagged = vector_hits
        .into_iter()
        .map(|hit| (hit, true))
        .chain(keyword_hits.into_iter().map(|hit| (hit, false)));

    for (hit, from_vector) in tagged {
        let i = match index.get(&hit.id) {
            Some(&i) => i,
            None => {
                index.insert(hit.id.clone(), merged.len());
                merged.push(hit.clone());
                parts.push((0.0, 0.0));
                merged.len() - 1
            }
        };
        let (sv, sk) = &mut parts[i];
        if from_vector {
            *sv = sv.max(hit.score);
        } else {
            *sk = sk.max(hit.score);
        }
    }

    for (memory, (sv, sk)) in merged.iter_mut().zip(parts) {
        memory.score = if total > 0.0 {
            (vector_weight * sv + keyword_weight * sk) / total
        } else {
            0.0
        };
    }
    merged
}

/// Deduplicate by id; each repeat adds `score * bonus` to the kept hit, capped at 1.0
fn merge_duplicates(hits: Vec<RetrievedMemory>, bonus: f64) -> Vec<RetrievedMemory> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<RetrievedMemory> = Vec::new();

    for hit in hits {
        match index.get(&hit.id) {
            Some(&i) => {
                let kept = &mut merged[i];
                kept.score = (kept.score + hit.score * bonus).min(1.0);
            }
            None => {
                index.insert(hit.id.clone(), merged.len());
                merged.push(hit);
            }
        }
    }
    merged
}

fn post_filter(memories: &mut Vec<RetrievedMemory>, query: &QueryUnderstandingResult) {
    let before = memories.len();
    memories.retain(|m| {
        if query.must_avoid.iter().any(|t| contains_ci(&m.content, t)) {
            return false;
        }
        query.must_include.is_empty() || !find_terms(&m.content, &query.must_include).is_empty()
    });
    if memories.len() < before {
        tracing::debug!("Post-filter removed {} candidates", before - memories.len());
    }
}

fn semantic_query(intent: &str, query: &QueryUnderstandingResult) -> String {
    let mut expanded = intent.to_string();
    if !query.must_include.is_empty() {
        expanded.push_str(&format!(" 包含：{}", query.must_include.join("、")));
    }
    if !query.must_avoid.is_empty() {
        expanded.push_str(&format!(" 排除：{}", query.must_avoid.join("、")));
    }
    expanded
}

fn context_query(intent: &str, request: &EngineRequest) -> Option<String> {
    let parts: Vec<String> = CONTEXT_FIELDS
        .iter()
        .filter_map(|key| {
            let values = request.context_list(key);
            (!values.is_empty()).then(|| values.join(" "))
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(format!("{} {}", intent, parts.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::source::KnowledgeHit;
    use quill_sdk::types::JsonMap;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every query and returns canned hits
    struct ScriptedSource {
        vector: Vec<(&'static str, &'static str, f64)>,
        keyword: Vec<(&'static str, &'static str, f64)>,
        queries: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(
            vector: Vec<(&'static str, &'static str, f64)>,
            keyword: Vec<(&'static str, &'static str, f64)>,
        ) -> Self {
            Self {
                vector,
                keyword,
                queries: Mutex::new(Vec::new()),
            }
        }

        fn hits(rows: &[(&'static str, &'static str, f64)]) -> Vec<KnowledgeHit> {
            rows.iter()
                .map(|(id, content, score)| KnowledgeHit {
                    id: id.to_string(),
                    title: None,
                    content: content.to_string(),
                    relevance: Some(*score),
                    knowledge_base_title: None,
                    meta: JsonMap::new(),
                })
                .collect()
        }
    }

    #[async_trait]
    impl KnowledgeSource for ScriptedSource {
        async fn vector_search(
            &self,
            query: &str,
            _scope: &SearchScope,
        ) -> Result<Vec<KnowledgeHit>, EngineError> {
            self.queries.lock().unwrap().push(format!("vector:{}", query));
            Ok(Self::hits(&self.vector))
        }

        async fn keyword_search(
            &self,
            query: &str,
            _scope: &SearchScope,
        ) -> Result<Vec<KnowledgeHit>, EngineError> {
            self.queries.lock().unwrap().push(format!("keyword:{}", query));
            Ok(Self::hits(&self.keyword))
        }
    }

    /// Backend whose keyword index is offline
    struct KeywordIndexDown;

    #[async_trait]
    impl KnowledgeSource for KeywordIndexDown {
        async fn vector_search(
            &self,
            _query: &str,
            _scope: &SearchScope,
        ) -> Result<Vec<KnowledgeHit>, EngineError> {
            Ok(Vec::new())
        }

        async fn keyword_search(
            &self,
            _query: &str,
            _scope: &SearchScope,
        ) -> Result<Vec<KnowledgeHit>, EngineError> {
            Err(EngineError::ExternalService("index offline".to_string()))
        }
    }

    fn query() -> QueryUnderstandingResult {
        QueryUnderstandingResult {
            search_intent: "雪夜对决".to_string(),
            keywords: vec!["剑".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_vector_only_for_standard() {
        let source = Arc::new(ScriptedSource::new(vec![("a", "雪", 0.9)], vec![("b", "剑", 0.8)]));
        let retriever = HybridRetriever::new(source.clone(), RetrievalSettings::default());
        let out = retriever
            .retrieve(&query(), &EngineRequest::new("q"), UserTier::Standard)
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(source.queries.lock().unwrap().as_slice(), ["vector:雪夜对决"]);
    }

    #[tokio::test]
    async fn test_hybrid_basic_weighted_scores() {
        let source = Arc::new(ScriptedSource::new(
            vec![("a", "雪", 1.0), ("b", "夜", 0.5)],
            vec![("b", "夜", 1.0), ("c", "剑", 1.0)],
        ));
        let retriever = HybridRetriever::new(source, RetrievalSettings::default());
        let out = retriever
            .retrieve(&query(), &EngineRequest::new("q"), UserTier::Regular)
            .await
            .unwrap();

        let scores: HashMap<_, _> = out.iter().map(|m| (m.id.as_str(), m.score)).collect();
        assert!((scores["a"] - 0.7).abs() < 1e-9);
        assert!((scores["b"] - 0.65).abs() < 1e-9);
        assert!((scores["c"] - 0.3).abs() < 1e-9);
        assert_eq!(out[0].id, "a");
    }

    #[tokio::test]
    async fn test_hybrid_advanced_expands_and_merges() {
        let source = Arc::new(ScriptedSource::new(vec![("a", "雪", 0.5)], vec![("a", "雪", 0.5)]));
        let retriever = HybridRetriever::new(source.clone(), RetrievalSettings::default());
        let req = EngineRequest::new("q").with_context("characters", json!(["沈青"]));
        let out = retriever.retrieve(&query(), &req, UserTier::Vip).await.unwrap();

        // base + one keyword variant + semantic + keyword + context = 5 hits of "a"
        assert_eq!(out.len(), 1);
        assert!((out[0].score - 0.7).abs() < 1e-9);

        let queries = source.queries.lock().unwrap().clone();
        assert_eq!(queries.len(), 5);
        assert!(queries.contains(&"vector:剑 详细".to_string()));
        assert!(queries.iter().any(|q| q.contains("沈青")));
    }

    #[tokio::test]
    async fn test_post_filter_before_truncation() {
        let source = Arc::new(ScriptedSource::new(
            vec![
                ("bad", "SNOW everywhere", 0.9),
                ("good", "the moon rose", 0.5),
                ("none", "quiet", 0.4),
            ],
            vec![],
        ));
        let retriever = HybridRetriever::new(source, RetrievalSettings::default());
        let mut q = query();
        q.must_avoid = vec!["snow".to_string()];
        q.must_include = vec!["Moon".to_string()];
        let req = EngineRequest::new("q").with_option("top_k", json!(1));

        let out = retriever.retrieve(&q, &req, UserTier::Standard).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "good");
    }

    #[test]
    fn test_explicit_top_k_clamped_to_tier() {
        let retriever = HybridRetriever::new(
            Arc::new(ScriptedSource::new(vec![], vec![])),
            RetrievalSettings::default(),
        );
        let req = EngineRequest::new("q").with_option("top_k", json!(50));
        assert_eq!(retriever.top_k(&req, UserTier::Regular), 10);
        assert_eq!(retriever.top_k(&EngineRequest::new("q"), UserTier::Vip), 20);
    }

    #[test]
    fn test_merge_bonus_capped() {
        let hit = |score| RetrievedMemory {
            id: "x".into(),
            score,
            ..Default::default()
        };
        let hits = vec![hit(0.98), hit(0.9)];
        let merged = merge_duplicates(hits, 0.1);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].score, 1.0);
    }

    #[tokio::test]
    async fn test_source_failure_is_retrieval_error() {
        let retriever =
            HybridRetriever::new(Arc::new(KeywordIndexDown), RetrievalSettings::default());
        let request = EngineRequest::new("q");

        // Standard only runs the vector search
        assert!(retriever.retrieve(&query(), &request, UserTier::Standard).await.is_ok());

        let err = retriever
            .retrieve(&query(), &request, UserTier::Regular)
            .await
            .unwrap_err();
        match err {
            EngineError::Retrieval(msg) => {
                assert!(msg.contains("keyword search failed"));
                assert!(msg.contains("index offline"));
            }
            other => panic!("expected a retrieval error, got {:?}", other),
        }
    }
}
