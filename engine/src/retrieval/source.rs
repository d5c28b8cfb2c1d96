//! Knowledge sources
//!
//! The hybrid retriever talks to its backend through [`KnowledgeSource`]:
//! a vector search and a keyword search, both scoped to an owner, equality
//! filters on record metadata, and a result limit. The shipped
//! implementation is an in-memory knowledge base loaded from a JSON corpus.

use super::embedding::{cosine_similarity, HashedEmbedder};
use crate::text::{char_len, dedupe, is_cjk, split_tokens};
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{EngineRequest, JsonMap, RetrievedMemory};
use serde_json::Value;
use std::path::Path;

/// CJK tokens longer than this are broken into bigrams for keyword search
const MAX_CJK_TERM_CHARS: usize = 4;

/// Where and how much to search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchScope {
    /// Only records owned by this owner (ownerless records are shared)
    pub owner: Option<String>,

    /// Equality filters on record metadata
    pub filters: JsonMap,

    pub limit: usize,
}

impl SearchScope {
    /// Scope taken from `options.owner` and `options.filters`
    pub fn from_request(request: &EngineRequest, limit: usize) -> Self {
        let filters = match request.options.get("filters") {
            Some(Value::Object(map)) => map.clone(),
            _ => JsonMap::new(),
        };
        Self {
            owner: request.option_str("owner").map(String::from),
            filters,
            limit,
        }
    }
}

/// One search result as returned by a knowledge backend
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeHit {
    pub id: String,
    pub title: Option<String>,
    pub content: String,
    /// Backend relevance in [0, 1], if the backend reports one
    pub relevance: Option<f64>,
    pub knowledge_base_title: Option<String>,
    pub meta: JsonMap,
}

impl From<KnowledgeHit> for RetrievedMemory {
    fn from(hit: KnowledgeHit) -> Self {
        let mut meta = hit.meta;
        if let Some(title) = hit.title {
            meta.insert("title".to_string(), Value::String(title));
        }
        if let Some(kb) = hit.knowledge_base_title {
            meta.insert("knowledge_base_title".to_string(), Value::String(kb));
        }
        RetrievedMemory {
            id: hit.id,
            content: hit.content,
            score: hit.relevance.unwrap_or(0.0).clamp(0.0, 1.0),
            meta,
        }
    }
}

/// Search backend consumed by the hybrid retriever
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Semantic similarity search
    async fn vector_search(
        &self,
        query: &str,
        scope: &SearchScope,
    ) -> Result<Vec<KnowledgeHit>, EngineError>;

    /// Term-matching search
    async fn keyword_search(
        &self,
        query: &str,
        scope: &SearchScope,
    ) -> Result<Vec<KnowledgeHit>, EngineError>;
}

/// A corpus entry: either a bare string or `{id, content, meta, ...}`
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeRecord {
    pub id: String,
    pub title: Option<String>,
    pub content: String,
    pub owner: Option<String>,
    pub knowledge_base_title: Option<String>,
    pub meta: JsonMap,
}

impl KnowledgeRecord {
    /// Decode the `index`-th corpus entry; entries without content are skipped
    pub fn from_value(index: usize, value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self {
                id: format!("corpus_{}", index),
                title: None,
                content: s.clone(),
                owner: None,
                knowledge_base_title: None,
                meta: JsonMap::new(),
            }),
            Value::Object(map) => {
                let content = map.get("content").and_then(Value::as_str)?;
                if content.trim().is_empty() {
                    return None;
                }
                let id = match map.get("id") {
                    Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => format!("corpus_{}", index),
                };
                let text = |key: &str| {
                    map.get(key)
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                };
                Some(Self {
                    id,
                    title: text("title"),
                    content: content.to_string(),
                    owner: text("owner"),
                    knowledge_base_title: text("knowledge_base_title"),
                    meta: match map.get("meta") {
                        Some(Value::Object(meta)) => meta.clone(),
                        _ => JsonMap::new(),
                    },
                })
            }
            _ => None,
        }
    }

    /// Decode a JSON array corpus, skipping unusable entries
    pub fn list_from_value(value: &Value) -> Vec<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| Self::from_value(i, item))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn in_scope(&self, scope: &SearchScope) -> bool {
        if let (Some(wanted), Some(owner)) = (&scope.owner, &self.owner) {
            if wanted != owner {
                return false;
            }
        }
        scope
            .filters
            .iter()
            .all(|(key, value)| self.meta.get(key) == Some(value))
    }

    fn searchable_text(&self) -> String {
        match &self.title {
            Some(title) => format!("{}\n{}", title, self.content),
            None => self.content.clone(),
        }
    }

    fn to_hit(&self, relevance: f64) -> KnowledgeHit {
        KnowledgeHit {
            id: self.id.clone(),
            title: self.title.clone(),
            content: self.content.clone(),
            relevance: Some(relevance),
            knowledge_base_title: self.knowledge_base_title.clone(),
            meta: self.meta.clone(),
        }
    }
}

/// Read-only in-memory knowledge base with precomputed embeddings
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledgeBase {
    records: Vec<KnowledgeRecord>,
    embeddings: Vec<Vec<f32>>,
    embedder: HashedEmbedder,
}

impl InMemoryKnowledgeBase {
    pub fn new(records: Vec<KnowledgeRecord>) -> Self {
        let embedder = HashedEmbedder::default();
        let embeddings = records
            .iter()
            .map(|r| embedder.embed(&r.searchable_text()))
            .collect();
        Self {
            records,
            embeddings,
            embedder,
        }
    }

    /// Build from a JSON array corpus
    pub fn from_value(value: &Value) -> Result<Self, EngineError> {
        if !value.is_array() {
            return Err(EngineError::Config(
                "Knowledge base corpus must be a JSON array".to_string(),
            ));
        }
        Ok(Self::new(KnowledgeRecord::list_from_value(value)))
    }

    /// Load a JSON corpus file
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&contents).map_err(|e| {
            EngineError::Config(format!(
                "Failed to parse knowledge base {}: {}",
                path.display(),
                e
            ))
        })?;
        let kb = Self::from_value(&value)?;
        tracing::info!("Loaded {} knowledge records from {}", kb.len(), path.display());
        Ok(kb)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn ranked(&self, mut scored: Vec<(usize, f64)>, limit: usize) -> Vec<KnowledgeHit> {
        scored.retain(|(_, score)| *score > 0.0);
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
            .into_iter()
            .map(|(i, score)| self.records[i].to_hit(score))
            .collect()
    }
}

#[async_trait]
impl KnowledgeSource for InMemoryKnowledgeBase {
    async fn vector_search(
        &self,
        query: &str,
        scope: &SearchScope,
    ) -> Result<Vec<KnowledgeHit>, EngineError> {
        let query_vec = self.embedder.embed(query);
        let scored = self
            .records
            .iter()
            .zip(&self.embeddings)
            .enumerate()
            .filter(|(_, (record, _))| record.in_scope(scope))
            .map(|(i, (_, emb))| (i, cosine_similarity(&query_vec, emb).max(0.0)))
            .collect();
        Ok(self.ranked(scored, scope.limit))
    }

    async fn keyword_search(
        &self,
        query: &str,
        scope: &SearchScope,
    ) -> Result<Vec<KnowledgeHit>, EngineError> {
        let terms = keyword_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let scored = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.in_scope(scope))
            .map(|(i, record)| {
                let text = record.searchable_text().to_lowercase();
                let matched = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (i, matched as f64 / terms.len() as f64)
            })
            .collect();
        Ok(self.ranked(scored, scope.limit))
    }
}

/// Lowercase search terms; long CJK runs become overlapping bigrams
pub fn keyword_terms(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for token in split_tokens(query) {
        let token = token.to_lowercase();
        if char_len(&token) > MAX_CJK_TERM_CHARS && token.chars().any(is_cjk) {
            let chars: Vec<char> = token.chars().collect();
            for pair in chars.windows(2) {
                terms.push(pair.iter().collect::<String>());
            }
        } else {
            terms.push(token);
        }
    }
    dedupe(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kb() -> InMemoryKnowledgeBase {
        InMemoryKnowledgeBase::from_value(&json!([
            {"id": "m1", "title": "雪夜", "content": "雪夜里，沈青与对手拔剑对决。", "owner": "alice", "meta": {"book": 1}},
            {"id": "m2", "content": "春日的花园里举办了一场茶会。", "owner": "bob", "meta": {"book": 2}},
            "孤城之外，风雪漫天。",
            {"content": ""}
        ]))
        .unwrap()
    }

    #[test]
    fn test_corpus_shapes() {
        let kb = kb();
        assert_eq!(kb.len(), 3);
        assert_eq!(kb.records[2].id, "corpus_2");
        assert!(InMemoryKnowledgeBase::from_value(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_keyword_terms_split_long_cjk_runs() {
        assert_eq!(keyword_terms("雪夜 Snow"), vec!["雪夜", "snow"]);
        assert_eq!(keyword_terms("雪夜对决吧"), vec!["雪夜", "夜对", "对决", "决吧"]);
    }

    #[tokio::test]
    async fn test_vector_search_ranks_related_first() {
        let scope = SearchScope {
            limit: 5,
            ..Default::default()
        };
        let hits = kb().vector_search("雪夜剑客对决", &scope).await.unwrap();
        assert_eq!(hits[0].id, "m1");
        assert!(hits.iter().all(|h| h.relevance.unwrap() <= 1.0));
    }

    #[tokio::test]
    async fn test_scope_owner_and_filters() {
        let scope = SearchScope {
            owner: Some("bob".to_string()),
            filters: JsonMap::new(),
            limit: 10,
        };
        let hits = kb().keyword_search("雪夜 茶会 孤城", &scope).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert!(ids.contains(&"m2"));
        assert!(ids.contains(&"corpus_2"));
        assert!(!ids.contains(&"m1"));

        let mut filters = JsonMap::new();
        filters.insert("book".to_string(), json!(1));
        let scope = SearchScope {
            owner: None,
            filters,
            limit: 10,
        };
        let hits = kb().keyword_search("雪夜 茶会", &scope).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "m1");
    }

    #[test]
    fn test_hit_into_memory_keeps_titles() {
        let memory: RetrievedMemory = KnowledgeHit {
            id: "k".to_string(),
            title: Some("T".to_string()),
            content: "c".to_string(),
            relevance: Some(1.7),
            knowledge_base_title: Some("KB".to_string()),
            meta: JsonMap::new(),
        }
        .into();
        assert_eq!(memory.score, 1.0);
        assert_eq!(memory.meta["title"], "T");
        assert_eq!(memory.meta["knowledge_base_title"], "KB");
    }

    #[test]
    fn test_scope_from_request() {
        let req = EngineRequest::new("q")
            .with_option("owner", json!("alice"))
            .with_option("filters", json!({"book": 1}));
        let scope = SearchScope::from_request(&req, 7);
        assert_eq!(scope.owner.as_deref(), Some("alice"));
        assert_eq!(scope.filters["book"], 1);
        assert_eq!(scope.limit, 7);
    }
}
