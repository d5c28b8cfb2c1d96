//! LLM-based query understanding
//!
//! Sends the request to the model with a fixed JSON output contract and
//! parses the answer with the three-tier parser from `llm::json`. When no
//! object can be recovered the raw answer becomes the search intent and
//! keywords are scraped from any "关键词/keywords" lines.

use super::{base_metadata, collect_list, continuation_intent, is_continuation, QueryUnderstanding};
use crate::llm::json::{list_field, parse_object, str_field, ParsedJson};
use crate::llm::ChatClient;
use crate::text::{char_len, dedupe, split_tokens};
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{string_list, EngineRequest, JsonMap, QueryUnderstandingResult, UserTier};
use serde_json::Value;

/// VIP results are padded up to this many keywords
const MIN_VIP_KEYWORDS: usize = 5;

const SYSTEM_PROMPT: &str = r#"You are the query analyst of a fiction-writing assistant.
Read the user's writing request and its context, then answer with ONE JSON object and nothing else:

{
  "search_intent": "the request rewritten as a rich retrieval query",
  "keywords": ["short", "search", "terms"],
  "must_include": ["terms the draft must contain"],
  "must_avoid": ["terms the draft must not contain"],
  "metadata": {"style": "...", "tone": "...", "genre": "..."}
}

Rules:
- Keep names, places and objects exactly as written by the user
- Only put a term in must_include / must_avoid when the user clearly demands it
- If the user asks to continue, the search_intent must reference the previous excerpt"#;

/// Context fields forwarded to the model when present
const CONTEXT_FIELDS: &[&str] = &[
    "last_excerpt",
    "characters",
    "setting",
    "plot_requirements",
    "style",
    "tone",
    "entities",
];

pub struct LlmUnderstanding {
    chat: ChatClient,
}

impl LlmUnderstanding {
    pub fn new(chat: ChatClient) -> Self {
        Self { chat }
    }

    fn build_prompt(&self, request: &EngineRequest, tier: UserTier) -> String {
        let mut prompt = format!("User request: {}\n", request.user_query.trim());

        for key in CONTEXT_FIELDS {
            if let Some(value) = request.context.get(*key) {
                if let Some(text) = render_value(value) {
                    prompt.push_str(&format!("{}: {}\n", key, text));
                }
            }
        }

        for key in ["must_include", "must_avoid", "keywords"] {
            let items = request.option_list(key);
            if !items.is_empty() {
                prompt.push_str(&format!("Requested {}: {}\n", key, items.join(", ")));
            }
        }

        prompt.push_str(&format!("User tier: {}\n", tier.label()));
        prompt
    }
}

#[async_trait]
impl QueryUnderstanding for LlmUnderstanding {
    fn name(&self) -> &str {
        "llm"
    }

    async fn understand(
        &self,
        request: &EngineRequest,
        tier: UserTier,
    ) -> Result<QueryUnderstandingResult, EngineError> {
        let prompt = self.build_prompt(request, tier);
        let raw = self.chat.complete(SYSTEM_PROMPT, &prompt).await?;
        Ok(parse_response(&raw, request, tier))
    }
}

/// Decode the model answer, applying caller constraints and tier padding
pub fn parse_response(
    raw: &str,
    request: &EngineRequest,
    tier: UserTier,
) -> QueryUnderstandingResult {
    let parsed = parse_object(raw);
    tracing::debug!("Query understanding response parsed via {} tier", parsed.tier());

    let mut result = match parsed {
        ParsedJson::Strict(map) | ParsedJson::Extracted(map) => from_object(&map),
        ParsedJson::Unparsed(text) => {
            tracing::warn!("Query understanding response was not JSON, using textual fallback");
            textual_fallback(&text)
        }
    };

    if result.search_intent.trim().is_empty() {
        result.search_intent = request.user_query.trim().to_string();
    }

    // A continuation stays anchored to the excerpt whatever the model rewrote
    let continuation = is_continuation(&request.user_query);
    if let Some(excerpt) = request.context_str("last_excerpt") {
        if continuation && !result.search_intent.contains(excerpt.trim()) {
            result.search_intent = continuation_intent(excerpt, &result.search_intent);
        }
    }

    // Explicit caller constraints always survive the model's rewrite
    result.keywords = dedupe(result.keywords.iter().chain(&collect_list(request, "keywords")));
    result.must_include = dedupe(
        result
            .must_include
            .iter()
            .chain(&collect_list(request, "must_include")),
    );
    result.must_avoid = dedupe(
        result
            .must_avoid
            .iter()
            .chain(&collect_list(request, "must_avoid")),
    );

    for (key, value) in base_metadata(request, tier) {
        result.metadata.entry(key).or_insert(value);
    }
    result
        .metadata
        .entry("continuation")
        .or_insert(Value::Bool(continuation));

    if tier == UserTier::Vip {
        enrich_for_vip(&mut result, request);
    }

    result
}

fn from_object(map: &JsonMap) -> QueryUnderstandingResult {
    let metadata = match map.get("metadata") {
        Some(Value::Object(meta)) => meta.clone(),
        _ => JsonMap::new(),
    };

    QueryUnderstandingResult {
        search_intent: str_field(map, "search_intent").unwrap_or_default().to_string(),
        keywords: dedupe(list_field(map, "keywords")),
        must_include: dedupe(list_field(map, "must_include")),
        must_avoid: dedupe(list_field(map, "must_avoid")),
        metadata,
    }
}

fn textual_fallback(text: &str) -> QueryUnderstandingResult {
    let keywords = text
        .lines()
        .filter(|line| line.contains("关键词") || line.to_lowercase().contains("keywords"))
        .flat_map(|line| {
            let tail = line
                .split_once([':', '：'])
                .map(|(_, rest)| rest)
                .unwrap_or("");
            string_list(&Value::String(tail.to_string()))
        });

    QueryUnderstandingResult {
        search_intent: text.trim().to_string(),
        keywords: dedupe(keywords),
        ..Default::default()
    }
}

fn enrich_for_vip(result: &mut QueryUnderstandingResult, request: &EngineRequest) {
    if result.keywords.len() < MIN_VIP_KEYWORDS {
        let query_terms: Vec<String> = split_tokens(&request.user_query)
            .into_iter()
            .filter(|t| char_len(t) >= 2)
            .map(String::from)
            .collect();

        let candidates = result
            .keywords
            .iter()
            .cloned()
            .chain(result.must_include.iter().cloned())
            .chain(request.context_list("entities"))
            .chain(request.context_list("characters"))
            .chain(query_terms);

        let mut padded = dedupe(candidates);
        padded.truncate(MIN_VIP_KEYWORDS);
        result.keywords = padded;
    }

    let filters = result
        .metadata
        .entry("filters")
        .or_insert_with(|| Value::Object(JsonMap::new()));
    if !filters.is_object() {
        *filters = Value::Object(JsonMap::new());
    }
    if let Value::Object(map) = filters {
        map.insert("user_level".to_string(), Value::String("vip".to_string()));
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(_) => {
            let items = string_list(value);
            (!items.is_empty()).then(|| items.join(", "))
        }
        Value::Object(_) => Some(value.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
