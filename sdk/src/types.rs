//! Pipeline data contract
//!
//! Every stage of the writing engine reads and produces the types in this
//! module. They are plain serde structs so that requests can be loaded from
//! JSON files, LLM responses can be decoded into them, and outcomes can be
//! printed for audit.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Free-form JSON object used for request context, options and metadata.
pub type JsonMap = Map<String, Value>;

/// Service level supplied by the caller.
///
/// The ordinal ranking (`Standard < Regular < Vip`) drives every budget in the
/// pipeline: retrieval depth, maximum draft length, creativity and the length
/// tolerance of the deterministic checker. The engine never mutates it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    #[default]
    Standard,
    Regular,
    Vip,
}

impl UserTier {
    /// All tiers in ascending order.
    pub const ALL: [UserTier; 3] = [UserTier::Standard, UserTier::Regular, UserTier::Vip];

    /// Ordinal rank, 0 for the lowest tier.
    pub fn rank(&self) -> u8 {
        match self {
            UserTier::Standard => 0,
            UserTier::Regular => 1,
            UserTier::Vip => 2,
        }
    }

    /// Lowercase label used in prompts, logs and metadata.
    pub fn label(&self) -> &'static str {
        match self {
            UserTier::Standard => "standard",
            UserTier::Regular => "regular",
            UserTier::Vip => "vip",
        }
    }
}

impl fmt::Display for UserTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for UserTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(UserTier::Standard),
            "regular" => Ok(UserTier::Regular),
            "vip" => Ok(UserTier::Vip),
            other => Err(format!(
                "Unknown tier '{}'. Must be one of: standard, regular, vip",
                other
            )),
        }
    }
}

/// A single writing request. Immutable once handed to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineRequest {
    /// Raw user request text
    #[serde(alias = "userQuery")]
    pub user_query: String,

    /// Creative hints: last_excerpt, characters, setting, plot_requirements,
    /// style, tone, memory_corpus, entities
    #[serde(default)]
    pub context: JsonMap,

    /// Constraints: must_include, must_avoid, keywords, filters, top_k,
    /// format_requirements
    #[serde(default)]
    pub options: JsonMap,
}

impl EngineRequest {
    /// Create a request with empty context and options
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            context: JsonMap::new(),
            options: JsonMap::new(),
        }
    }

    /// Builder-style context insertion
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Builder-style option insertion
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Trimmed, non-empty string value from `context`
    pub fn context_str(&self, key: &str) -> Option<&str> {
        non_empty_str(self.context.get(key))
    }

    /// Trimmed, non-empty string value from `options`
    pub fn option_str(&self, key: &str) -> Option<&str> {
        non_empty_str(self.options.get(key))
    }

    /// String list from `context`, see [`string_list`]
    pub fn context_list(&self, key: &str) -> Vec<String> {
        self.context.get(key).map(string_list).unwrap_or_default()
    }

    /// String list from `options`, see [`string_list`]
    pub fn option_list(&self, key: &str) -> Vec<String> {
        self.options.get(key).map(string_list).unwrap_or_default()
    }

    /// Positive integer option (accepts JSON numbers and numeric strings)
    pub fn option_usize(&self, key: &str) -> Option<usize> {
        match self.options.get(key)? {
            Value::Number(n) => n.as_u64().map(|v| v as usize),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Interpret a JSON value as a list of strings.
///
/// Arrays keep their string (and number) elements; a single string is split
/// on ASCII and CJK list separators. Entries are trimmed and empty entries
/// dropped. Order is preserved and duplicates are *not* removed here.
pub fn string_list(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) => s
            .split([',', '，', '、', ';', '；', '\n'])
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    };

    raw.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Structured search intent produced once per request by query understanding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryUnderstandingResult {
    /// Semantically enriched query
    pub search_intent: String,

    /// Deduplicated, trimmed keywords
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Terms the draft must contain
    #[serde(default)]
    pub must_include: Vec<String>,

    /// Terms the draft must not contain
    #[serde(default)]
    pub must_avoid: Vec<String>,

    /// style / tone / genre / filters
    #[serde(default)]
    pub metadata: JsonMap,
}

/// One ranked memory snippet.
///
/// `score` is local to the retriever strategy that produced it and is not
/// comparable across strategies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievedMemory {
    pub id: String,
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub meta: JsonMap,
}

/// Four-beat outline of the draft.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContentStructure {
    pub introduction: String,
    pub development: String,
    pub climax: String,
    pub conclusion: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WritingGuidelines {
    pub style: String,
    pub tone: String,
    pub pace: String,
    pub detail_level: String,
}

/// Which retrieved memories the writer leans on, and how.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceUtilization {
    pub primary_memories: Vec<String>,
    pub secondary_memories: Vec<String>,
    pub integration_strategy: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QualityConstraints {
    pub must_include: Vec<String>,
    pub must_avoid: Vec<String>,
    /// Checkpoints the writer must honour; repair attempts append the
    /// violations of the previous draft here.
    pub consistency_checks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationParameters {
    /// Target draft length in characters, always tier-clamped
    pub max_length: usize,
    /// 1..=10
    pub creativity_level: u8,
    pub focus_areas: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuccessCriteria {
    pub content_quality: String,
    pub relevance: String,
    pub consistency: String,
    pub creativity: String,
}

/// Short pointer to a retrieved memory kept on the plan for the writer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryHint {
    pub id: String,
    pub excerpt: String,
}

/// Structured generation plan.
///
/// All seven sections are always populated; strategies that omit a section
/// get the tier-adjusted default for it. The type makes a partially valid
/// plan unrepresentable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DirectorPlan {
    pub plan_summary: String,
    pub content_structure: ContentStructure,
    pub writing_guidelines: WritingGuidelines,
    pub resource_utilization: ResourceUtilization,
    pub quality_constraints: QualityConstraints,
    pub generation_parameters: GenerationParameters,
    pub success_criteria: SuccessCriteria,

    /// Keywords copied through from query understanding
    #[serde(default)]
    pub keywords: Vec<String>,

    /// `{id, excerpt}` per retrieved memory
    #[serde(default)]
    pub memory_hints: Vec<MemoryHint>,
}

/// Verdict of one consistency checker on one draft.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConsistencyReport {
    /// Name of the checker that produced this report
    #[serde(default)]
    pub checker: String,

    pub pass: bool,

    /// Blocking issues
    #[serde(default)]
    pub violations: Vec<String>,

    /// Non-blocking issues
    #[serde(default)]
    pub warnings: Vec<String>,

    /// 0..=100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonMap>,

    /// Whether the orchestrator may retry with modified guidance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repairable: Option<bool>,
}

impl ConsistencyReport {
    /// Passing report with nothing to say
    pub fn passed(checker: impl Into<String>) -> Self {
        Self {
            checker: checker.into(),
            pass: true,
            ..Default::default()
        }
    }

    /// True when the orchestrator may attempt a repair
    pub fn is_repairable(&self) -> bool {
        self.repairable.unwrap_or(false)
    }
}
