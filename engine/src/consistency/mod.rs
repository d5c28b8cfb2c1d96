//! Consistency checking
//!
//! Two tiers of validation run on every draft:
//!
//! - [`LowLevelChecker`]: deterministic gate (length, required and forbidden
//!   terms, coherence, format, repetition, sensitive content). No I/O.
//! - A semantic judge: [`LlmJudge`] asks a model for a verdict, [`NoopJudge`]
//!   always passes. The judge only runs on drafts that cleared the gate.

pub mod judge;
pub mod low_level;
pub mod repair;

pub use judge::{LlmJudge, NoopJudge};
pub use low_level::LowLevelChecker;
pub use repair::{RepairNote, REPAIR_PREFIX};

use crate::config::{ConsistencyConfig, TierTable};
use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use quill_sdk::types::{
    ConsistencyReport, DirectorPlan, EngineRequest, QueryUnderstandingResult, RetrievedMemory,
    UserTier,
};
use serde_json::Value;

#[async_trait]
pub trait ConsistencyChecker: Send + Sync {
    fn name(&self) -> &str;

    async fn check(
        &self,
        draft: &str,
        request: &EngineRequest,
        query: &QueryUnderstandingResult,
        memories: &[RetrievedMemory],
        plan: &DirectorPlan,
        tier: UserTier,
    ) -> Result<ConsistencyReport, EngineError>;
}

/// Immutable settings for the deterministic checker, taken from `[consistency]`
#[derive(Debug, Clone)]
pub struct CheckerSettings {
    pub sensitive_words: Vec<String>,
    pub pass_threshold: u8,
    pub length_tolerance: TierTable<f64>,
    pub max_token_repeats: usize,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self::from_config(&ConsistencyConfig::default())
    }
}

impl CheckerSettings {
    pub fn from_config(config: &ConsistencyConfig) -> Self {
        Self {
            sensitive_words: config.sensitive_words.clone(),
            pass_threshold: config.pass_threshold,
            length_tolerance: config.length_tolerance,
            max_token_repeats: config.max_token_repeats,
        }
    }
}

/// `options.format_requirements`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatRequirements {
    pub min_paragraphs: Option<usize>,
    pub require_dialogue: bool,
}

impl FormatRequirements {
    /// `Ok(None)` when the request sets no format requirements
    pub fn from_request(request: &EngineRequest) -> Result<Option<Self>, EngineError> {
        match request.options.get("format_requirements") {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Self::from_value(value).map(Some),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, EngineError> {
        let map = value.as_object().ok_or_else(|| {
            EngineError::InvalidRequest("format_requirements must be an object".to_string())
        })?;

        let mut requirements = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "min_paragraphs" => {
                    let n = value.as_u64().ok_or_else(|| {
                        EngineError::InvalidRequest(format!(
                            "format_requirements.min_paragraphs must be a non-negative integer, got {}",
                            value
                        ))
                    })?;
                    requirements.min_paragraphs = Some(n as usize);
                }
                "require_dialogue" => {
                    requirements.require_dialogue = value.as_bool().ok_or_else(|| {
                        EngineError::InvalidRequest(format!(
                            "format_requirements.require_dialogue must be a boolean, got {}",
                            value
                        ))
                    })?;
                }
                other => {
                    return Err(EngineError::InvalidRequest(format!(
                        "Unknown format requirement '{}'",
                        other
                    )))
                }
            }
        }
        Ok(requirements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_requirements_parsing() {
        let req = EngineRequest::new("q").with_option(
            "format_requirements",
            json!({"min_paragraphs": 3, "require_dialogue": true}),
        );
        assert_eq!(
            FormatRequirements::from_request(&req).unwrap(),
            Some(FormatRequirements {
                min_paragraphs: Some(3),
                require_dialogue: true,
            })
        );
        assert_eq!(FormatRequirements::from_request(&EngineRequest::new("q")).unwrap(), None);
    }

    #[test]
    fn test_malformed_format_requirements() {
        for bad in [
            json!("three paragraphs"),
            json!({"min_paragraphs": -1}),
            json!({"require_dialogue": "yes"}),
            json!({"max_paragraphs": 2}),
        ] {
            let req = EngineRequest::new("q").with_option("format_requirements", bad);
            assert!(matches!(
                FormatRequirements::from_request(&req),
                Err(EngineError::InvalidRequest(_))
            ));
        }
    }
}
