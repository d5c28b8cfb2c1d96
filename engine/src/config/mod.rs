//! Configuration management
//!
//! This module handles loading, validation, and management of the Quill configuration.
//! Configuration is stored in TOML format at ~/.quill/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: log level
//! - **llm**: LLM provider settings and per-call timeout
//! - **engine**: stage strategy selection, repair loop bounds, judge policy
//! - **retrieval**: hybrid merge weights and per-tier retrieval depth
//! - **consistency**: sensitive-word lexicon, pass threshold, length tolerance
//! - **tiers**: per-tier draft length and creativity budgets
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! Validation happens once at load time: a bad lexicon or a weight outside
//! `[0, 1]` stops startup instead of surfacing on the first request.
//!
//! # Examples
//!
//! ```no_run
//! use quill_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Default provider: {}", config.llm.default_provider);
//! println!("Max retries: {}", config.engine.max_retries);
//! # Ok(())
//! # }
//! ```

use quill_sdk::errors::EngineError;
use quill_sdk::types::UserTier;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// LLM provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Pipeline wiring
    #[serde(default)]
    pub engine: EngineConfig,

    /// Retrieval tuning
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Deterministic checker tuning
    #[serde(default)]
    pub consistency: ConsistencyConfig,

    /// Tier budgets
    #[serde(default)]
    pub tiers: TiersConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Default LLM provider (ollama, openai)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Timeout for a single chat completion, in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// OpenAI-compatible provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            timeout_secs: default_llm_timeout(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for the chat completions API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

/// Query understanding strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnderstandingStrategy {
    #[default]
    Rule,
    Llm,
}

/// Retriever strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverStrategy {
    #[default]
    Lightweight,
    Hybrid,
}

/// Director strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectorStrategy {
    #[default]
    Rule,
    Llm,
}

/// Writer strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterStrategy {
    #[default]
    Template,
    Llm,
}

/// High-level (semantic) checker strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeStrategy {
    Llm,
    #[default]
    Noop,
}

/// What the semantic judge reports when it cannot produce a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeFailurePolicy {
    /// Pass the draft with a warning
    #[default]
    FailOpen,
    /// Fail the draft (unparseable verdict) or the request (judge unreachable)
    FailClosed,
}

/// Pipeline wiring and repair loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub query_understanding: UnderstandingStrategy,

    #[serde(default)]
    pub retriever: RetrieverStrategy,

    #[serde(default)]
    pub director: DirectorStrategy,

    #[serde(default)]
    pub writer: WriterStrategy,

    #[serde(default)]
    pub judge: JudgeStrategy,

    /// Repair attempts after the first draft
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Re-run the director (not only the writer) on repair
    #[serde(default)]
    pub replan_on_repair: bool,

    #[serde(default)]
    pub on_judge_unavailable: JudgeFailurePolicy,

    /// Deadline for a whole request, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_understanding: UnderstandingStrategy::default(),
            retriever: RetrieverStrategy::default(),
            director: DirectorStrategy::default(),
            writer: WriterStrategy::default(),
            judge: JudgeStrategy::default(),
            max_retries: default_max_retries(),
            replan_on_repair: false,
            on_judge_unavailable: JudgeFailurePolicy::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// A value per user tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierTable<T> {
    pub standard: T,
    pub regular: T,
    pub vip: T,
}

impl<T: Copy> TierTable<T> {
    pub const fn new(standard: T, regular: T, vip: T) -> Self {
        Self {
            standard,
            regular,
            vip,
        }
    }

    /// Value for the given tier
    pub fn get(&self, tier: UserTier) -> T {
        match tier {
            UserTier::Standard => self.standard,
            UserTier::Regular => self.regular,
            UserTier::Vip => self.vip,
        }
    }
}

impl<T: Copy + PartialOrd> TierTable<T> {
    /// True when higher tiers never get less than lower ones
    pub fn is_monotone(&self) -> bool {
        self.standard <= self.regular && self.regular <= self.vip
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Weight of vector similarity in hybrid merging (0.0-1.0)
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,

    /// Weight of keyword search in hybrid merging (0.0-1.0)
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,

    /// Fraction of a duplicate hit's score added to the kept hit (0.0-1.0)
    #[serde(default = "default_merge_bonus")]
    pub merge_bonus: f64,

    /// Hybrid retrieval depth per tier
    #[serde(default = "default_top_k")]
    pub top_k: TierTable<usize>,

    /// Lightweight retrieval depth per tier when the request has no top_k
    #[serde(default = "default_lightweight_top_k")]
    pub lightweight_top_k: TierTable<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            merge_bonus: default_merge_bonus(),
            top_k: default_top_k(),
            lightweight_top_k: default_lightweight_top_k(),
        }
    }
}

/// Deterministic checker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    /// Terms that always block a draft
    #[serde(default = "default_sensitive_words")]
    pub sensitive_words: Vec<String>,

    /// Minimum score (0-100) for a passing draft
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: u8,

    /// Allowed overshoot of max_length per tier (0.0-1.0)
    #[serde(default = "default_length_tolerance")]
    pub length_tolerance: TierTable<f64>,

    /// A token seen more often than this is flagged as repetitive
    #[serde(default = "default_max_token_repeats")]
    pub max_token_repeats: usize,

    /// Number of memory snippets restated in the writer brief
    #[serde(default = "default_writer_snippets")]
    pub writer_snippets: usize,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            sensitive_words: default_sensitive_words(),
            pass_threshold: default_pass_threshold(),
            length_tolerance: default_length_tolerance(),
            max_token_repeats: default_max_token_repeats(),
            writer_snippets: default_writer_snippets(),
        }
    }
}

/// Per-tier generation budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiersConfig {
    /// Ceiling for generation_parameters.max_length, in characters
    #[serde(default = "default_max_length")]
    pub max_length: TierTable<usize>,

    /// Ceiling for generation_parameters.creativity_level (1-10)
    #[serde(default = "default_creativity_ceiling")]
    pub creativity_ceiling: TierTable<u8>,

    /// Creativity used when a strategy does not propose one (1-10)
    #[serde(default = "default_creativity")]
    pub default_creativity: TierTable<u8>,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            creativity_ceiling: default_creativity_ceiling(),
            default_creativity: default_creativity(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "qwen2.5:7b".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_request_timeout() -> u64 {
    600
}

fn default_vector_weight() -> f64 {
    0.7
}

fn default_keyword_weight() -> f64 {
    0.3
}

fn default_merge_bonus() -> f64 {
    0.1
}

fn default_top_k() -> TierTable<usize> {
    TierTable::new(5, 10, 20)
}

fn default_lightweight_top_k() -> TierTable<usize> {
    TierTable::new(5, 8, 12)
}

/// Default lexicon: violence, terror, politics, discrimination, gambling, drugs
pub fn default_sensitive_words() -> Vec<String> {
    [
        "血腥暴力",
        "暴力恐怖",
        "恐怖袭击",
        "恐怖主义",
        "颠覆政权",
        "分裂国家",
        "种族歧视",
        "性别歧视",
        "赌博",
        "赌场",
        "毒品",
        "吸毒",
        "贩毒",
        "terrorist attack",
        "racial slur",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_pass_threshold() -> u8 {
    70
}

fn default_length_tolerance() -> TierTable<f64> {
    TierTable::new(0.05, 0.10, 0.20)
}

fn default_max_token_repeats() -> usize {
    5
}

fn default_writer_snippets() -> usize {
    5
}

fn default_max_length() -> TierTable<usize> {
    TierTable::new(500, 1000, 2000)
}

fn default_creativity_ceiling() -> TierTable<u8> {
    TierTable::new(6, 8, 10)
}

fn default_creativity() -> TierTable<u8> {
    TierTable::new(5, 6, 8)
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_openai_key_env(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.quill/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or written
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();
        config.validate()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.quill/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".quill").join("config.toml"))
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<(), EngineError> {
        // Validate log level
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        // Validate default provider
        let valid_providers = ["ollama", "openai"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(EngineError::Config(
                "llm.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.engine.request_timeout_secs == 0 {
            return Err(EngineError::Config(
                "engine.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.engine.max_retries > 10 {
            return Err(EngineError::Config(
                "engine.max_retries must be at most 10".to_string(),
            ));
        }

        // Validate retrieval weights
        let r = &self.retrieval;
        for (name, value) in [
            ("vector_weight", r.vector_weight),
            ("keyword_weight", r.keyword_weight),
            ("merge_bonus", r.merge_bonus),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "retrieval.{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }
        if r.vector_weight + r.keyword_weight <= 0.0 {
            return Err(EngineError::Config(
                "retrieval weights must not both be zero".to_string(),
            ));
        }
        for (name, table) in [("top_k", r.top_k), ("lightweight_top_k", r.lightweight_top_k)] {
            if table.standard == 0 || !table.is_monotone() {
                return Err(EngineError::Config(format!(
                    "retrieval.{} must be positive and non-decreasing by tier",
                    name
                )));
            }
        }

        // Validate consistency checker
        let c = &self.consistency;
        if c.sensitive_words.is_empty() {
            return Err(EngineError::Config(
                "consistency.sensitive_words must not be empty".to_string(),
            ));
        }
        if c.sensitive_words.iter().any(|w| w.trim().is_empty()) {
            return Err(EngineError::Config(
                "consistency.sensitive_words must not contain blank entries".to_string(),
            ));
        }
        if c.pass_threshold > 100 {
            return Err(EngineError::Config(
                "consistency.pass_threshold must be between 0 and 100".to_string(),
            ));
        }
        let tol = c.length_tolerance;
        if [tol.standard, tol.regular, tol.vip]
            .iter()
            .any(|t| !(0.0..=1.0).contains(t))
            || !tol.is_monotone()
        {
            return Err(EngineError::Config(
                "consistency.length_tolerance must be within 0.0-1.0 and non-decreasing by tier"
                    .to_string(),
            ));
        }
        if c.max_token_repeats == 0 {
            return Err(EngineError::Config(
                "consistency.max_token_repeats must be greater than 0".to_string(),
            ));
        }

        // Validate tier budgets
        let t = &self.tiers;
        if t.max_length.standard == 0 || !t.max_length.is_monotone() {
            return Err(EngineError::Config(
                "tiers.max_length must be positive and non-decreasing by tier".to_string(),
            ));
        }
        for (name, table) in [
            ("creativity_ceiling", t.creativity_ceiling),
            ("default_creativity", t.default_creativity),
        ] {
            if [table.standard, table.regular, table.vip]
                .iter()
                .any(|v| !(1..=10).contains(v))
                || !table.is_monotone()
            {
                return Err(EngineError::Config(format!(
                    "tiers.{} must be within 1-10 and non-decreasing by tier",
                    name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.default_provider, "ollama");
        assert_eq!(config.engine.max_retries, 2);
        assert_eq!(
            config.engine.on_judge_unavailable,
            JudgeFailurePolicy::FailOpen
        );
        assert_eq!(config.tiers.max_length.get(UserTier::Vip), 2000);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.retrieval.top_k.get(UserTier::Regular), 10);
        assert_eq!(config.consistency.pass_threshold, 70);
        assert!(config
            .consistency
            .sensitive_words
            .contains(&"赌博".to_string()));
    }

    #[test]
    fn test_strategy_names_parse() {
        let config = Config::from_toml_str(
            r#"
[engine]
query_understanding = "llm"
retriever = "hybrid"
director = "llm"
writer = "llm"
judge = "llm"
on_judge_unavailable = "fail_closed"
"#,
        )
        .unwrap();

        assert_eq!(config.engine.query_understanding, UnderstandingStrategy::Llm);
        assert_eq!(config.engine.retriever, RetrieverStrategy::Hybrid);
        assert_eq!(config.engine.writer, WriterStrategy::Llm);
        assert_eq!(
            config.engine.on_judge_unavailable,
            JudgeFailurePolicy::FailClosed
        );
    }

    #[test]
    fn test_empty_lexicon_fails_fast() {
        let err = Config::from_toml_str("[consistency]\nsensitive_words = []\n").unwrap_err();
        assert!(err.to_string().contains("sensitive_words"));
    }

    #[test]
    fn test_weight_out_of_range_rejected() {
        let err = Config::from_toml_str("[retrieval]\nvector_weight = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("vector_weight"));
    }

    #[test]
    fn test_non_monotone_tier_table_rejected() {
        let toml = r#"
[tiers.max_length]
standard = 800
regular = 600
vip = 2000
"#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized = Config::from_toml_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(
            config.consistency.sensitive_words,
            deserialized.consistency.sensitive_words
        );
    }
}
