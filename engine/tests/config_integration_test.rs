//! Integration tests for configuration management
//!
//! Loads configuration files from disk and checks that invalid settings are
//! rejected at load time, before any request is processed.

use quill_engine::conductor::build_engine;
use quill_engine::config::{
    Config, DirectorStrategy, JudgeFailurePolicy, JudgeStrategy, WriterStrategy,
};
use quill_sdk::errors::EngineError;
use quill_sdk::types::UserTier;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_config_toml_parsing() {
    let file = write_config(
        r#"
[core]
log_level = "debug"

[llm]
default_provider = "openai"
timeout_secs = 30

[llm.ollama]
base_url = "http://localhost:11434"
model = "qwen2.5:14b"

[llm.openai]
base_url = "https://api.deepseek.com/v1"
model = "deepseek-chat"
api_key_env = "DEEPSEEK_API_KEY"

[engine]
director = "llm"
writer = "llm"
judge = "llm"
max_retries = 1
replan_on_repair = true
on_judge_unavailable = "fail_closed"
request_timeout_secs = 120

[retrieval]
vector_weight = 0.6
keyword_weight = 0.4

[retrieval.top_k]
standard = 4
regular = 8
vip = 16

[consistency]
sensitive_words = ["赌博", "毒品"]
pass_threshold = 75

[tiers.max_length]
standard = 600
regular = 1200
vip = 3000
"#,
    );

    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.llm.default_provider, "openai");
    assert_eq!(config.llm.openai.api_key_env, "DEEPSEEK_API_KEY");
    assert_eq!(config.engine.director, DirectorStrategy::Llm);
    assert_eq!(config.engine.writer, WriterStrategy::Llm);
    assert_eq!(config.engine.judge, JudgeStrategy::Llm);
    assert_eq!(config.engine.max_retries, 1);
    assert!(config.engine.replan_on_repair);
    assert_eq!(
        config.engine.on_judge_unavailable,
        JudgeFailurePolicy::FailClosed
    );
    assert_eq!(config.retrieval.top_k.get(UserTier::Vip), 16);
    assert_eq!(config.consistency.sensitive_words.len(), 2);
    assert_eq!(config.tiers.max_length.get(UserTier::Standard), 600);
    // untouched sections keep their defaults
    assert_eq!(config.retrieval.lightweight_top_k.get(UserTier::Regular), 8);
    assert_eq!(config.consistency.max_token_repeats, 5);

    assert!(build_engine(&config, None).is_ok());
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load_from_path(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn test_invalid_values_fail_fast() {
    for (toml, needle) in [
        ("[core]\nlog_level = \"loud\"\n", "log level"),
        ("[llm]\ndefault_provider = \"gemini\"\n", "provider"),
        ("[consistency]\nsensitive_words = [\"赌博\", \"  \"]\n", "sensitive_words"),
        ("[consistency]\npass_threshold = 101\n", "pass_threshold"),
        ("[engine]\nmax_retries = 50\n", "max_retries"),
        ("[engine]\nwriter = \"poet\"\n", "parse"),
    ] {
        let file = write_config(toml);
        let err = Config::load_from_path(file.path()).unwrap_err();
        assert!(
            err.to_string().contains(needle),
            "{:?} should mention {:?}, got {}",
            toml,
            needle,
            err
        );
    }
}

#[test]
fn test_default_config_round_trips_through_disk() {
    let text = toml::to_string_pretty(&Config::default()).unwrap();
    let file = write_config(&text);
    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.engine.max_retries, 2);
    assert_eq!(config.tiers.creativity_ceiling.get(UserTier::Regular), 8);
    assert_eq!(
        config.consistency.length_tolerance.get(UserTier::Vip),
        0.20
    );
}
