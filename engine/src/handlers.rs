//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Execute the full pipeline for one request
//! - check: Run the deterministic checker on an existing draft
//! - config: Show, locate or validate the configuration
//! - doctor: Validate configuration and check provider availability

use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::ConfigAction;
use crate::conductor::{build_engine, RunOutcome};
use crate::config::{
    Config, DirectorStrategy, JudgeStrategy, UnderstandingStrategy, WriterStrategy,
};
use crate::consistency::{CheckerSettings, LowLevelChecker};
use crate::llm::router::LLMRouter;
use crate::policy::TierPolicy;
use crate::retrieval::{InMemoryKnowledgeBase, KnowledgeSource};
use quill_sdk::errors::{EngineError, QuillErrorExt};
use quill_sdk::types::{DirectorPlan, EngineRequest, QueryUnderstandingResult, UserTier};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Build a request from a JSON file and/or a query string
///
/// The query string, when given, replaces the file's `user_query`.
pub fn load_request(query: Option<String>, path: Option<&Path>) -> Result<EngineRequest> {
    let mut request = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read request file {:?}", path))?;
            serde_json::from_str::<EngineRequest>(&contents)
                .with_context(|| format!("Failed to parse request file {:?}", path))?
        }
        None => EngineRequest::default(),
    };

    if let Some(query) = query {
        request.user_query = query;
    }
    if request.user_query.trim().is_empty() {
        anyhow::bail!("No query given. Pass --query or a --request file with user_query");
    }
    Ok(request)
}

/// Run the full pipeline
///
/// Prints the accepted draft with its reports, or the rejection with every
/// violation. A rejection is reported as a command failure.
pub async fn handle_run(
    query: Option<String>,
    tier: UserTier,
    request_path: Option<PathBuf>,
    kb_path: Option<PathBuf>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let request = load_request(query, request_path.as_deref())?;

    let knowledge: Option<Arc<dyn KnowledgeSource>> = match kb_path {
        Some(path) => Some(Arc::new(
            InMemoryKnowledgeBase::load(&path).context("Failed to load knowledge base")?,
        )),
        None => None,
    };

    let engine = build_engine(config, knowledge).context("Failed to build engine")?;
    let outcome = engine
        .run(&request, tier)
        .await
        .map_err(pipeline_failure)?;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    match outcome {
        RunOutcome::Accepted(output) => {
            if let OutputFormat::Text = format {
                println!("{}", output.draft);
                println!();
                println!("✓ Draft accepted");
                println!("  Request:  {}", output.request_id);
                println!("  Attempts: {}", output.attempts);
                for report in &output.reports {
                    let score = report
                        .score
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("  {:<12} pass={} score={}", report.checker, report.pass, score);
                    for warning in &report.warnings {
                        println!("    ⚠ {}", warning);
                    }
                }
            }
            Ok(())
        }
        RunOutcome::Rejected(rejection) => {
            if let OutputFormat::Text = format {
                println!("✗ Draft rejected after {} attempt(s)", rejection.attempts);
                println!();
                for (i, violation) in rejection.violations.iter().enumerate() {
                    println!("  {}. {}", i + 1, violation);
                }
            }
            Err(anyhow::anyhow!(
                "Draft rejected with {} violation(s)",
                rejection.violations.len()
            ))
        }
    }
}

/// Run the deterministic checker on a draft file
///
/// Required and forbidden terms come from the request's options. The length
/// budget defaults to the tier ceiling.
pub async fn handle_check(
    draft_path: PathBuf,
    request_path: Option<PathBuf>,
    tier: UserTier,
    max_length: Option<usize>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let draft = std::fs::read_to_string(&draft_path)
        .with_context(|| format!("Failed to read draft {:?}", draft_path))?;
    let request = match request_path {
        Some(path) => load_request(None, Some(&path))?,
        None => EngineRequest::new("(offline check)"),
    };

    let policy = TierPolicy::from_config(&config.tiers);
    let mut plan = DirectorPlan::default();
    plan.generation_parameters.max_length = max_length.unwrap_or_else(|| policy.max_length(tier));

    let query = QueryUnderstandingResult {
        search_intent: request.user_query.clone(),
        must_include: request.option_list("must_include"),
        must_avoid: request.option_list("must_avoid"),
        ..Default::default()
    };

    let checker = LowLevelChecker::new(CheckerSettings::from_config(&config.consistency));
    let report = checker
        .evaluate(&draft, &request, &query, &plan, tier)
        .context("Check failed")?;

    match format {
        OutputFormat::Text => {
            println!(
                "{} {} (score {})",
                if report.pass { "✓" } else { "✗" },
                if report.pass { "Passed" } else { "Failed" },
                report.score.unwrap_or(0)
            );
            for violation in &report.violations {
                println!("  ✗ {}", violation);
            }
            for warning in &report.warnings {
                println!("  ⚠ {}", warning);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    if report.pass {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Draft failed the consistency check"))
    }
}

/// Show, locate or validate the configuration
pub fn handle_config(
    action: ConfigAction,
    config: &Config,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        ConfigAction::Show => match format {
            OutputFormat::Text => {
                let text = toml::to_string_pretty(config).context("Failed to render config")?;
                println!("{}", text);
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        },
        ConfigAction::Path => {
            let path = match config_path {
                Some(path) => path.to_path_buf(),
                None => Config::default_config_path()?,
            };
            match format {
                OutputFormat::Text => println!("{}", path.display()),
                OutputFormat::Json => println!("{}", json!({ "path": path })),
            }
        }
        ConfigAction::Validate => {
            config.validate().context("Configuration is invalid")?;
            match format {
                OutputFormat::Text => println!("✓ Configuration is valid"),
                OutputFormat::Json => println!("{}", json!({ "valid": true })),
            }
        }
    }
    Ok(())
}

/// Validate configuration and check provider availability
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(String, String)> = Vec::new();

    // Check 1: Configuration validation
    match config.validate() {
        Ok(()) => checks.push(("Configuration".to_string(), "Valid".to_string())),
        Err(e) => {
            checks.push(("Configuration".to_string(), "Invalid".to_string()));
            issues.push(e.to_string());
        }
    }

    // Check 2: Stage wiring
    match build_engine(config, None) {
        Ok(engine) => {
            for (stage, strategy) in engine.stage_names() {
                checks.push((format!("Stage {}", stage), strategy));
            }
        }
        Err(e) => issues.push(format!("Cannot build engine: {}", e)),
    }

    checks.push((
        "Sensitive lexicon".to_string(),
        format!("{} terms", config.consistency.sensitive_words.len()),
    ));

    // Check 3: LLM providers
    let router = LLMRouter::new(
        crate::conductor::builder::build_providers(config),
        config.llm.default_provider.clone(),
    );
    let health = router.health_report().await;
    for (name, healthy) in &health {
        let status = if *healthy { "Available" } else { "Not available" };
        checks.push((format!("Provider {}", name), status.to_string()));
    }

    if uses_llm(config) && !health.iter().any(|(_, healthy)| *healthy) {
        issues.push(
            "LLM-backed stages are configured but no provider is reachable. Start Ollama or set an API key."
                .to_string(),
        );
    }

    // Output results
    match format {
        OutputFormat::Text => {
            println!("Quill System Diagnostics");
            println!("============================");
            println!();

            println!("System Checks:");
            for (check, status) in &checks {
                println!("  {:<30} {}", format!("{}:", check), status);
            }

            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({
                        "name": name,
                        "status": status
                    })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Pipeline error with the user hint, and whether a plain retry may help
fn pipeline_failure(error: EngineError) -> anyhow::Error {
    let retry = if error.is_recoverable() {
        "retrying may help"
    } else {
        "fix the input or configuration before retrying"
    };
    let message = format!("Pipeline failed. {} ({})", error.user_hint(), retry);
    anyhow::Error::new(error).context(message)
}

/// True when any configured stage calls a model
fn uses_llm(config: &Config) -> bool {
    let engine = &config.engine;
    engine.query_understanding == UnderstandingStrategy::Llm
        || engine.director == DirectorStrategy::Llm
        || engine.writer == WriterStrategy::Llm
        || engine.judge == JudgeStrategy::Llm
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_request_from_file_with_query_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"user_query": "写雪", "options": {{"must_include": ["剑"]}}}}"#
        )
        .unwrap();

        let request = load_request(Some("写雪夜对决".to_string()), Some(file.path())).unwrap();
        assert_eq!(request.user_query, "写雪夜对决");
        assert_eq!(request.option_list("must_include"), vec!["剑"]);
    }

    #[test]
    fn test_load_request_requires_query() {
        assert!(load_request(None, None).is_err());
        assert!(load_request(Some("  ".to_string()), None).is_err());
    }

    #[test]
    fn test_pipeline_failure_carries_hint() {
        let err = pipeline_failure(EngineError::Retrieval("index offline".to_string()));
        let top = err.to_string();
        assert!(top.contains("Memory retrieval failed. Check the knowledge base"));
        assert!(top.contains("retrying may help"));
        assert!(format!("{:#}", err).contains("Retrieval backend error: index offline"));

        let err = pipeline_failure(EngineError::InvalidRequest("empty query".to_string()));
        assert!(err.to_string().contains("before retrying"));
        assert!(err.downcast_ref::<EngineError>().is_some());
    }

    #[test]
    fn test_uses_llm_follows_strategies() {
        let mut config = Config::default();
        assert!(!uses_llm(&config));
        config.engine.judge = JudgeStrategy::Llm;
        assert!(uses_llm(&config));
    }
}
