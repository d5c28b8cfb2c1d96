//! Engine wiring
//!
//! Turns a validated [`Config`] into an [`Engine`]: one implementation per
//! stage, chosen by the `[engine]` strategy names. LLM-backed stages share a
//! single [`ChatClient`] over the failover router.

use super::Engine;
use crate::config::{
    Config, DirectorStrategy, JudgeStrategy, RetrieverStrategy, UnderstandingStrategy,
    WriterStrategy,
};
use crate::consistency::{
    CheckerSettings, ConsistencyChecker, LlmJudge, LowLevelChecker, NoopJudge,
};
use crate::director::{Director, LlmDirector, RuleDirector};
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAIProvider;
use crate::llm::router::LLMRouter;
use crate::llm::{ChatClient, LLMProvider};
use crate::policy::TierPolicy;
use crate::retrieval::{
    HybridRetriever, InMemoryKnowledgeBase, KnowledgeSource, LightweightRetriever,
    RetrievalSettings, Retriever,
};
use crate::understanding::{LlmUnderstanding, QueryUnderstanding, RuleBasedUnderstanding};
use crate::writer::{LlmWriter, TemplateWriter, Writer};
use quill_sdk::errors::EngineError;
use std::sync::Arc;
use std::time::Duration;

/// Providers configured in `[llm]`
///
/// Ollama is always registered. The OpenAI-compatible provider is added
/// only when its key variable is set.
pub fn build_providers(config: &Config) -> Vec<Box<dyn LLMProvider>> {
    let mut providers: Vec<Box<dyn LLMProvider>> = Vec::new();
    providers.push(Box::new(OllamaProvider::new(
        config.llm.ollama.base_url.clone(),
        config.llm.ollama.model.clone(),
    )));

    let openai = OpenAIProvider::new(config.llm.openai.clone());
    if openai.has_api_key() {
        providers.push(Box::new(openai));
    } else {
        tracing::debug!(
            "{} not set, OpenAI-compatible provider disabled",
            config.llm.openai.api_key_env
        );
    }
    providers
}

/// Chat client over the failover router
pub fn build_chat_client(config: &Config) -> ChatClient {
    let router = LLMRouter::new(build_providers(config), config.llm.default_provider.clone());
    ChatClient::new(
        Arc::new(router),
        Duration::from_secs(config.llm.timeout_secs),
    )
}

/// Build an engine from configuration
///
/// `knowledge` backs the hybrid retriever; without one it searches an empty
/// knowledge base. The lightweight retriever ignores it.
pub fn build_engine(
    config: &Config,
    knowledge: Option<Arc<dyn KnowledgeSource>>,
) -> Result<Engine, EngineError> {
    config.validate()?;

    let policy = TierPolicy::from_config(&config.tiers);
    let retrieval = RetrievalSettings::from_config(&config.retrieval);
    let checker = CheckerSettings::from_config(&config.consistency);
    let snippets = config.consistency.writer_snippets;
    let chat = build_chat_client(config);
    let strategies = &config.engine;

    let understanding: Arc<dyn QueryUnderstanding> = match strategies.query_understanding {
        UnderstandingStrategy::Rule => Arc::new(RuleBasedUnderstanding::new()),
        UnderstandingStrategy::Llm => Arc::new(LlmUnderstanding::new(chat.clone())),
    };

    let retriever: Arc<dyn Retriever> = match strategies.retriever {
        RetrieverStrategy::Lightweight => Arc::new(LightweightRetriever::new(retrieval)),
        RetrieverStrategy::Hybrid => {
            let source = knowledge.unwrap_or_else(|| {
                tracing::warn!("Hybrid retriever has no knowledge base, searching an empty one");
                Arc::new(InMemoryKnowledgeBase::new(Vec::new()))
            });
            Arc::new(HybridRetriever::new(source, retrieval))
        }
    };

    let director: Arc<dyn Director> = match strategies.director {
        DirectorStrategy::Rule => Arc::new(RuleDirector::new(policy.clone())),
        DirectorStrategy::Llm => Arc::new(LlmDirector::new(chat.clone(), policy.clone())),
    };

    let writer: Arc<dyn Writer> = match strategies.writer {
        WriterStrategy::Template => Arc::new(TemplateWriter::new(snippets)),
        WriterStrategy::Llm => Arc::new(LlmWriter::new(chat.clone(), snippets)),
    };

    let pass_threshold = checker.pass_threshold;
    let low_checker: Arc<dyn ConsistencyChecker> = Arc::new(LowLevelChecker::new(checker));

    let judge: Arc<dyn ConsistencyChecker> = match strategies.judge {
        JudgeStrategy::Llm => Arc::new(LlmJudge::new(
            chat,
            strategies.on_judge_unavailable,
            pass_threshold,
        )),
        JudgeStrategy::Noop => Arc::new(NoopJudge),
    };

    let engine = Engine::new(
        understanding,
        retriever,
        director,
        writer,
        low_checker,
        judge,
        policy,
    )
    .with_max_retries(strategies.max_retries)
    .with_replan_on_repair(strategies.replan_on_repair)
    .with_request_timeout(Duration::from_secs(strategies.request_timeout_secs));

    for (stage, strategy) in engine.stage_names() {
        tracing::debug!("{} -> {}", stage, strategy);
    }
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JudgeFailurePolicy;

    #[test]
    fn test_default_config_wires_offline_stages() {
        let engine = build_engine(&Config::default(), None).unwrap();
        let names: Vec<String> = engine.stage_names().into_iter().map(|(_, s)| s).collect();
        assert_eq!(names[0], "rule");
        assert_eq!(names[4], "low_level");
    }

    #[test]
    fn test_strategy_selection() {
        let mut config = Config::default();
        config.engine.query_understanding = UnderstandingStrategy::Llm;
        config.engine.retriever = RetrieverStrategy::Hybrid;
        config.engine.director = DirectorStrategy::Llm;
        config.engine.writer = WriterStrategy::Llm;
        config.engine.judge = JudgeStrategy::Llm;
        config.engine.on_judge_unavailable = JudgeFailurePolicy::FailClosed;

        let engine = build_engine(&config, None).unwrap();
        let names: Vec<(&str, String)> = engine.stage_names();
        assert_eq!(names[0].1, "llm");
        assert_eq!(names[1].1, "hybrid");
        assert_eq!(names[2].1, "llm");
        assert_eq!(names[3].1, "llm");
        assert_eq!(names[5].1, "llm_judge");
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let mut config = Config::default();
        config.consistency.sensitive_words.clear();
        assert!(matches!(
            build_engine(&config, None),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_ollama_always_registered() {
        let providers = build_providers(&Config::default());
        assert_eq!(providers[0].name(), "ollama");
    }
}
