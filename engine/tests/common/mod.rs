//! Shared helpers for the engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use quill_engine::conductor::Engine;
use quill_engine::consistency::{ConsistencyChecker, LowLevelChecker, NoopJudge};
use quill_engine::director::RuleDirector;
use quill_engine::llm::{ChatClient, LLMError, LLMProvider, Message};
use quill_engine::policy::TierPolicy;
use quill_engine::retrieval::{LightweightRetriever, RetrievalSettings};
use quill_engine::understanding::RuleBasedUnderstanding;
use quill_engine::writer::{TemplateWriter, Writer};
use quill_sdk::errors::EngineError;
use quill_sdk::types::{
    DirectorPlan, EngineRequest, QueryUnderstandingResult, RetrievedMemory, UserTier,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Provider that answers from a queue and records every user prompt
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate(&self, messages: &[Message]) -> quill_engine::llm::Result<String> {
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LLMError::ProviderUnavailable("script exhausted".to_string()))
    }
}

pub fn chat(provider: Arc<ScriptedProvider>) -> ChatClient {
    ChatClient::new(provider, Duration::from_secs(5))
}

/// Writer that returns the given drafts in order, repeating the last one
pub struct FixedWriter {
    drafts: Vec<String>,
    calls: Mutex<usize>,
    pub plans: Mutex<Vec<DirectorPlan>>,
}

impl FixedWriter {
    pub fn new<I, S>(drafts: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            drafts: drafts.into_iter().map(Into::into).collect(),
            calls: Mutex::new(0),
            plans: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Writer for FixedWriter {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn write(
        &self,
        _request: &EngineRequest,
        _query: &QueryUnderstandingResult,
        _memories: &[RetrievedMemory],
        plan: &DirectorPlan,
        _tier: UserTier,
    ) -> Result<String, EngineError> {
        self.plans.lock().unwrap().push(plan.clone());
        let mut calls = self.calls.lock().unwrap();
        let index = (*calls).min(self.drafts.len().saturating_sub(1));
        *calls += 1;
        Ok(self.drafts.get(index).cloned().unwrap_or_default())
    }
}

/// Writer that never finishes in time
pub struct StalledWriter;

#[async_trait]
impl Writer for StalledWriter {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn write(
        &self,
        _request: &EngineRequest,
        _query: &QueryUnderstandingResult,
        _memories: &[RetrievedMemory],
        _plan: &DirectorPlan,
        _tier: UserTier,
    ) -> Result<String, EngineError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(String::new())
    }
}

/// Offline engine with the given writer and judge
pub fn offline_engine(writer: Arc<dyn Writer>, judge: Arc<dyn ConsistencyChecker>) -> Engine {
    Engine::new(
        Arc::new(RuleBasedUnderstanding::new()),
        Arc::new(LightweightRetriever::new(RetrievalSettings::default())),
        Arc::new(RuleDirector::default()),
        writer,
        Arc::new(LowLevelChecker::default()),
        judge,
        TierPolicy::default(),
    )
}

/// Fully deterministic engine
pub fn template_engine() -> Engine {
    offline_engine(Arc::new(TemplateWriter::default()), Arc::new(NoopJudge))
}

/// `n` distinct CJK characters with no sentence breaks or lexicon terms
pub fn prose(n: usize) -> String {
    (0..n)
        .map(|i| char::from_u32(0x4E00 + (i as u32 * 7) % 2000).unwrap_or('字'))
        .collect()
}
