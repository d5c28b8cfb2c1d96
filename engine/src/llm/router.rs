//! LLM Router
//!
//! Orders the configured providers and fails over between them. The router
//! is itself an `LLMProvider`, so pipeline stages are unaware of how many
//! vendors sit behind their chat client.
//!
//! Ranking:
//! 1. The configured default provider first
//! 2. Local providers before cloud providers
//! 3. Registration order otherwise (stable sort)

use super::{LLMError, LLMProvider, Message};
use async_trait::async_trait;

/// LLM Router that tries providers in rank order
pub struct LLMRouter {
    /// Available LLM providers
    providers: Vec<Box<dyn LLMProvider>>,

    /// Name of the preferred provider
    default_provider: String,
}

impl LLMRouter {
    /// Create a new LLM router
    pub fn new(providers: Vec<Box<dyn LLMProvider>>, default_provider: impl Into<String>) -> Self {
        Self {
            providers,
            default_provider: default_provider.into(),
        }
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// True when no provider is registered
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Providers in the order they will be attempted
    pub fn rank_providers(&self) -> Vec<&dyn LLMProvider> {
        let mut providers: Vec<&dyn LLMProvider> =
            self.providers.iter().map(|b| b.as_ref()).collect();

        providers.sort_by_key(|p| {
            let not_default = p.name() != self.default_provider;
            let not_local = !p.is_local();
            (not_default, not_local)
        });

        providers
    }

    /// Check the health of all registered providers
    /// Returns a list of (provider_name, is_healthy)
    pub async fn health_report(&self) -> Vec<(String, bool)> {
        let mut results = Vec::new();
        for provider in &self.providers {
            let is_healthy = provider.check_health().await;
            results.push((provider.name().to_string(), is_healthy));
        }
        results
    }
}

#[async_trait]
impl LLMProvider for LLMRouter {
    fn name(&self) -> &str {
        "router"
    }

    fn is_local(&self) -> bool {
        self.providers.iter().all(|p| p.is_local())
    }

    /// Call providers in rank order, returning the first success
    async fn generate(&self, messages: &[Message]) -> super::Result<String> {
        if self.providers.is_empty() {
            return Err(LLMError::ProviderUnavailable(
                "No LLM providers configured".to_string(),
            ));
        }

        let mut last_error = None;
        for provider in self.rank_providers() {
            tracing::debug!("Attempting provider: {}", provider.name());

            match provider.generate(messages).await {
                Ok(text) => {
                    tracing::debug!("Provider {} succeeded", provider.name());
                    return Ok(text);
                }
                Err(e) => {
                    tracing::warn!("Provider {} failed: {}", provider.name(), e);
                    last_error = Some(e);
                }
            }
        }

        tracing::error!("All LLM providers exhausted");
        match last_error {
            // A lone timeout stays a timeout so the chat client reports it as such
            Some(LLMError::Timeout) if self.providers.len() == 1 => Err(LLMError::Timeout),
            Some(e) => Err(LLMError::ProviderUnavailable(format!(
                "All LLM providers failed, last error: {}",
                e
            ))),
            None => Err(LLMError::ProviderUnavailable(
                "All LLM providers failed".to_string(),
            )),
        }
    }

    async fn check_health(&self) -> bool {
        for provider in &self.providers {
            if provider.check_health().await {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Mock provider for testing
    struct MockProvider {
        name: String,
        is_local: bool,
        fails: bool,
    }

    impl MockProvider {
        fn new(name: &str, is_local: bool, fails: bool) -> Self {
            Self {
                name: name.to_string(),
                is_local,
                fails,
            }
        }
    }

    #[async_trait]
    impl LLMProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_local(&self) -> bool {
            self.is_local
        }

        async fn generate(&self, _messages: &[Message]) -> super::super::Result<String> {
            if self.fails {
                Err(LLMError::NetworkError(format!("{} is down", self.name)))
            } else {
                Ok(format!("answer from {}", self.name))
            }
        }

        async fn check_health(&self) -> bool {
            !self.fails
        }
    }

    #[test]
    fn test_default_provider_ranks_first() {
        let router = LLMRouter::new(
            vec![
                Box::new(MockProvider::new("ollama", true, false)),
                Box::new(MockProvider::new("openai", false, false)),
            ],
            "openai",
        );

        let ranked = router.rank_providers();
        assert_eq!(ranked[0].name(), "openai");
        assert_eq!(ranked[1].name(), "ollama");
    }

    #[test]
    fn test_local_before_cloud_when_default_missing() {
        let router = LLMRouter::new(
            vec![
                Box::new(MockProvider::new("cloud", false, false)),
                Box::new(MockProvider::new("local", true, false)),
            ],
            "nonexistent",
        );

        let ranked = router.rank_providers();
        assert_eq!(ranked[0].name(), "local");
    }

    #[tokio::test]
    async fn test_failover_to_next_provider() {
        let router = LLMRouter::new(
            vec![
                Box::new(MockProvider::new("ollama", true, true)),
                Box::new(MockProvider::new("openai", false, false)),
            ],
            "ollama",
        );

        let text = router.generate(&[Message::user("hi")]).await.unwrap();
        assert_eq!(text, "answer from openai");
        assert!(router.check_health().await);
    }

    #[tokio::test]
    async fn test_all_providers_exhausted() {
        let router = LLMRouter::new(
            vec![Box::new(MockProvider::new("ollama", true, true))],
            "ollama",
        );

        match router.generate(&[Message::user("hi")]).await {
            Err(LLMError::ProviderUnavailable(msg)) => assert!(msg.contains("ollama is down")),
            other => panic!("Expected ProviderUnavailable, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_router_errors() {
        let router = LLMRouter::new(vec![], "ollama");
        assert!(router.is_empty());
        assert!(router.generate(&[Message::user("hi")]).await.is_err());
    }
}
