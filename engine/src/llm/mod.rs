//! LLM Provider Abstraction Layer
//!
//! The writing engine consumes a single capability from language models: a
//! chat completion taking a system message and a prompt and returning text.
//! The `LLMProvider` trait is the transport-level contract implemented by
//! each vendor adapter (Ollama, OpenAI-compatible) and by the failover
//! router. `ChatClient` wraps a provider with the per-call timeout and maps
//! transport failures into `EngineError`, so pipeline stages never see
//! vendor-specific errors.

use async_trait::async_trait;
use quill_sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod json;
pub mod ollama;
pub mod openai;
pub mod router;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Message in a chat completion request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama)
    fn is_local(&self) -> bool;

    /// Generate a completion for the conversation and return its text
    async fn generate(&self, messages: &[Message]) -> Result<String>;

    /// Check if the provider is currently healthy and available
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Chat-completion client used by the pipeline stages.
///
/// Treats the provider as a pure function from `(system, prompt)` to text.
/// A call that does not return within the timeout is an
/// `EngineError::LLMTimeout`; any transport failure is an
/// `EngineError::ExternalService`. Malformed *content* is returned as-is:
/// each stage owns its parsing fallback.
#[derive(Clone)]
pub struct ChatClient {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Name of the underlying provider
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one chat completion
    pub async fn complete(
        &self,
        system: &str,
        prompt: &str,
    ) -> std::result::Result<String, EngineError> {
        let messages = [Message::system(system), Message::user(prompt)];

        tracing::debug!(
            "LLM call via {}: system_chars={}, prompt_chars={}",
            self.provider.name(),
            system.chars().count(),
            prompt.chars().count()
        );

        match tokio::time::timeout(self.timeout, self.provider.generate(&messages)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(LLMError::Timeout)) => {
                tracing::error!("LLM provider {} reported a timeout", self.provider.name());
                Err(EngineError::LLMTimeout {
                    secs: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                tracing::error!("LLM call via {} failed: {}", self.provider.name(), e);
                Err(EngineError::ExternalService(e.to_string()))
            }
            Err(_) => {
                tracing::error!(
                    "LLM call via {} timed out after {}s",
                    self.provider.name(),
                    self.timeout.as_secs()
                );
                Err(EngineError::LLMTimeout {
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProvider;

    #[async_trait]
    impl LLMProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        fn is_local(&self) -> bool {
            true
        }

        async fn generate(&self, _messages: &[Message]) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    struct DownProvider;

    #[async_trait]
    impl LLMProvider for DownProvider {
        fn name(&self) -> &str {
            "down"
        }

        fn is_local(&self) -> bool {
            false
        }

        async fn generate(&self, _messages: &[Message]) -> Result<String> {
            Err(LLMError::NetworkError("connection refused".to_string()))
        }
    }

    struct EchoProvider;

    #[async_trait]
    impl LLMProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn is_local(&self) -> bool {
            true
        }

        async fn generate(&self, messages: &[Message]) -> Result<String> {
            Ok(format!("{}|{}", messages[0].content, messages[1].content))
        }
    }

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");

        let system_msg = Message::system("You are a novelist");
        assert_eq!(system_msg.role, MessageRole::System);
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
    }

    #[tokio::test]
    async fn test_chat_client_sends_system_then_prompt() {
        let client = ChatClient::new(Arc::new(EchoProvider), Duration::from_secs(1));
        let text = client.complete("sys", "prompt").await.unwrap();
        assert_eq!(text, "sys|prompt");
    }

    #[tokio::test]
    async fn test_chat_client_timeout_is_distinct_error() {
        let client = ChatClient::new(Arc::new(SlowProvider), Duration::from_millis(20));
        let err = client.complete("sys", "prompt").await.unwrap_err();
        assert!(matches!(err, EngineError::LLMTimeout { .. }));
    }

    #[tokio::test]
    async fn test_chat_client_maps_transport_errors() {
        let client = ChatClient::new(Arc::new(DownProvider), Duration::from_secs(1));
        let err = client.complete("sys", "prompt").await.unwrap_err();
        match err {
            EngineError::ExternalService(msg) => assert!(msg.contains("connection refused")),
            other => panic!("Expected ExternalService, got: {:?}", other),
        }
    }
}
