//! Ollama provider
//!
//! Talks to a local Ollama server (default `http://localhost:11434`) through
//! the non-streaming `/api/chat` endpoint. Every stage parses the complete
//! answer, so there is no token streaming here.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::{LLMError, LLMProvider, Message, Result};

/// Connection guard only; the chat client owns the real per-call deadline
const CONNECTION_GUARD_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(CONNECTION_GUARD_SECS))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_body<'a>(&'a self, messages: &'a [Message]) -> ChatBody<'a> {
        ChatBody {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.to_string(),
                    content: &m.content,
                })
                .collect(),
            stream: false,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> LLMError {
        if e.is_timeout() {
            LLMError::Timeout
        } else if e.is_connect() {
            LLMError::ProviderUnavailable(format!(
                "Cannot connect to Ollama at {}. Is `ollama serve` running?",
                self.base_url
            ))
        } else {
            LLMError::NetworkError(e.to_string())
        }
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate(&self, messages: &[Message]) -> Result<String> {
        let body = self.chat_body(messages);
        tracing::debug!(
            "Ollama chat: model={}, messages={}",
            self.model,
            body.messages.len()
        );

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderUnavailable(format!(
                "Ollama returned {}: {}",
                status, detail
            )));
        }

        let reply: ChatReply = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Unexpected Ollama reply: {}", e)))?;

        tracing::info!(
            "Ollama answered {} chars in {:.1}s",
            reply.message.content.chars().count(),
            started.elapsed().as_secs_f64()
        );
        Ok(reply.message.content)
    }

    async fn check_health(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map(|resp| resp.status().is_success())
            .unwrap_or(false)
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: String,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatReply {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: String,
}
