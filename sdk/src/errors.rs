//! Error types and handling
//!
//! This module provides the error types used throughout the Quill engine.
//! All errors implement the `QuillErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! A draft that fails validation is *not* an error: rejection is a regular
//! outcome of the pipeline and is reported as a structured value by the
//! engine. `EngineError` only covers conditions under which the pipeline
//! could not produce a verdict at all.
//!
//! # Security
//!
//! User hints are static strings. They never echo provider responses, API
//! keys or request content.

use thiserror::Error;

/// Trait for Quill error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait QuillErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried as-is (network blips, timeouts).
    /// Non-recoverable errors need a configuration or request change first.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: invalid configuration detected at startup
/// - **Request**: malformed per-request input detected before any stage runs
/// - **External service**: the chat-completion capability or the retrieval
///   backend could not be reached, or did not answer in time
/// - **Generation**: a stage with no documented fallback produced unusable output
///
/// # Examples
///
/// ```
/// use quill_sdk::errors::{EngineError, QuillErrorExt};
///
/// let error = EngineError::LLMTimeout { secs: 30 };
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::Config("empty lexicon".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Request validation errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // External capability errors
    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("LLM call timed out after {secs}s")]
    LLMTimeout { secs: u64 },

    #[error("Request exceeded its deadline of {secs}s")]
    RequestTimeout { secs: u64 },

    #[error("Retrieval backend error: {0}")]
    Retrieval(String),

    // Generation errors
    #[error("Generation failure: {0}")]
    GenerationFailure(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuillErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::InvalidRequest(_) => "Check the request query and its options",
            Self::ExternalService(_) => {
                "LLM provider unavailable. Check your API keys and network"
            }
            Self::LLMTimeout { .. } => "LLM provider took too long to respond. Try again",
            Self::RequestTimeout { .. } => "The request took too long. Try a lower tier or retry",
            Self::Retrieval(_) => "Memory retrieval failed. Check the knowledge base",
            Self::GenerationFailure(_) => "The writer produced no usable draft. Try again",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::InvalidRequest(_) | Self::GenerationFailure(_) => false,
            _ => true,
        }
    }
}
