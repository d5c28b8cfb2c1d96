//! Quill Engine Library
//!
//! Creative-writing pipeline: query understanding, memory retrieval,
//! planning, drafting and two tiers of consistency checking, driven by a
//! bounded repair loop. Used by the `quill` binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// LLM provider abstraction layer
pub mod llm;

/// Per-tier generation budgets
pub mod policy;

/// Character-safe text helpers
pub mod text;

/// Stage 1: query understanding
pub mod understanding;

/// Stage 2: memory retrieval
pub mod retrieval;

/// Stage 3: planning
pub mod director;

/// Stage 4: drafting
pub mod writer;

/// Stage 5: consistency checking
pub mod consistency;

/// Pipeline orchestration
pub mod conductor;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

pub use conductor::{build_engine, Engine, EngineOutput, PipelineState, Rejection, RunOutcome};
