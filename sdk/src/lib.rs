//! Quill SDK
//!
//! Shared data contract and error taxonomy for the Quill writing engine.
//! Callers that embed the engine, and alternative stage implementations,
//! depend on this crate only.

/// Error types and handling
pub mod errors;

/// Pipeline data contract
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, QuillErrorExt};
pub use types::{
    ConsistencyReport, ContentStructure, DirectorPlan, EngineRequest, GenerationParameters,
    JsonMap, MemoryHint, QualityConstraints, QueryUnderstandingResult, ResourceUtilization,
    RetrievedMemory, SuccessCriteria, UserTier, WritingGuidelines,
};
