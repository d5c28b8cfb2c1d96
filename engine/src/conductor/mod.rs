//! Conductor
//!
//! Orchestrates the pipeline stages for each request and wires them from
//! configuration.

pub mod builder;
pub mod engine;

pub use builder::build_engine;
pub use engine::{Engine, EngineOutput, PipelineState, Rejection, RunOutcome};
