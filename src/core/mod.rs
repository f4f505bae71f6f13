//! Core engine.
//!
//! This module contains:
//! - Orchestrator: dispatch loop, backpressure and lifecycle
//! - Registry: plugin factories keyed by type name
//! - Pipeline: assembling an orchestrator from configuration
//! - Error: fatal startup errors

pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;

// Re-export commonly used types
pub use error::PipelineError;
pub use orchestrator::{
    default_max_in_flight, Orchestrator, OrchestratorSettings, OrchestratorState,
};
pub use pipeline::{assemble, metrics_from_config, PluginSelection};
pub use registry::{PluginKind, PluginRegistry, SinkRole};
