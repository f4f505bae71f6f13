//! sluice - Bounded-concurrency data-movement engine
//!
//! Pulls payloads one at a time from a pluggable source, hands each to an
//! independent worker that transforms it and writes it to a pluggable sink,
//! and reroutes failures to a dead-letter sink. A semaphore caps how many
//! payloads are in flight, so a bursty source can never queue unbounded work.
//!
//! # Modules
//!
//! - `adapters`: Plugin contracts (Source, Sink, Transformer, Cache) and built-ins
//! - `core`: Orchestrator, plugin registry, pipeline assembly
//! - `domain`: Payload envelope
//! - `config`: YAML configuration with environment overrides
//! - `metrics`: Counters and latency timers
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the pipeline described by .sluice/pipeline.yaml
//! sluice run
//!
//! # Run for 30 seconds, reporting metrics every 5
//! sluice run --duration 30 --report-interval 5
//!
//! # List plugins
//! sluice plugins
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod metrics;

// Re-export main types at crate root for convenience
pub use adapters::{Cache, Sink, Source, Transformer};
pub use config::{ConfigError, PipelineConfig};
pub use core::{
    assemble, Orchestrator, OrchestratorSettings, OrchestratorState, PipelineError, PluginKind,
    PluginRegistry,
};
pub use domain::Payload;
pub use metrics::{MetricsRuntime, MetricsSnapshot};
