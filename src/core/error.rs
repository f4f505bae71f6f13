//! Fatal pipeline errors.
//!
//! Only startup problems surface as errors. Per-payload failures, fetch
//! errors and shutdown trouble are contained by the orchestrator and show up
//! in logs and metrics instead.

use thiserror::Error;

use crate::config::ConfigError;

use super::registry::PluginKind;

/// Error surfaced by pipeline assembly and `Orchestrator::start`
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No {kind} plugin registered as '{id}'")]
    UnknownPlugin { kind: PluginKind, id: String },

    #[error("{kind} plugin '{id}' is already registered")]
    DuplicatePlugin { kind: PluginKind, id: String },

    #[error("Failed to build {kind} plugin '{id}': {reason}")]
    PluginInit {
        kind: PluginKind,
        id: String,
        reason: String,
    },

    #[error("Source '{name}' failed to connect: {reason}")]
    SourceConnect { name: String, reason: String },

    #[error("max_in_flight must be at least 1")]
    InvalidConcurrency,
}

impl PipelineError {
    /// True for errors caused by configuration rather than a collaborator
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::UnknownPlugin { .. }
                | Self::DuplicatePlugin { .. }
                | Self::PluginInit { .. }
                | Self::InvalidConcurrency
        )
    }
}
