//! Pipeline assembly.
//!
//! Reads plugin selection from configuration, resolves every plugin through
//! the registry once, and wires them into an [`Orchestrator`]. After this
//! point nothing is looked up by name again.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::adapters::{DedupTransformer, MonitoredSink, MonitoredTransformer};
use crate::config::PipelineConfig;
use crate::metrics::{MetricsRuntime, SINK_LATENCY, TRANSFORM_LATENCY};

use super::error::PipelineError;
use super::orchestrator::{Orchestrator, OrchestratorSettings};
use super::registry::{PluginRegistry, SinkRole};

/// Which plugin fills each slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginSelection {
    /// `source.type`
    pub source: String,

    /// `sink.type`
    pub sink: String,

    /// `dlq.type`
    pub dlq: String,

    /// `transform.type`
    pub transform: String,

    /// `cache.type`
    pub cache: String,

    /// `transform.dedup`: reject ids the cache has already seen
    pub dedup: bool,
}

impl Default for PluginSelection {
    fn default() -> Self {
        Self {
            source: "SYNTHETIC".to_string(),
            sink: "LOG".to_string(),
            dlq: "DLQ_LOG".to_string(),
            transform: "NOOP".to_string(),
            cache: "LOCAL".to_string(),
            dedup: false,
        }
    }
}

impl PluginSelection {
    /// Read the selection keys, falling back to defaults
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let defaults = Self::default();
        Ok(Self {
            source: config.get_str_or("source.type", &defaults.source),
            sink: config.get_str_or("sink.type", &defaults.sink),
            dlq: config.get_str_or("dlq.type", &defaults.dlq),
            transform: config.get_str_or("transform.type", &defaults.transform),
            cache: config.get_str_or("cache.type", &defaults.cache),
            dedup: config.get_or("transform.dedup", defaults.dedup)?,
        })
    }
}

/// Build the metrics runtime `metrics.enabled` asks for (default: enabled)
pub fn metrics_from_config(config: &PipelineConfig) -> Result<Arc<MetricsRuntime>, PipelineError> {
    if config.get_or("metrics.enabled", true)? {
        Ok(MetricsRuntime::enabled())
    } else {
        Ok(MetricsRuntime::disabled())
    }
}

/// Resolve every plugin named in `config` and compose an orchestrator.
///
/// The transformer is wrapped with [`DedupTransformer`] when
/// `transform.dedup` is set, and the transformer and primary sink record
/// latency when `metrics` is enabled. All failures here are fatal startup
/// errors.
pub fn assemble(
    config: &PipelineConfig,
    registry: &PluginRegistry,
    metrics: Arc<MetricsRuntime>,
) -> Result<Orchestrator<String, String>, PipelineError> {
    let selection = PluginSelection::from_config(config)?;
    let settings = OrchestratorSettings::from_config(config)?;

    let source = registry.resolve_source(&selection.source, config, &metrics)?;
    let mut primary = registry.resolve_sink(&selection.sink, SinkRole::Primary, config, &metrics)?;
    let dlq = registry.resolve_sink(&selection.dlq, SinkRole::DeadLetter, config, &metrics)?;
    let mut transformer = registry.resolve_transformer(&selection.transform, config, &metrics)?;
    let cache = registry.resolve_cache(&selection.cache, config, &metrics)?;

    if selection.dedup {
        transformer = Arc::new(DedupTransformer::new(transformer, Arc::clone(&cache)));
    }
    if metrics.is_enabled() {
        transformer = Arc::new(MonitoredTransformer::new(transformer, TRANSFORM_LATENCY, &metrics));
        primary = Arc::new(MonitoredSink::new(primary, SINK_LATENCY, &metrics));
    }

    info!(
        source = %selection.source,
        sink = %selection.sink,
        dlq = %selection.dlq,
        transform = %selection.transform,
        cache = %selection.cache,
        dedup = selection.dedup,
        max_in_flight = settings.max_in_flight,
        "Pipeline assembled"
    );

    Ok(Orchestrator::new(source, transformer, primary, dlq, settings)?
        .with_cache(cache)
        .with_metrics(metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Cache;
    use crate::config::ConfigError;
    use crate::core::registry::PluginKind;

    const TEST_PIPELINE_YAML: &str = r#"
pipeline:
  max_in_flight: 4
source:
  type: synthetic
  synthetic:
    payload_size: 16
    limit: 10
sink:
  type: devnull
transform:
  type: upper
  dedup: true
metrics:
  enabled: false
"#;

    #[test]
    fn test_selection_defaults() {
        let selection = PluginSelection::from_config(&PipelineConfig::new()).unwrap();
        assert_eq!(selection, PluginSelection::default());
    }

    #[test]
    fn test_selection_from_yaml() {
        let config = PipelineConfig::from_yaml(TEST_PIPELINE_YAML).unwrap();
        let selection = PluginSelection::from_config(&config).unwrap();

        assert_eq!(selection.source, "synthetic");
        assert_eq!(selection.sink, "devnull");
        assert_eq!(selection.dlq, "DLQ_LOG");
        assert!(selection.dedup);
        assert!(!metrics_from_config(&config).unwrap().is_enabled());
    }

    #[test]
    fn test_assemble_from_yaml() {
        let config = PipelineConfig::from_yaml(TEST_PIPELINE_YAML).unwrap();
        let registry = PluginRegistry::with_builtins();

        let orchestrator = assemble(&config, &registry, MetricsRuntime::disabled()).unwrap();

        assert_eq!(orchestrator.settings().max_in_flight, 4);
        assert_eq!(orchestrator.cache().name(), "local");
        assert!(!orchestrator.metrics().is_enabled());
    }

    #[test]
    fn test_assemble_unknown_plugin() {
        let config = PipelineConfig::new().with("sink.type", "kafka");
        let registry = PluginRegistry::with_builtins();

        let err = assemble(&config, &registry, MetricsRuntime::disabled())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PipelineError::UnknownPlugin { kind: PluginKind::Sink, ref id } if id == "KAFKA"
        ));
    }

    #[test]
    fn test_assemble_invalid_dedup_flag() {
        let config = PipelineConfig::new().with("transform.dedup", "maybe");
        let registry = PluginRegistry::with_builtins();

        let err = assemble(&config, &registry, MetricsRuntime::disabled())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::InvalidValue { ref key, .. }) if key == "transform.dedup"
        ));
    }
}
