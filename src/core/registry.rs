//! Plugin registry.
//!
//! Maps configuration-supplied type names to factories building sources,
//! sinks, transformers and caches. Ids are case-insensitive and unique per
//! kind; they are stored upper-cased (`SYNTHETIC`, `DLQ_LOG`).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::adapters::{
    Cache, DevNullSink, DlqLogSink, FileSink, LocalCache, LogSink, NoopCache, NoopTransformer,
    RestSource, RestSourceConfig, Sink, Source, SyntheticSource, Transformer,
    UppercaseTransformer,
};
use crate::config::{ConfigError, PipelineConfig};
use crate::metrics::MetricsRuntime;

use super::error::PipelineError;

/// Plugin category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginKind {
    Source,
    Sink,
    Transformer,
    Cache,
}

impl PluginKind {
    /// All kinds, in display order
    pub const ALL: [PluginKind; 4] = [
        PluginKind::Source,
        PluginKind::Sink,
        PluginKind::Transformer,
        PluginKind::Cache,
    ];
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Sink => write!(f, "sink"),
            Self::Transformer => write!(f, "transformer"),
            Self::Cache => write!(f, "cache"),
        }
    }
}

/// Where a sink is being wired in; decides its config prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkRole {
    /// Primary destination (`sink.*`)
    Primary,
    /// Dead-letter queue (`dlq.*`)
    DeadLetter,
}

impl SinkRole {
    /// Config key prefix for this role
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Primary => "sink",
            Self::DeadLetter => "dlq",
        }
    }
}

pub type SourceFactory = Box<
    dyn Fn(&PipelineConfig, &Arc<MetricsRuntime>) -> anyhow::Result<Box<dyn Source<String>>>
        + Send
        + Sync,
>;

pub type SinkFactory = Box<
    dyn Fn(&PipelineConfig, &Arc<MetricsRuntime>, SinkRole) -> anyhow::Result<Arc<dyn Sink<String>>>
        + Send
        + Sync,
>;

pub type TransformerFactory = Box<
    dyn Fn(
            &PipelineConfig,
            &Arc<MetricsRuntime>,
        ) -> anyhow::Result<Arc<dyn Transformer<String, String>>>
        + Send
        + Sync,
>;

pub type CacheFactory = Box<
    dyn Fn(&PipelineConfig, &Arc<MetricsRuntime>) -> anyhow::Result<Arc<dyn Cache<String>>>
        + Send
        + Sync,
>;

/// Registry of tagged plugin factories for `String` pipelines
#[derive(Default)]
pub struct PluginRegistry {
    sources: BTreeMap<String, SourceFactory>,
    sinks: BTreeMap<String, SinkFactory>,
    transformers: BTreeMap<String, TransformerFactory>,
    caches: BTreeMap<String, CacheFactory>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("sinks", &self.sinks.keys().collect::<Vec<_>>())
            .field("transformers", &self.transformers.keys().collect::<Vec<_>>())
            .field("caches", &self.caches.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn normalize(id: &str) -> String {
    id.trim().to_ascii_uppercase()
}

fn insert_unique<F>(
    map: &mut BTreeMap<String, F>,
    kind: PluginKind,
    id: &str,
    factory: F,
) -> Result<(), PipelineError> {
    let id = normalize(id);
    if map.contains_key(&id) {
        return Err(PipelineError::DuplicatePlugin { kind, id });
    }
    map.insert(id, factory);
    Ok(())
}

fn init_error(kind: PluginKind, id: &str, err: anyhow::Error) -> PipelineError {
    // Missing or malformed keys keep their config error kind
    match err.downcast::<ConfigError>() {
        Ok(config_err) => PipelineError::Config(config_err),
        Err(err) => PipelineError::PluginInit {
            kind,
            id: id.to_string(),
            reason: format!("{:#}", err),
        },
    }
}

// ============================================================================
// Built-in factories
// ============================================================================

fn synthetic_source(
    config: &PipelineConfig,
    _metrics: &Arc<MetricsRuntime>,
) -> anyhow::Result<Box<dyn Source<String>>> {
    Ok(Box::new(SyntheticSource::from_config(config)?))
}

fn rest_source(
    config: &PipelineConfig,
    _metrics: &Arc<MetricsRuntime>,
) -> anyhow::Result<Box<dyn Source<String>>> {
    Ok(Box::new(RestSource::new(RestSourceConfig::from_config(config)?)))
}

fn devnull_sink(
    _config: &PipelineConfig,
    _metrics: &Arc<MetricsRuntime>,
    _role: SinkRole,
) -> anyhow::Result<Arc<dyn Sink<String>>> {
    Ok(Arc::new(DevNullSink))
}

fn log_sink(
    _config: &PipelineConfig,
    _metrics: &Arc<MetricsRuntime>,
    _role: SinkRole,
) -> anyhow::Result<Arc<dyn Sink<String>>> {
    Ok(Arc::new(LogSink))
}

fn dlq_log_sink(
    _config: &PipelineConfig,
    _metrics: &Arc<MetricsRuntime>,
    _role: SinkRole,
) -> anyhow::Result<Arc<dyn Sink<String>>> {
    Ok(Arc::new(DlqLogSink))
}

fn file_sink(
    config: &PipelineConfig,
    _metrics: &Arc<MetricsRuntime>,
    role: SinkRole,
) -> anyhow::Result<Arc<dyn Sink<String>>> {
    Ok(Arc::new(FileSink::from_config(config, role.prefix())?))
}

fn noop_transformer(
    _config: &PipelineConfig,
    _metrics: &Arc<MetricsRuntime>,
) -> anyhow::Result<Arc<dyn Transformer<String, String>>> {
    Ok(Arc::new(NoopTransformer))
}

fn upper_transformer(
    _config: &PipelineConfig,
    _metrics: &Arc<MetricsRuntime>,
) -> anyhow::Result<Arc<dyn Transformer<String, String>>> {
    Ok(Arc::new(UppercaseTransformer))
}

fn noop_cache(
    _config: &PipelineConfig,
    _metrics: &Arc<MetricsRuntime>,
) -> anyhow::Result<Arc<dyn Cache<String>>> {
    Ok(Arc::new(NoopCache))
}

fn local_cache(
    _config: &PipelineConfig,
    _metrics: &Arc<MetricsRuntime>,
) -> anyhow::Result<Arc<dyn Cache<String>>> {
    Ok(Arc::new(LocalCache::<String>::new()))
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every built-in plugin
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtins();
        registry
    }

    fn register_builtins(&mut self) {
        // Fresh maps, so ids cannot collide
        self.sources.insert("SYNTHETIC".into(), Box::new(synthetic_source));
        self.sources.insert("REST".into(), Box::new(rest_source));

        self.sinks.insert("DEVNULL".into(), Box::new(devnull_sink));
        self.sinks.insert("LOG".into(), Box::new(log_sink));
        self.sinks.insert("DLQ_LOG".into(), Box::new(dlq_log_sink));
        self.sinks.insert("FILE".into(), Box::new(file_sink));

        self.transformers.insert("NOOP".into(), Box::new(noop_transformer));
        self.transformers.insert("UPPER".into(), Box::new(upper_transformer));

        self.caches.insert("NOOP".into(), Box::new(noop_cache));
        self.caches.insert("LOCAL".into(), Box::new(local_cache));
    }

    /// Register a source factory
    pub fn register_source<F>(&mut self, id: &str, factory: F) -> Result<(), PipelineError>
    where
        F: Fn(&PipelineConfig, &Arc<MetricsRuntime>) -> anyhow::Result<Box<dyn Source<String>>>
            + Send
            + Sync
            + 'static,
    {
        insert_unique(&mut self.sources, PluginKind::Source, id, Box::new(factory))
    }

    /// Register a sink factory (used for both primary and DLQ roles)
    pub fn register_sink<F>(&mut self, id: &str, factory: F) -> Result<(), PipelineError>
    where
        F: Fn(&PipelineConfig, &Arc<MetricsRuntime>, SinkRole) -> anyhow::Result<Arc<dyn Sink<String>>>
            + Send
            + Sync
            + 'static,
    {
        insert_unique(&mut self.sinks, PluginKind::Sink, id, Box::new(factory))
    }

    /// Register a transformer factory
    pub fn register_transformer<F>(&mut self, id: &str, factory: F) -> Result<(), PipelineError>
    where
        F: Fn(
                &PipelineConfig,
                &Arc<MetricsRuntime>,
            ) -> anyhow::Result<Arc<dyn Transformer<String, String>>>
            + Send
            + Sync
            + 'static,
    {
        insert_unique(
            &mut self.transformers,
            PluginKind::Transformer,
            id,
            Box::new(factory),
        )
    }

    /// Register a cache factory
    pub fn register_cache<F>(&mut self, id: &str, factory: F) -> Result<(), PipelineError>
    where
        F: Fn(&PipelineConfig, &Arc<MetricsRuntime>) -> anyhow::Result<Arc<dyn Cache<String>>>
            + Send
            + Sync
            + 'static,
    {
        insert_unique(&mut self.caches, PluginKind::Cache, id, Box::new(factory))
    }

    /// Build the source registered as `id`
    pub fn resolve_source(
        &self,
        id: &str,
        config: &PipelineConfig,
        metrics: &Arc<MetricsRuntime>,
    ) -> Result<Box<dyn Source<String>>, PipelineError> {
        let key = normalize(id);
        let factory = self.sources.get(&key).ok_or(PipelineError::UnknownPlugin {
            kind: PluginKind::Source,
            id: key.clone(),
        })?;
        factory(config, metrics).map_err(|e| init_error(PluginKind::Source, &key, e))
    }

    /// Build the sink registered as `id` for the given role
    pub fn resolve_sink(
        &self,
        id: &str,
        role: SinkRole,
        config: &PipelineConfig,
        metrics: &Arc<MetricsRuntime>,
    ) -> Result<Arc<dyn Sink<String>>, PipelineError> {
        let key = normalize(id);
        let factory = self.sinks.get(&key).ok_or(PipelineError::UnknownPlugin {
            kind: PluginKind::Sink,
            id: key.clone(),
        })?;
        factory(config, metrics, role).map_err(|e| init_error(PluginKind::Sink, &key, e))
    }

    /// Build the transformer registered as `id`
    pub fn resolve_transformer(
        &self,
        id: &str,
        config: &PipelineConfig,
        metrics: &Arc<MetricsRuntime>,
    ) -> Result<Arc<dyn Transformer<String, String>>, PipelineError> {
        let key = normalize(id);
        let factory = self
            .transformers
            .get(&key)
            .ok_or(PipelineError::UnknownPlugin {
                kind: PluginKind::Transformer,
                id: key.clone(),
            })?;
        factory(config, metrics).map_err(|e| init_error(PluginKind::Transformer, &key, e))
    }

    /// Build the cache registered as `id`
    pub fn resolve_cache(
        &self,
        id: &str,
        config: &PipelineConfig,
        metrics: &Arc<MetricsRuntime>,
    ) -> Result<Arc<dyn Cache<String>>, PipelineError> {
        let key = normalize(id);
        let factory = self.caches.get(&key).ok_or(PipelineError::UnknownPlugin {
            kind: PluginKind::Cache,
            id: key.clone(),
        })?;
        factory(config, metrics).map_err(|e| init_error(PluginKind::Cache, &key, e))
    }

    /// Registered ids for a kind, sorted
    pub fn registered(&self, kind: PluginKind) -> Vec<String> {
        match kind {
            PluginKind::Source => self.sources.keys().cloned().collect(),
            PluginKind::Sink => self.sinks.keys().cloned().collect(),
            PluginKind::Transformer => self.transformers.keys().cloned().collect(),
            PluginKind::Cache => self.caches.keys().cloned().collect(),
        }
    }

    /// Whether `id` is registered for `kind`
    pub fn has_plugin(&self, kind: PluginKind, id: &str) -> bool {
        let key = normalize(id);
        match kind {
            PluginKind::Source => self.sources.contains_key(&key),
            PluginKind::Sink => self.sinks.contains_key(&key),
            PluginKind::Transformer => self.transformers.contains_key(&key),
            PluginKind::Cache => self.caches.contains_key(&key),
        }
    }
}
