//! Pipeline configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (`SLUICE_<SECTION>__<KEY>`, e.g. `SLUICE_SOURCE__TYPE`)
//! 2. Config file (.sluice/pipeline.yaml)
//! 3. Defaults supplied at the lookup site
//!
//! Config file discovery:
//! - An explicit path (`--config`) wins
//! - Otherwise searches current directory and parents for .sluice/pipeline.yaml
//! - Then falls back to ~/.sluice/pipeline.yaml
//!
//! The YAML tree is flattened into dotted keys, so
//!
//! ```yaml
//! source:
//!   type: rest
//!   rest:
//!     url: http://localhost:8080/events
//! ```
//!
//! is read back as `source.type` and `source.rest.url`.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde_yaml::Value;
use thiserror::Error;

/// Directory holding the pipeline config file
pub const CONFIG_DIR: &str = ".sluice";

/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "pipeline.yaml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "SLUICE";

/// Configuration lookup errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required configuration key: {key}")]
    MissingKey { key: String },

    #[error("Invalid value for configuration key '{key}': '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Flattened key/value configuration with typed lookups
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    values: BTreeMap<String, String>,

    /// Path to config file (if one was loaded)
    source_file: Option<PathBuf>,

    /// Environment prefix for overrides (None disables them)
    env_prefix: Option<String>,
}

impl PipelineConfig {
    /// Create an empty configuration (every lookup falls back to its default)
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from all sources
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let config = match path {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::debug!("No pipeline config file found, using defaults");
                Self::new()
            }
        };

        Ok(config.with_env_overrides(ENV_PREFIX))
    }

    /// Load and flatten a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.source_file = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse YAML content into a flattened configuration
    pub fn from_yaml(content: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(content).context("Invalid YAML")?;

        let mut values = BTreeMap::new();
        match root {
            Value::Null => {}
            Value::Mapping(_) => flatten_into(&mut values, None, &root),
            _ => anyhow::bail!("Config root must be a mapping"),
        }

        Ok(Self {
            values,
            ..Self::default()
        })
    }

    /// Build a configuration from explicit key/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        }
    }

    /// Set a single key (builder style)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Enable environment overrides with the given prefix
    pub fn with_env_overrides(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Path of the file this configuration was read from
    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    /// Raw lookup: environment override first, then file values
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(prefix) = &self.env_prefix {
            if let Ok(value) = std::env::var(env_var_name(prefix, key)) {
                return Some(value);
            }
        }
        self.values.get(key).cloned()
    }

    /// String lookup with a default
    pub fn get_str_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Typed lookup with a default; a present but unparsable value is an error
    pub fn get_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }

    /// Typed lookup for a key that must be present
    pub fn require<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.get(key).ok_or_else(|| ConfigError::MissingKey {
            key: key.to_string(),
        })?;
        parse_value(key, &raw)
    }

    /// All keys and their effective values (environment overrides applied)
    pub fn resolved(&self) -> BTreeMap<String, String> {
        self.values
            .keys()
            .filter_map(|key| self.get(key).map(|value| (key.clone(), value)))
            .collect()
    }
}

/// Environment variable consulted for `key`: `source.rest.url` -> `SLUICE_SOURCE__REST__URL`
pub fn env_var_name(prefix: &str, key: &str) -> String {
    format!("{}_{}", prefix, key.replace('.', "__")).to_uppercase()
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Flatten a YAML tree into dotted keys
fn flatten_into(out: &mut BTreeMap<String, String>, prefix: Option<&str>, value: &Value) {
    let join = |segment: &str| match prefix {
        Some(p) => format!("{}.{}", p, segment),
        None => segment.to_string(),
    };

    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                if let Some(segment) = scalar_to_string(k) {
                    let key = join(&segment);
                    flatten_into(out, Some(key.as_str()), v);
                }
            }
        }
        Value::Sequence(items) => {
            if let Some(p) = prefix {
                let joined: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
                out.insert(p.to_string(), joined.join(","));
            }
        }
        Value::Tagged(tagged) => flatten_into(out, prefix, &tagged.value),
        Value::Null => {}
        scalar => {
            if let (Some(p), Some(s)) = (prefix, scalar_to_string(scalar)) {
                out.insert(p.to_string(), s);
            }
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Find config file by searching current directory and parents, then home
fn find_config_file() -> Option<PathBuf> {
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            if !current.pop() {
                break;
            }
        }
    }

    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
        .filter(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
version: "1.0"
pipeline:
  max_in_flight: 16
  idle_backoff_ms: 5
source:
  type: rest
  rest:
    url: http://localhost:9000/events
sink:
  type: file
  path: /tmp/out.jsonl
metrics:
  enabled: false
tags: [a, b]
"#;

    #[test]
    fn test_yaml_is_flattened() {
        let config = PipelineConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.get("version"), Some("1.0".to_string()));
        assert_eq!(config.get("source.type"), Some("rest".to_string()));
        assert_eq!(
            config.get("source.rest.url"),
            Some("http://localhost:9000/events".to_string())
        );
        assert_eq!(config.get("metrics.enabled"), Some("false".to_string()));
        assert_eq!(config.get("tags"), Some("a,b".to_string()));
    }

    #[test]
    fn test_typed_lookups() {
        let config = PipelineConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.get_or("pipeline.max_in_flight", 4usize), Ok(16));
        assert_eq!(config.get_or("pipeline.drain_timeout_ms", 30_000u64), Ok(30_000));
        assert_eq!(config.get_or("metrics.enabled", true), Ok(false));
        assert_eq!(config.get_str_or("dlq.type", "DLQ_LOG"), "DLQ_LOG");
    }

    #[test]
    fn test_missing_required_key() {
        let config = PipelineConfig::new();
        let result = config.require::<String>("source.rest.url");

        assert_eq!(
            result,
            Err(ConfigError::MissingKey {
                key: "source.rest.url".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_value() {
        let config = PipelineConfig::new().with("pipeline.max_in_flight", "lots");
        let result = config.get_or("pipeline.max_in_flight", 4usize);

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_env_override_wins() {
        // Unique prefix so parallel tests never share the variable
        let prefix = "SLUICE_TEST_ENV_OVERRIDE";
        std::env::set_var(env_var_name(prefix, "sink.type"), "DEVNULL");

        let config = PipelineConfig::new()
            .with("sink.type", "LOG")
            .with_env_overrides(prefix);

        assert_eq!(config.get("sink.type"), Some("DEVNULL".to_string()));
        assert_eq!(config.resolved().get("sink.type"), Some(&"DEVNULL".to_string()));

        std::env::remove_var(env_var_name(prefix, "sink.type"));
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(
            env_var_name(ENV_PREFIX, "source.rest.url"),
            "SLUICE_SOURCE__REST__URL"
        );
        assert_eq!(
            env_var_name(ENV_PREFIX, "pipeline.max_in_flight"),
            "SLUICE_PIPELINE__MAX_IN_FLIGHT"
        );
    }

    #[test]
    fn test_config_file_loading() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join(CONFIG_FILE);
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", SAMPLE).unwrap();

        let config = PipelineConfig::load(Some(&config_path)).unwrap();
        assert_eq!(config.source_file(), Some(config_path.as_path()));
        assert_eq!(config.get_or("pipeline.max_in_flight", 1usize), Ok(16));
    }

    #[test]
    fn test_non_mapping_root_is_rejected() {
        assert!(PipelineConfig::from_yaml("- a\n- b\n").is_err());
        assert!(PipelineConfig::from_yaml("").unwrap().resolved().is_empty());
    }
}
