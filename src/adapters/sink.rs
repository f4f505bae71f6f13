//! Built-in sinks.
//!
//! All sinks here are safe to share across workers. None of them provide
//! ordering across payloads.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::domain::Payload;
use crate::metrics::{MetricsRuntime, Timer};

use super::Sink;

/// Discards everything (source/transform benchmarks)
#[derive(Debug, Clone, Copy, Default)]
pub struct DevNullSink;

#[async_trait]
impl<T: Send + 'static> Sink<T> for DevNullSink {
    fn name(&self) -> &str {
        "devnull"
    }

    async fn write(&self, _payload: Payload<T>) -> Result<()> {
        Ok(())
    }
}

/// Logs each payload's id and data length at info
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl<T: AsRef<str> + Send + 'static> Sink<T> for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn write(&self, payload: Payload<T>) -> Result<()> {
        info!(id = %payload.id, data_len = payload.data.as_ref().len(), "[SINK-LOG]");
        Ok(())
    }
}

/// Dead-letter sink that only records the drop in the log
#[derive(Debug, Clone, Copy, Default)]
pub struct DlqLogSink;

#[async_trait]
impl<T: AsRef<str> + Send + 'static> Sink<T> for DlqLogSink {
    fn name(&self) -> &str {
        "dlq_log"
    }

    async fn write(&self, payload: Payload<T>) -> Result<()> {
        warn!(id = %payload.id, data_len = payload.data.as_ref().len(), "[DLQ] Dropped event");
        Ok(())
    }
}

/// Appends payloads as JSON lines to a file
pub struct FileSink {
    path: PathBuf,
    file: tokio::sync::Mutex<Option<File>>,
}

impl FileSink {
    /// Create a sink writing to `path` (opened lazily on first write)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: tokio::sync::Mutex::new(None),
        }
    }

    /// Build from `<prefix>.path`, e.g. `sink.path` or `dlq.path`
    pub fn from_config(config: &PipelineConfig, prefix: &str) -> Result<Self> {
        let path: PathBuf = config.require(&format!("{}.path", prefix))?;
        Ok(Self::new(path))
    }

    /// Output file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open sink file: {}", self.path.display()))
    }
}

#[async_trait]
impl<T: Serialize + Send + Sync + 'static> Sink<T> for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn write(&self, payload: Payload<T>) -> Result<()> {
        let mut line = serde_json::to_string(&payload).context("Failed to serialize payload")?;
        line.push('\n');

        // One writer at a time keeps lines whole
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(line.as_bytes())
                .await
                .with_context(|| format!("Failed to append to {}", self.path.display()))?;
            file.flush().await?;
        }
        Ok(())
    }
}

/// Collects payloads in memory; clones share the same buffer
#[derive(Debug)]
pub struct MemorySink<T> {
    payloads: Arc<Mutex<Vec<Payload<T>>>>,
}

impl<T> Clone for MemorySink<T> {
    fn clone(&self) -> Self {
        Self {
            payloads: Arc::clone(&self.payloads),
        }
    }
}

impl<T> Default for MemorySink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemorySink<T> {
    /// Create an empty sink
    pub fn new() -> Self {
        Self {
            payloads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of payloads written
    pub fn len(&self) -> usize {
        self.payloads.lock().len()
    }

    /// True when nothing has been written
    pub fn is_empty(&self) -> bool {
        self.payloads.lock().is_empty()
    }

    /// Ids of written payloads, in write order
    pub fn ids(&self) -> Vec<String> {
        self.payloads.lock().iter().map(|p| p.id.clone()).collect()
    }
}

impl<T: Clone> MemorySink<T> {
    /// Copy of every payload written so far
    pub fn payloads(&self) -> Vec<Payload<T>> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl<T: Send + 'static> Sink<T> for MemorySink<T> {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, payload: Payload<T>) -> Result<()> {
        self.payloads.lock().push(payload);
        Ok(())
    }
}

/// Decorator recording write latency (successful or not) in a timer
pub struct MonitoredSink<T> {
    inner: Arc<dyn Sink<T>>,
    latency: Arc<Timer>,
}

impl<T> MonitoredSink<T> {
    /// Wrap `inner`, recording into the timer registered as `metric`
    pub fn new(inner: Arc<dyn Sink<T>>, metric: &str, metrics: &MetricsRuntime) -> Self {
        Self {
            inner,
            latency: metrics.timer(metric),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Sink<T> for MonitoredSink<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn write(&self, payload: Payload<T>) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.write(payload).await;
        self.latency.record_since(start);
        result
    }
}
