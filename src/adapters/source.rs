//! Built-in sources.
//!
//! - `SyntheticSource`: in-memory generator for benchmarks and smoke runs
//! - `RestSource`: polls an HTTP endpoint and hands out one payload per fetch
//! - `MemorySource`: fixed queue of payloads, with a probe for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::domain::Payload;

use super::Source;

// ============================================================================
// Synthetic
// ============================================================================

/// Generates monotonically increasing `BENCH-<n>` payloads
pub struct SyntheticSource {
    counter: u64,
    connected: bool,
    /// Minimum data length; shorter payloads are padded
    payload_size: usize,
    /// Pad with random hex instead of a repeated byte
    high_entropy: bool,
    /// Stop producing after this many payloads
    limit: Option<u64>,
}

impl SyntheticSource {
    /// Create a generator
    pub fn new(payload_size: usize, high_entropy: bool) -> Self {
        Self {
            counter: 0,
            connected: false,
            payload_size,
            high_entropy,
            limit: None,
        }
    }

    /// Produce at most `limit` payloads, then report no data
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Build from `source.synthetic.*` keys.
    ///
    /// The dotted spellings `payload.size` and `high.entropy` are accepted
    /// as aliases of `payload_size` and `high_entropy`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let size_key = first_present(
            config,
            "source.synthetic.payload_size",
            "source.synthetic.payload.size",
        );
        let entropy_key = first_present(
            config,
            "source.synthetic.high_entropy",
            "source.synthetic.high.entropy",
        );
        let payload_size = config.get_or(size_key, 1024usize)?;
        let high_entropy = config.get_or(entropy_key, false)?;
        let limit: Option<u64> = match config.get("source.synthetic.limit") {
            Some(_) => Some(config.require("source.synthetic.limit")?),
            None => None,
        };

        let source = Self::new(payload_size, high_entropy);
        Ok(match limit {
            Some(limit) => source.with_limit(limit),
            None => source,
        })
    }

    fn render(&self, n: u64) -> String {
        let mut data = format!("BENCH-{}", n);
        if data.len() >= self.payload_size {
            return data;
        }

        data.reserve(self.payload_size - data.len());
        if self.high_entropy {
            while data.len() < self.payload_size {
                data.push_str(&Uuid::new_v4().simple().to_string());
            }
            data.truncate(self.payload_size);
        } else {
            let padding = self.payload_size - data.len();
            data.extend(std::iter::repeat('x').take(padding));
        }
        data
    }
}

/// `key` unless only `alias` is set
fn first_present<'a>(config: &PipelineConfig, key: &'a str, alias: &'a str) -> &'a str {
    if config.get(key).is_none() && config.get(alias).is_some() {
        alias
    } else {
        key
    }
}

#[async_trait]
impl Source<String> for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        info!(payload_size = self.payload_size, "Synthetic source connected");
        Ok(())
    }

    async fn fetch(&mut self) -> Result<Option<Payload<String>>> {
        if !self.connected {
            return Ok(None);
        }
        if self.limit.is_some_and(|limit| self.counter >= limit) {
            return Ok(None);
        }

        let n = self.counter;
        self.counter += 1;
        Ok(Some(Payload::new(self.render(n))))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        info!(generated = self.counter, "Synthetic source disconnected");
        Ok(())
    }
}

// ============================================================================
// REST
// ============================================================================

/// Settings for [`RestSource`]
#[derive(Debug, Clone)]
pub struct RestSourceConfig {
    /// Endpoint returning a JSON array of records
    pub url: String,

    /// Per-request timeout (bounds each fetch)
    pub timeout: Duration,

    /// Minimum gap after an empty or failed poll before the next request
    pub poll_interval: Duration,
}

impl RestSourceConfig {
    /// Build from `source.rest.*` keys; the URL is required
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            url: config.require("source.rest.url")?,
            timeout: Duration::from_millis(config.get_or("source.rest.timeout_ms", 2_000u64)?),
            poll_interval: Duration::from_millis(
                config.get_or("source.rest.poll_interval_ms", 500u64)?,
            ),
        })
    }
}

/// One element of the endpoint's JSON array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RestRecord {
    Text(String),
    Record {
        id: Option<String>,
        data: serde_json::Value,
    },
}

impl RestRecord {
    fn into_payload(self) -> Payload<String> {
        match self {
            Self::Text(data) => Payload::new(data),
            Self::Record { id, data } => {
                let data = match data {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                match id {
                    Some(id) => Payload::with_id(id, data),
                    None => Payload::new(data),
                }
            }
        }
    }
}

/// Adapts a batch HTTP API to the one-payload-per-fetch contract.
///
/// Each call to the endpoint returns a batch which is buffered; fetches
/// drain the buffer before the endpoint is polled again. After an empty or
/// failed poll the endpoint is left alone for `poll_interval`, and fetches
/// in that window report no data.
pub struct RestSource {
    config: RestSourceConfig,
    client: Option<reqwest::Client>,
    buffer: VecDeque<Payload<String>>,
    next_poll: Option<Instant>,
}

impl RestSource {
    /// Create a REST source (no connection is made until `connect`)
    pub fn new(config: RestSourceConfig) -> Self {
        Self {
            config,
            client: None,
            buffer: VecDeque::new(),
            next_poll: None,
        }
    }

    async fn poll_endpoint(&mut self, client: &reqwest::Client) -> Result<()> {
        let response = client
            .get(&self.config.url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", self.config.url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Endpoint {} returned {}", self.config.url, status);
        }

        let records: Vec<RestRecord> = response
            .json()
            .await
            .with_context(|| format!("Endpoint {} returned malformed JSON", self.config.url))?;

        debug!(count = records.len(), "Refilled buffer from REST endpoint");
        self.buffer
            .extend(records.into_iter().map(RestRecord::into_payload));
        Ok(())
    }
}

#[async_trait]
impl Source<String> for RestSource {
    fn name(&self) -> &str {
        "rest"
    }

    async fn connect(&mut self) -> Result<()> {
        reqwest::Url::parse(&self.config.url)
            .with_context(|| format!("Invalid source URL: {}", self.config.url))?;

        let client = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        self.client = Some(client);
        info!(url = %self.config.url, "REST source connected");
        Ok(())
    }

    async fn fetch(&mut self) -> Result<Option<Payload<String>>> {
        if let Some(payload) = self.buffer.pop_front() {
            return Ok(Some(payload));
        }

        let client = self
            .client
            .clone()
            .context("REST source is not connected")?;
        if self.next_poll.is_some_and(|at| Instant::now() < at) {
            return Ok(None);
        }

        let polled = self.poll_endpoint(&client).await;
        self.next_poll = match (&polled, self.buffer.is_empty()) {
            (Ok(()), false) => None,
            _ => Some(Instant::now() + self.config.poll_interval),
        };
        polled?;

        Ok(self.buffer.pop_front())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            debug!(dropped = self.buffer.len(), "Discarding buffered REST payloads");
            self.buffer.clear();
        }
        self.client = None;
        self.next_poll = None;
        info!(url = %self.config.url, "REST source disconnected");
        Ok(())
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Shared view of a [`MemorySource`]'s lifecycle calls
#[derive(Debug, Clone, Default)]
pub struct SourceProbe {
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
}

impl SourceProbe {
    /// Number of `connect` calls
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Number of `fetch` calls
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

/// Hands out a fixed list of payloads, then reports no data forever
pub struct MemorySource<T> {
    queue: VecDeque<Payload<T>>,
    connected: bool,
    probe: SourceProbe,
}

impl<T> MemorySource<T> {
    /// Create a source that yields `payloads` in order
    pub fn new(payloads: impl IntoIterator<Item = Payload<T>>) -> Self {
        Self {
            queue: payloads.into_iter().collect(),
            connected: false,
            probe: SourceProbe::default(),
        }
    }

    /// Handle for observing lifecycle calls after the source is moved
    pub fn probe(&self) -> SourceProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl<T: Send + 'static> Source<T> for MemorySource<T> {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&mut self) -> Result<()> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        self.connected = true;
        Ok(())
    }

    async fn fetch(&mut self) -> Result<Option<Payload<T>>> {
        self.probe.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.connected {
            anyhow::bail!("Memory source is not connected");
        }
        Ok(self.queue.pop_front())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_sequence() {
        let mut source = SyntheticSource::new(0, false).with_limit(2);

        // Nothing before connect
        assert!(source.fetch().await.unwrap().is_none());

        source.connect().await.unwrap();
        assert_eq!(source.fetch().await.unwrap().unwrap().data, "BENCH-0");
        assert_eq!(source.fetch().await.unwrap().unwrap().data, "BENCH-1");
        assert!(source.fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_synthetic_padding() {
        let mut low = SyntheticSource::new(32, false);
        let mut high = SyntheticSource::new(32, true);
        low.connect().await.unwrap();
        high.connect().await.unwrap();

        let low_data = low.fetch().await.unwrap().unwrap().data;
        let high_data = high.fetch().await.unwrap().unwrap().data;

        assert_eq!(low_data.len(), 32);
        assert!(low_data.starts_with("BENCH-0x"));
        assert_eq!(high_data.len(), 32);
        assert!(high_data.starts_with("BENCH-0"));
    }

    #[test]
    fn test_synthetic_from_config() {
        let config = PipelineConfig::new()
            .with("source.synthetic.payload_size", "8")
            .with("source.synthetic.limit", "3");
        let source = SyntheticSource::from_config(&config).unwrap();

        assert_eq!(source.payload_size, 8);
        assert_eq!(source.limit, Some(3));
        assert!(!source.high_entropy);
    }

    #[test]
    fn test_synthetic_dotted_key_aliases() {
        let yaml = r#"
source:
  synthetic:
    payload:
      size: 64
    high:
      entropy: true
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        let source = SyntheticSource::from_config(&config).unwrap();

        assert_eq!(source.payload_size, 64);
        assert!(source.high_entropy);

        // The underscore spelling wins when both are set
        let config = config.with("source.synthetic.payload_size", "16");
        assert_eq!(SyntheticSource::from_config(&config).unwrap().payload_size, 16);
    }

    #[test]
    fn test_rest_config_requires_url() {
        let result = RestSourceConfig::from_config(&PipelineConfig::new());
        assert!(result.is_err());

        let config = PipelineConfig::new().with("source.rest.url", "http://localhost:1/x");
        let rest = RestSourceConfig::from_config(&config).unwrap();
        assert_eq!(rest.timeout, Duration::from_millis(2_000));
        assert_eq!(rest.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_rest_record_decoding() {
        let records: Vec<RestRecord> =
            serde_json::from_str(r#"["plain", {"id": "r-1", "data": "x"}, {"data": {"k": 1}}]"#)
                .unwrap();
        let payloads: Vec<Payload<String>> =
            records.into_iter().map(RestRecord::into_payload).collect();

        assert_eq!(payloads[0].data, "plain");
        assert_eq!(payloads[1].id, "r-1");
        assert_eq!(payloads[1].data, "x");
        assert_eq!(payloads[2].data, r#"{"k":1}"#);
    }

    #[tokio::test]
    async fn test_rest_fetch_requires_connect() {
        let mut source = RestSource::new(RestSourceConfig {
            url: "http://127.0.0.1:9/events".to_string(),
            timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(100),
        });
        assert!(source.fetch().await.is_err());
    }

    #[tokio::test]
    async fn test_memory_source_probe() {
        let mut source = MemorySource::new(vec![Payload::with_id("1", "a")]);
        let probe = source.probe();

        assert!(source.fetch().await.is_err());
        source.connect().await.unwrap();
        assert_eq!(source.fetch().await.unwrap().unwrap().id, "1");
        assert!(source.fetch().await.unwrap().is_none());
        source.disconnect().await.unwrap();

        assert_eq!(probe.connects(), 1);
        assert_eq!(probe.disconnects(), 1);
        assert_eq!(probe.fetches(), 3);
    }
}
