//! Built-in transformers and transformer decorators.
//!
//! Decorators (`MonitoredTransformer`, `DedupTransformer`) wrap another
//! transformer and keep its contract: the output still carries the input's
//! id and timestamp.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::Payload;
use crate::metrics::{MetricsRuntime, Timer};

use super::{Cache, Transformer};

/// Identity transform
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransformer;

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Transformer<T, T> for NoopTransformer {
    fn name(&self) -> &str {
        "noop"
    }

    async fn transform(&self, input: &Payload<T>) -> Result<Payload<T>> {
        Ok(input.clone())
    }
}

/// Upper-cases string data
#[derive(Debug, Clone, Copy, Default)]
pub struct UppercaseTransformer;

#[async_trait]
impl Transformer<String, String> for UppercaseTransformer {
    fn name(&self) -> &str {
        "upper"
    }

    async fn transform(&self, input: &Payload<String>) -> Result<Payload<String>> {
        Ok(input.with_data(input.data.to_uppercase()))
    }
}

/// Transformer backed by a synchronous closure
pub struct FnTransformer<F> {
    name: String,
    f: F,
}

impl<F> FnTransformer<F> {
    /// Wrap `f` under the given name
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<I, O, F> Transformer<I, O> for FnTransformer<F>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
    F: Fn(&Payload<I>) -> Result<Payload<O>> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform(&self, input: &Payload<I>) -> Result<Payload<O>> {
        (self.f)(input)
    }
}

/// Records transform latency (successful or not) in a timer
pub struct MonitoredTransformer<I, O> {
    inner: Arc<dyn Transformer<I, O>>,
    latency: Arc<Timer>,
}

impl<I, O> MonitoredTransformer<I, O> {
    /// Wrap `inner`, recording into the timer registered as `metric`
    pub fn new(inner: Arc<dyn Transformer<I, O>>, metric: &str, metrics: &MetricsRuntime) -> Self {
        Self {
            inner,
            latency: metrics.timer(metric),
        }
    }
}

#[async_trait]
impl<I, O> Transformer<I, O> for MonitoredTransformer<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn transform(&self, input: &Payload<I>) -> Result<Payload<O>> {
        let start = Instant::now();
        let result = self.inner.transform(input).await;
        self.latency.record_since(start);
        result
    }
}

/// Rejects payloads whose id the cache has already seen.
///
/// A rejected duplicate is a transform failure, so it lands in the DLQ.
/// The id is claimed in the cache before the inner transform runs, so
/// concurrent workers carrying the same id cannot both pass. A claim is
/// released when the inner transform fails.
pub struct DedupTransformer<I, O> {
    inner: Arc<dyn Transformer<I, O>>,
    cache: Arc<dyn Cache<I>>,
}

impl<I, O> DedupTransformer<I, O> {
    /// Wrap `inner`, tracking seen ids in `cache`
    pub fn new(inner: Arc<dyn Transformer<I, O>>, cache: Arc<dyn Cache<I>>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<I, O> Transformer<I, O> for DedupTransformer<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn transform(&self, input: &Payload<I>) -> Result<Payload<O>> {
        if !self.cache.put_if_absent(&input.id, input.clone()).await? {
            anyhow::bail!("Duplicate payload id: {}", input.id);
        }

        match self.inner.transform(input).await {
            Ok(output) => Ok(output),
            Err(e) => {
                self.cache.remove(&input.id).await?;
                Err(e)
            }
        }
    }
}
