//! Plugin contracts and the built-in implementations.
//!
//! The orchestrator only ever sees these four traits. Concrete sources,
//! sinks, transformers and caches are chosen at startup through the
//! [`PluginRegistry`](crate::core::PluginRegistry), so swapping one never
//! touches the dispatch logic.
//!
//! Concurrency preconditions:
//! - A [`Source`] is driven by the dispatch task alone and needs only `Send`.
//! - [`Sink`], [`Transformer`] and [`Cache`] are shared by every worker and
//!   must be safe for concurrent use (`Send + Sync`).

pub mod cache;
pub mod sink;
pub mod source;
pub mod transform;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::Payload;

// Re-export the built-ins
pub use cache::{LocalCache, NoopCache};
pub use sink::{DevNullSink, DlqLogSink, FileSink, LogSink, MemorySink, MonitoredSink};
pub use source::{MemorySource, RestSource, RestSourceConfig, SourceProbe, SyntheticSource};
pub use transform::{
    DedupTransformer, FnTransformer, MonitoredTransformer, NoopTransformer, UppercaseTransformer,
};

/// A pluggable producer of payloads
#[async_trait]
pub trait Source<T>: Send {
    /// Human-readable source name
    fn name(&self) -> &str;

    /// Establish whatever state fetching needs. Failure aborts pipeline start.
    async fn connect(&mut self) -> Result<()>;

    /// Fetch the next payload.
    ///
    /// Returns `Ok(None)` when nothing is available right now. May wait briefly
    /// for data but must never block indefinitely, otherwise the dispatch loop
    /// cannot observe a stop request. Errors are treated as transient.
    async fn fetch(&mut self) -> Result<Option<Payload<T>>>;

    /// Release connection state. Must be safe after a partial `connect`.
    async fn disconnect(&mut self) -> Result<()>;
}

/// A destination for payloads (primary output or dead-letter queue)
#[async_trait]
pub trait Sink<T>: Send + Sync {
    /// Human-readable sink name
    fn name(&self) -> &str;

    /// Persist or forward one payload
    async fn write(&self, payload: Payload<T>) -> Result<()>;
}

/// Maps one payload to another.
///
/// Implementations must keep `id` and `created_at`; build the output with
/// [`Payload::with_data`] or [`Payload::map`].
#[async_trait]
pub trait Transformer<I, O>: Send + Sync {
    /// Human-readable transformer name
    fn name(&self) -> &str;

    /// Transform a payload. The input stays with the caller so it can be
    /// dead-lettered if this (or the following write) fails.
    async fn transform(&self, input: &Payload<I>) -> Result<Payload<O>>;
}

/// Key/value side store addressed by payload id
#[async_trait]
pub trait Cache<T>: Send + Sync {
    /// Human-readable cache name
    fn name(&self) -> &str;

    /// Store a payload under `key`
    async fn put(&self, key: &str, payload: Payload<T>) -> Result<()>;

    /// Store `payload` only if `key` is vacant. Returns true when this call
    /// stored it; the check and the insert are one atomic step.
    async fn put_if_absent(&self, key: &str, payload: Payload<T>) -> Result<bool>;

    /// Look up a payload. A miss is `Ok(None)`, not an error.
    async fn get(&self, key: &str) -> Result<Option<Payload<T>>>;

    /// Remove an entry (no-op when absent)
    async fn remove(&self, key: &str) -> Result<()>;
}
