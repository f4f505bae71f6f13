//! Bounded-concurrency dispatch engine.
//!
//! One dispatch task pulls payloads from the source and spawns a worker per
//! payload. A semaphore caps the number of workers alive at once; when it is
//! exhausted the dispatch task waits, which is the only backpressure there
//! is. Workers transform, write to the primary sink, and fall back to the
//! DLQ sink with the original payload on any failure (including a panic).
//!
//! Stopping is cooperative: a cancellation token wakes the dispatch task
//! from its idle sleep or permit wait, workers are drained but never
//! aborted, and the source is disconnected last.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{Cache, NoopCache, Sink, Source, Transformer};
use crate::config::PipelineConfig;
use crate::domain::Payload;
use crate::metrics::{
    Counter, MetricsRuntime, DLQ_FAILURES, FETCH_ERRORS, PAYLOADS_DEAD_LETTERED, PAYLOADS_FETCHED,
    PAYLOADS_SUCCEEDED,
};

use super::error::PipelineError;

/// Twice the available hardware parallelism
pub fn default_max_in_flight() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}

/// Tuning knobs for the dispatch loop and shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Maximum payloads processed concurrently
    pub max_in_flight: usize,

    /// Sleep after a fetch that returned no data
    pub idle_backoff: Duration,

    /// Sleep after a failed fetch
    pub error_backoff: Duration,

    /// How long `stop` waits for the dispatch task
    pub join_timeout: Duration,

    /// How long `stop` waits for in-flight workers
    pub drain_timeout: Duration,

    /// Bound on acquiring and disconnecting the source during `stop`
    pub disconnect_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            idle_backoff: Duration::from_millis(5),
            error_backoff: Duration::from_millis(100),
            join_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

impl OrchestratorSettings {
    /// Read `pipeline.*` keys, falling back to defaults
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| -> Result<Duration, PipelineError> {
            let ms = config.get_or(key, default.as_millis() as u64)?;
            Ok(Duration::from_millis(ms))
        };

        let settings = Self {
            max_in_flight: config.get_or("pipeline.max_in_flight", defaults.max_in_flight)?,
            idle_backoff: millis("pipeline.idle_backoff_ms", defaults.idle_backoff)?,
            error_backoff: millis("pipeline.error_backoff_ms", defaults.error_backoff)?,
            join_timeout: millis("pipeline.join_timeout_ms", defaults.join_timeout)?,
            drain_timeout: millis("pipeline.drain_timeout_ms", defaults.drain_timeout)?,
            disconnect_timeout: millis(
                "pipeline.disconnect_timeout_ms",
                defaults.disconnect_timeout,
            )?,
        };

        if settings.max_in_flight == 0 {
            return Err(PipelineError::InvalidConcurrency);
        }
        Ok(settings)
    }

    /// Override the concurrency bound
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Stopped,
    Running,
}

/// Everything a worker needs, shared by all workers of one run
struct Stages<I, O> {
    transformer: Arc<dyn Transformer<I, O>>,
    primary: Arc<dyn Sink<O>>,
    dlq: Arc<dyn Sink<I>>,
    succeeded: Arc<Counter>,
    dead_lettered: Arc<Counter>,
    dlq_failures: Arc<Counter>,
}

/// Handles owned by a running pipeline
struct RunHandle {
    cancel: CancellationToken,
    dispatch: JoinHandle<()>,
    workers: TaskTracker,
}

/// Pipeline engine composing one source, transformer, primary sink and DLQ
pub struct Orchestrator<I, O> {
    source: Arc<Mutex<Box<dyn Source<I>>>>,
    source_name: String,
    transformer: Arc<dyn Transformer<I, O>>,
    primary: Arc<dyn Sink<O>>,
    dlq: Arc<dyn Sink<I>>,
    cache: Arc<dyn Cache<I>>,
    metrics: Arc<MetricsRuntime>,
    settings: OrchestratorSettings,
    running: AtomicBool,
    control: Mutex<Option<RunHandle>>,
}

impl<I, O> Orchestrator<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    /// Compose a pipeline. Nothing is connected until `start`.
    pub fn new(
        source: Box<dyn Source<I>>,
        transformer: Arc<dyn Transformer<I, O>>,
        primary: Arc<dyn Sink<O>>,
        dlq: Arc<dyn Sink<I>>,
        settings: OrchestratorSettings,
    ) -> Result<Self, PipelineError> {
        if settings.max_in_flight == 0 {
            return Err(PipelineError::InvalidConcurrency);
        }

        Ok(Self {
            source_name: source.name().to_string(),
            source: Arc::new(Mutex::new(source)),
            transformer,
            primary,
            dlq,
            cache: Arc::new(NoopCache),
            metrics: MetricsRuntime::disabled(),
            settings,
            running: AtomicBool::new(false),
            control: Mutex::new(None),
        })
    }

    /// Attach a cache (default: [`NoopCache`])
    pub fn with_cache(mut self, cache: Arc<dyn Cache<I>>) -> Self {
        self.cache = cache;
        self
    }

    /// Attach a metrics runtime (default: disabled)
    pub fn with_metrics(mut self, metrics: Arc<MetricsRuntime>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> OrchestratorState {
        if self.running.load(Ordering::SeqCst) {
            OrchestratorState::Running
        } else {
            OrchestratorState::Stopped
        }
    }

    /// Shared cache available to transformers
    pub fn cache(&self) -> &Arc<dyn Cache<I>> {
        &self.cache
    }

    /// Metrics runtime the pipeline records into
    pub fn metrics(&self) -> &Arc<MetricsRuntime> {
        &self.metrics
    }

    /// Active settings
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Connect the source and start dispatching.
    ///
    /// A second call while running logs a warning and does nothing. A source
    /// that fails to connect is disconnected (best effort) and the error is
    /// returned; the orchestrator stays stopped.
    #[instrument(skip(self), fields(source_name = %self.source_name))]
    pub async fn start(&self) -> Result<(), PipelineError> {
        let mut control = self.control.lock().await;
        if control.is_some() {
            warn!("Pipeline already running; ignoring start");
            return Ok(());
        }

        let mut source = Arc::clone(&self.source).lock_owned().await;
        if let Err(e) = source.connect().await {
            error!(error = %e, "Source failed to connect");
            match timeout(self.settings.disconnect_timeout, source.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(cleanup)) => debug!(error = %cleanup, "Cleanup disconnect failed"),
                Err(_) => debug!("Cleanup disconnect timed out"),
            }
            return Err(PipelineError::SourceConnect {
                name: self.source_name.clone(),
                reason: format!("{:#}", e),
            });
        }

        let stages = Arc::new(Stages {
            transformer: Arc::clone(&self.transformer),
            primary: Arc::clone(&self.primary),
            dlq: Arc::clone(&self.dlq),
            succeeded: self.metrics.counter(PAYLOADS_SUCCEEDED),
            dead_lettered: self.metrics.counter(PAYLOADS_DEAD_LETTERED),
            dlq_failures: self.metrics.counter(DLQ_FAILURES),
        });

        let cancel = CancellationToken::new();
        let workers = TaskTracker::new();
        let dispatcher = Dispatcher {
            permits: Arc::new(Semaphore::new(self.settings.max_in_flight)),
            cancel: cancel.clone(),
            workers: workers.clone(),
            stages,
            idle_backoff: self.settings.idle_backoff,
            error_backoff: self.settings.error_backoff,
            fetched: self.metrics.counter(PAYLOADS_FETCHED),
            fetch_errors: self.metrics.counter(FETCH_ERRORS),
        };
        let dispatch = tokio::spawn(dispatcher.run(source));

        *control = Some(RunHandle {
            cancel,
            dispatch,
            workers,
        });
        self.running.store(true, Ordering::SeqCst);

        info!(max_in_flight = self.settings.max_in_flight, "Pipeline started");
        Ok(())
    }

    /// Stop dispatching, drain workers and disconnect the source.
    ///
    /// Every wait is bounded by the configured timeouts; problems are logged
    /// and shutdown carries on. Calling this while stopped is a no-op.
    #[instrument(skip(self), fields(source_name = %self.source_name))]
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        let Some(run) = control.take() else {
            warn!("Pipeline not running; ignoring stop");
            return;
        };

        info!("Stopping pipeline");
        run.cancel.cancel();

        let mut dispatch = run.dispatch;
        match timeout(self.settings.join_timeout, &mut dispatch).await {
            Ok(Ok(())) => debug!("Dispatch loop exited"),
            Ok(Err(e)) => error!(error = %e, "Dispatch task failed"),
            Err(_) => {
                warn!(
                    timeout_ms = self.settings.join_timeout.as_millis() as u64,
                    "Dispatch loop did not exit in time; aborting it"
                );
                dispatch.abort();
            }
        }

        run.workers.close();
        if timeout(self.settings.drain_timeout, run.workers.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = run.workers.len(),
                "Workers still running after drain timeout; leaving them to finish"
            );
        }

        self.disconnect_source().await;
        self.running.store(false, Ordering::SeqCst);
        info!("Pipeline stopped");
    }

    async fn disconnect_source(&self) {
        let bound = self.settings.disconnect_timeout;

        let mut source = match timeout(bound, self.source.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                error!("Source still held by the dispatch loop; skipping disconnect");
                return;
            }
        };

        match timeout(bound, source.disconnect()).await {
            Ok(Ok(())) => debug!("Source disconnected"),
            Ok(Err(e)) => error!(error = %e, "Source disconnect failed"),
            Err(_) => error!(
                timeout_ms = bound.as_millis() as u64,
                "Source disconnect timed out"
            ),
        }
    }
}

/// State moved into the dispatch task for one run
struct Dispatcher<I, O> {
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    workers: TaskTracker,
    stages: Arc<Stages<I, O>>,
    idle_backoff: Duration,
    error_backoff: Duration,
    fetched: Arc<Counter>,
    fetch_errors: Arc<Counter>,
}

impl<I, O> Dispatcher<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    async fn run(self, mut source: OwnedMutexGuard<Box<dyn Source<I>>>) {
        debug!("Dispatch loop running");

        while !self.cancel.is_cancelled() {
            // A panicking source counts as a failed fetch
            let fetched = AssertUnwindSafe(source.fetch()).catch_unwind().await;
            let outcome = match fetched {
                Ok(Ok(Some(payload))) => Ok(payload),
                Ok(Ok(None)) => {
                    if !self.pause(self.idle_backoff).await {
                        break;
                    }
                    continue;
                }
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(panic) => Err(format!("panic: {}", panic_message(panic.as_ref()))),
            };
            let payload = match outcome {
                Ok(payload) => payload,
                Err(reason) => {
                    self.fetch_errors.increment();
                    warn!(error = %reason, "Fetch failed; backing off");
                    if !self.pause(self.error_backoff).await {
                        break;
                    }
                    continue;
                }
            };
            self.fetched.increment();

            // An available permit wins over a pending stop
            let permit = tokio::select! {
                biased;
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.cancel.cancelled() => {
                    warn!(id = %payload.id, "Stop requested while waiting for capacity; payload dropped");
                    break;
                }
            };

            self.workers
                .spawn(process(Arc::clone(&self.stages), payload, permit));
        }

        debug!("Dispatch loop finished");
    }

    /// Sleep unless stopped first; false means stop
    async fn pause(&self, backoff: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(backoff) => true,
        }
    }
}

/// Worker body. The permit is held until this returns or unwinds.
async fn process<I, O>(stages: Arc<Stages<I, O>>, payload: Payload<I>, _permit: OwnedSemaphorePermit)
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    let outcome = AssertUnwindSafe(deliver(&stages, &payload))
        .catch_unwind()
        .await;

    let reason = match outcome {
        Ok(Ok(())) => {
            stages.succeeded.increment();
            return;
        }
        Ok(Err(e)) => format!("{:#}", e),
        Err(panic) => format!("panic: {}", panic_message(panic.as_ref())),
    };

    error!(id = %payload.id, error = %reason, "Payload failed; routing to DLQ");
    stages.dead_lettered.increment();

    let id = payload.id.clone();
    let written = AssertUnwindSafe(stages.dlq.write(payload))
        .catch_unwind()
        .await;
    let failure = match written {
        Ok(Ok(())) => return,
        Ok(Err(e)) => format!("{:#}", e),
        Err(panic) => format!("panic: {}", panic_message(panic.as_ref())),
    };

    stages.dlq_failures.increment();
    error!(id = %id, error = %failure, "DLQ write failed; payload lost");
}

async fn deliver<I, O>(stages: &Stages<I, O>, payload: &Payload<I>) -> anyhow::Result<()>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    let output = stages.transformer.transform(payload).await?;
    stages.primary.write(output).await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
