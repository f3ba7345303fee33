//! Pipeline orchestration.
//!
//! Wires an ordered list of stages together with a relay in front of each
//! stage and one after the last, so every hop honors the cancellation signal.

use super::metrics::{PipelineMetrics, PipelineMetricsStorage};
use super::relay::spawn_relay;
use super::stage::{BoxedStage, Stage};
use crate::config::PipelineOptions;
use crate::errors::PipelineResult;
use crate::signal::CancellationSignal;
use crate::stream::StreamReceiver;
use std::iter;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// Metrics target name of the final relay.
pub(crate) const OUTPUT_TARGET: &str = "output";

/// Validated, ready-to-run pipeline.
pub struct Pipeline<T> {
    stages: Vec<BoxedStage<T>>,
    signal: CancellationSignal,
    options: PipelineOptions,
}

impl<T> Pipeline<T>
where
    T: Send + 'static,
{
    pub fn new(stages: Vec<BoxedStage<T>>, signal: CancellationSignal) -> Self {
        Self {
            stages,
            signal,
            options: PipelineOptions::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Start the pipeline on `source`. See [`PipelineExecutor::execute`].
    pub fn run(self, source: StreamReceiver<T>) -> RunningPipeline<T> {
        PipelineExecutor::execute(self, source)
    }
}

pub struct PipelineBuilder<T> {
    stages: Vec<BoxedStage<T>>,
    signal: Option<CancellationSignal>,
    options: PipelineOptions,
}

impl<T> Default for PipelineBuilder<T> {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            signal: None,
            options: PipelineOptions::default(),
        }
    }
}

impl<T> PipelineBuilder<T>
where
    T: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage. Stages run in the order they are added.
    pub fn stage(mut self, stage: impl Stage<T> + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = BoxedStage<T>>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Share an existing signal with the pipeline. Without one, the pipeline
    /// gets a fresh signal reachable through [`PipelineHandle::signal`].
    pub fn signal(mut self, signal: CancellationSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> PipelineResult<Pipeline<T>> {
        self.options.sanitize()?;

        Ok(Pipeline {
            stages: self.stages,
            signal: self.signal.unwrap_or_default(),
            options: self.options,
        })
    }
}

/// Pipeline executor.
///
/// Holds no state of its own; every run gets its own relays, metrics and
/// task tracker.
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Start a pipeline. Returns immediately; the work runs on spawned tasks.
    ///
    /// For each stage in order: guard the current stream with a relay, then
    /// hand the guarded stream to the stage. A final relay guards the stream
    /// returned to the caller, so a cancelled pipeline stops producing even
    /// if the last stage ignores its input ending. With no stages the result
    /// is a guarded passthrough of `source`, never `source` itself.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute<T>(pipeline: Pipeline<T>, source: StreamReceiver<T>) -> RunningPipeline<T>
    where
        T: Send + 'static,
    {
        let Pipeline {
            stages,
            signal,
            options,
        } = pipeline;

        let run_id = Uuid::new_v4();
        let targets = stages
            .iter()
            .map(|stage| stage.name().to_string())
            .chain(iter::once(OUTPUT_TARGET.to_string()));
        let metrics = Arc::new(PipelineMetricsStorage::new(run_id, targets));
        let tracker = TaskTracker::new();

        tracing::debug!(
            run_id = %run_id,
            pipeline = options.display_name(),
            stages = stages.len(),
            deadline_ms = ?options.deadline_ms,
            cancelled = signal.is_cancelled(),
            "Starting pipeline"
        );

        let mut current = source;
        for (index, stage) in stages.iter().enumerate() {
            let guarded = spawn_relay(current, signal.clone(), metrics.hop(index), &tracker, run_id);
            current = stage.run(guarded);
        }
        let output = spawn_relay(
            current,
            signal.clone(),
            metrics.hop(stages.len()),
            &tracker,
            run_id,
        );
        tracker.close();

        // The run's deadline timer lives only as long as its relays.
        if let Some(deadline) = options
            .deadline()
            .and_then(|timeout| signal.tighten_deadline(timeout))
        {
            let timer = signal.clone();
            let relays = tracker.clone();
            tokio::spawn(async move { timer.expire_at(deadline, relays.wait()).await });
        }

        RunningPipeline {
            output,
            handle: PipelineHandle {
                run_id,
                signal,
                metrics,
                tracker,
            },
        }
    }
}

/// Wire `stages` onto `source` under `signal` and return the guarded output.
///
/// Returns immediately. The output yields the source's values transformed by
/// every stage in order, and closes once the source is exhausted or the
/// signal fires. After cancellation at most one value that was already in
/// flight may still be delivered.
pub fn run_pipeline<T>(
    source: StreamReceiver<T>,
    signal: &CancellationSignal,
    stages: Vec<BoxedStage<T>>,
) -> StreamReceiver<T>
where
    T: Send + 'static,
{
    Pipeline::new(stages, signal.clone()).run(source).into_output()
}

/// A started pipeline: its output stream plus a control handle.
pub struct RunningPipeline<T> {
    output: StreamReceiver<T>,
    handle: PipelineHandle,
}

impl<T> RunningPipeline<T> {
    /// Receive the next output value.
    pub async fn recv(&mut self) -> Option<T> {
        self.output.recv().await
    }

    pub fn handle(&self) -> &PipelineHandle {
        &self.handle
    }

    pub fn into_output(self) -> StreamReceiver<T> {
        self.output
    }

    pub fn into_parts(self) -> (StreamReceiver<T>, PipelineHandle) {
        (self.output, self.handle)
    }
}

/// Control handle for a running pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    run_id: Uuid,
    signal: CancellationSignal,
    metrics: Arc<PipelineMetricsStorage>,
    tracker: TaskTracker,
}

impl PipelineHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    /// Cancel the run. Same as cancelling the shared signal.
    pub fn cancel(&self) {
        self.signal.cancel();
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.snapshot()
    }

    /// Number of relay tasks still running.
    pub fn active_relays(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every relay of this run has exited.
    ///
    /// Relays exit once the signal fires, the source is exhausted, or the
    /// output is dropped.
    pub async fn join(&self) -> PipelineMetrics {
        self.tracker.wait().await;
        let metrics = self.metrics();
        tracing::debug!(
            run_id = %self.run_id,
            delivered = metrics.delivered(),
            cancelled = metrics.was_cancelled(),
            elapsed_ms = metrics.elapsed_ms as u64,
            "Pipeline finished"
        );
        metrics
    }
}
