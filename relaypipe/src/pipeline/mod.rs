//! Cancellable multi-stage stream pipeline.
//!
//! This module provides the pipeline infrastructure:
//! - Relays that enforce a shared cancellation signal between every two stages
//! - A stage contract any `Stream -> Stream` function satisfies
//! - Element-wise stage adapters with sequential and parallel execution modes
//! - Per-hop metrics for each run
//!
//! ## Architecture
//!
//! ```text
//! source → Relay₀ → Stage₁ → Relay₁ → Stage₂ → … → Stageₙ → Relayₙ → caller
//!            ▲                  ▲                            ▲
//!            └──────────────────┴──── CancellationSignal ────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use relaypipe::pipeline::{PipelineBuilder, fan_out, map};
//! use relaypipe::stream::from_iter;
//!
//! let running = PipelineBuilder::<i64>::new()
//!     .stage(map("double", |v| v * 2))
//!     .stage(fan_out("square", 4, |v| v * v))
//!     .build()?
//!     .run(from_iter(1..=10));
//!
//! let (output, handle) = running.into_parts();
//! let values = output.collect_all().await;
//! let metrics = handle.join().await;
//! println!("delivered {} values", metrics.delivered());
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod relay;
mod stage;

pub use metrics::{HopMetrics, PipelineMetrics, RelayExit};
pub use pipeline::{
    Pipeline, PipelineBuilder, PipelineExecutor, PipelineHandle, RunningPipeline, run_pipeline,
};
pub use relay::relay;
pub use stage::{
    BoxedStage, ExecutionMode, MapStage, Stage, fan_out, filter, filter_map, inspect, map,
};
