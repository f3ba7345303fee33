//! relaypipe: a cancellable, multi-stage concurrent stream pipeline.
//!
//! Stages are chained with a cancellation-aware relay in front of each one,
//! so a single [`CancellationSignal`] stops the whole chain promptly without
//! leaking tasks or deadlocking a handoff.

pub mod config;
pub mod errors;
pub mod pipeline;
pub mod signal;
pub mod stream;

pub use config::PipelineOptions;
pub use errors::{PipelineError, PipelineResult, SendError};
pub use pipeline::{BoxedStage, PipelineBuilder, Stage, run_pipeline};
pub use signal::CancellationSignal;
pub use stream::{StreamReceiver, StreamSender};
