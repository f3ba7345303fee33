//! Error types for relaypipe.
//!
//! The data path has no error channel: a stream carries values and "end".
//! Errors only surface while configuring a pipeline, or when a producer
//! tries to hand a value to a consumer that no longer exists.

use thiserror::Error;

/// Errors raised while building or configuring a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid pipeline options.
    #[error("config error: {0}")]
    Config(String),

    /// Reading a configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Returned by [`StreamSender::send`](crate::stream::StreamSender::send) when
/// the consumer side of the stream has been dropped.
///
/// Carries the undelivered value back when it never left the producer.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("stream consumer is gone")]
pub struct SendError<T>(pub Option<T>);

impl<T> SendError<T> {
    /// Recover the value that could not be delivered, if it is still held.
    pub fn into_inner(self) -> Option<T> {
        self.0
    }
}
