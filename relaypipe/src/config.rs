//! Pipeline options.
//!
//! Options are plain serde data so hosts can keep them in a JSON file next to
//! the rest of their configuration. Call [`PipelineOptions::sanitize`] before
//! use; the builder does this for you.

use crate::errors::{PipelineError, PipelineResult};
use crate::pipeline::ExecutionMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default number of workers for parallel stages built from options.
pub const DEFAULT_WORKERS: usize = 4;

/// Upper bound on parallel workers per stage.
pub const MAX_WORKERS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOptions {
    /// Name used in log output.
    pub name: Option<String>,
    /// Cancel the run automatically after this many milliseconds.
    pub deadline_ms: Option<u64>,
    /// Worker count for element-wise stages built with
    /// [`PipelineOptions::execution`]. One worker keeps them sequential.
    pub workers: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            name: None,
            deadline_ms: None,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl PipelineOptions {
    /// Parse options from a JSON string.
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.sanitize()?;
        Ok(options)
    }

    /// Load options from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loaded pipeline options");
        Self::from_json(&json)
    }

    /// Validate option values.
    pub fn sanitize(&self) -> PipelineResult<()> {
        if self
            .name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(PipelineError::Config(
                "pipeline name must not be empty".into(),
            ));
        }

        if self.deadline_ms == Some(0) {
            return Err(PipelineError::Config(
                "deadline_ms must be greater than 0".into(),
            ));
        }

        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(PipelineError::Config(format!(
                "workers must be between 1 and {}, got {}",
                MAX_WORKERS, self.workers
            )));
        }

        Ok(())
    }

    /// Execution mode for element-wise stages sized by these options.
    ///
    /// Apply it with [`MapStage::with_execution`](crate::pipeline::MapStage::with_execution).
    pub fn execution(&self) -> ExecutionMode {
        match self.workers {
            0 | 1 => ExecutionMode::Sequential,
            workers => ExecutionMode::Parallel { workers },
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Name for log output, falling back to `"pipeline"`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("pipeline")
    }
}
