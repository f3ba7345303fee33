use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use uuid::Uuid;

/// Why a relay stopped forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The input stream closed; every value was forwarded.
    UpstreamClosed,
    /// The cancellation signal fired.
    Cancelled,
    /// The consumer of the relay's output went away.
    DownstreamClosed,
}

#[derive(Debug, Clone)]
pub struct HopMetrics {
    pub index: usize,
    /// Name of the stage this hop feeds, or `"output"` for the final relay.
    pub target: String,
    pub forwarded: u64,
    /// `None` while the relay is still running.
    pub exit: Option<RelayExit>,
    pub duration_ms: Option<u128>,
}

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub run_id: Uuid,
    pub elapsed_ms: u128,
    pub hops: Vec<HopMetrics>,
}

impl PipelineMetrics {
    pub fn hop(&self, index: usize) -> Option<&HopMetrics> {
        self.hops.get(index)
    }

    /// Values forwarded into the stage named `name`.
    pub fn forwarded_into(&self, name: &str) -> Option<u64> {
        self.hops
            .iter()
            .find(|hop| hop.target == name)
            .map(|hop| hop.forwarded)
    }

    /// Values delivered to the caller by the final relay.
    pub fn delivered(&self) -> u64 {
        self.hops.last().map(|hop| hop.forwarded).unwrap_or(0)
    }

    /// Whether every relay has exited.
    pub fn is_finished(&self) -> bool {
        self.hops.iter().all(|hop| hop.exit.is_some())
    }

    pub fn was_cancelled(&self) -> bool {
        self.hops
            .iter()
            .any(|hop| hop.exit == Some(RelayExit::Cancelled))
    }
}

/// Live counters for one relay.
#[derive(Debug)]
pub(crate) struct HopRecorder {
    index: usize,
    target: String,
    started: Instant,
    forwarded: AtomicU64,
    exit: Mutex<Option<(RelayExit, u128)>>,
}

impl HopRecorder {
    pub(crate) fn new(index: usize, target: impl Into<String>) -> Self {
        Self {
            index,
            target: target.into(),
            started: Instant::now(),
            forwarded: AtomicU64::new(0),
            exit: Mutex::new(None),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn record_forward(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Record the relay's exit. A relay exits exactly once.
    pub(crate) fn record_exit(&self, cause: RelayExit) {
        let mut exit = self.exit.lock();
        debug_assert!(exit.is_none(), "relay for hop {} exited twice", self.index);
        if exit.is_none() {
            *exit = Some((cause, self.started.elapsed().as_millis()));
        }
    }

    fn snapshot(&self) -> HopMetrics {
        let exit = *self.exit.lock();
        HopMetrics {
            index: self.index,
            target: self.target.clone(),
            forwarded: self.forwarded(),
            exit: exit.map(|(cause, _)| cause),
            duration_ms: exit.map(|(_, duration_ms)| duration_ms),
        }
    }
}

/// Shared metrics for one pipeline run, written by its relays.
#[derive(Debug)]
pub(crate) struct PipelineMetricsStorage {
    run_id: Uuid,
    started: Instant,
    hops: Vec<Arc<HopRecorder>>,
}

impl PipelineMetricsStorage {
    pub(crate) fn new<I, S>(run_id: Uuid, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            run_id,
            started: Instant::now(),
            hops: targets
                .into_iter()
                .enumerate()
                .map(|(index, target)| Arc::new(HopRecorder::new(index, target)))
                .collect(),
        }
    }

    pub(crate) fn hop(&self, index: usize) -> Arc<HopRecorder> {
        Arc::clone(&self.hops[index])
    }

    pub(crate) fn snapshot(&self) -> PipelineMetrics {
        PipelineMetrics {
            run_id: self.run_id,
            elapsed_ms: self.started.elapsed().as_millis(),
            hops: self.hops.iter().map(|hop| hop.snapshot()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_recorded_hops() {
        let storage = PipelineMetricsStorage::new(Uuid::new_v4(), ["double", "output"]);

        let first = storage.hop(0);
        first.record_forward();
        first.record_forward();
        first.record_exit(RelayExit::UpstreamClosed);

        let metrics = storage.snapshot();
        assert_eq!(metrics.forwarded_into("double"), Some(2));
        assert_eq!(metrics.hop(0).unwrap().exit, Some(RelayExit::UpstreamClosed));
        assert!(metrics.hop(0).unwrap().duration_ms.is_some());
        assert_eq!(metrics.hop(1).unwrap().exit, None);
        assert!(!metrics.is_finished());
        assert!(!metrics.was_cancelled());
    }

    #[test]
    fn test_delivered_counts_final_hop() {
        let storage = PipelineMetricsStorage::new(Uuid::new_v4(), ["output"]);
        let hop = storage.hop(0);
        for _ in 0..5 {
            hop.record_forward();
        }
        hop.record_exit(RelayExit::Cancelled);

        let metrics = storage.snapshot();
        assert_eq!(metrics.delivered(), 5);
        assert!(metrics.is_finished());
        assert!(metrics.was_cancelled());
        assert_eq!(metrics.forwarded_into("missing"), None);
    }

    #[test]
    #[should_panic(expected = "exited twice")]
    #[cfg(debug_assertions)]
    fn test_double_exit_is_a_bug() {
        let hop = HopRecorder::new(0, "output");
        hop.record_exit(RelayExit::UpstreamClosed);
        hop.record_exit(RelayExit::Cancelled);
    }
}
