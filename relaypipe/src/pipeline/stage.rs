//! Stage contract and the element-wise stage adapters.

use crate::stream::{StreamReceiver, stream};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A stream transformation the pipeline runs between two relays.
///
/// `run` must return promptly; any work happens on tasks it spawns. A stage
/// owns the output stream it returns and must let it close on every exit
/// path, including when its input ends before producing anything. Dropping
/// the sender is enough, so panics are covered as well.
///
/// Any `Fn(StreamReceiver<T>) -> StreamReceiver<T>` is a stage.
pub trait Stage<T>: Send + Sync {
    fn run(&self, input: StreamReceiver<T>) -> StreamReceiver<T>;

    /// Human-readable stage name for logging and metrics.
    fn name(&self) -> &str {
        "stage"
    }
}

pub type BoxedStage<T> = Box<dyn Stage<T>>;

impl<T, F> Stage<T> for F
where
    F: Fn(StreamReceiver<T>) -> StreamReceiver<T> + Send + Sync,
{
    fn run(&self, input: StreamReceiver<T>) -> StreamReceiver<T> {
        self(input)
    }
}

/// How a [`MapStage`] schedules its per-element work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One worker; output order matches input order.
    Sequential,
    /// Several workers pulling from the shared input. No output ordering.
    Parallel { workers: usize },
}

/// Element-wise stage: applies `f` to every input value and forwards the
/// `Some` results.
///
/// Built through [`map`], [`filter`], [`inspect`], [`filter_map`] and
/// [`fan_out`].
pub struct MapStage<F> {
    name: String,
    execution: ExecutionMode,
    f: Arc<F>,
}

impl<F> MapStage<F> {
    pub fn execution(&self) -> ExecutionMode {
        self.execution
    }

    /// Run this stage under `execution` instead. A parallel mode runs at
    /// least one worker, and gives up output ordering.
    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = match execution {
            ExecutionMode::Parallel { workers } => ExecutionMode::Parallel {
                workers: workers.max(1),
            },
            sequential => sequential,
        };
        self
    }
}

impl<T, F> Stage<T> for MapStage<F>
where
    T: Send + 'static,
    F: Fn(T) -> Option<T> + Send + Sync + 'static,
{
    fn run(&self, input: StreamReceiver<T>) -> StreamReceiver<T> {
        match self.execution {
            ExecutionMode::Sequential => run_sequential(&self.name, input, Arc::clone(&self.f)),
            ExecutionMode::Parallel { workers } => {
                run_parallel(&self.name, input, Arc::clone(&self.f), workers)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn run_sequential<T, F>(name: &str, mut input: StreamReceiver<T>, f: Arc<F>) -> StreamReceiver<T>
where
    T: Send + 'static,
    F: Fn(T) -> Option<T> + Send + Sync + 'static,
{
    let (tx, rx) = stream();
    let name = name.to_string();
    tokio::spawn(async move {
        while let Some(value) = input.recv().await {
            let Some(out) = f(value) else { continue };
            if tx.send(out).await.is_err() {
                tracing::trace!(stage = %name, "Consumer gone, stopping stage");
                return;
            }
        }
        tracing::trace!(stage = %name, "Input ended, closing stage output");
    });
    rx
}

fn run_parallel<T, F>(
    name: &str,
    input: StreamReceiver<T>,
    f: Arc<F>,
    workers: usize,
) -> StreamReceiver<T>
where
    T: Send + 'static,
    F: Fn(T) -> Option<T> + Send + Sync + 'static,
{
    let (tx, rx) = stream();
    let input = Arc::new(Mutex::new(input));

    for (worker, tx) in tx.fan_in(workers).into_iter().enumerate() {
        let input = Arc::clone(&input);
        let f = Arc::clone(&f);
        let name = name.to_string();
        tokio::spawn(async move {
            loop {
                let next = input.lock().await.recv().await;
                let Some(value) = next else { break };
                let Some(out) = f(value) else { continue };
                if tx.send(out).await.is_err() {
                    break;
                }
            }
            tracing::trace!(stage = %name, worker, "Fan-out worker exited");
        });
    }
    rx
}

/// Sequential transform of every element.
pub fn map<T, F>(
    name: impl Into<String>,
    f: F,
) -> MapStage<impl Fn(T) -> Option<T> + Send + Sync + 'static>
where
    F: Fn(T) -> T + Send + Sync + 'static,
{
    filter_map(name, move |value| Some(f(value)))
}

/// Keep only elements for which `predicate` holds. Order preserving.
pub fn filter<T, P>(
    name: impl Into<String>,
    predicate: P,
) -> MapStage<impl Fn(T) -> Option<T> + Send + Sync + 'static>
where
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    filter_map(name, move |value| predicate(&value).then_some(value))
}

/// Observe every element without changing the stream.
pub fn inspect<T, F>(
    name: impl Into<String>,
    f: F,
) -> MapStage<impl Fn(T) -> Option<T> + Send + Sync + 'static>
where
    F: Fn(&T) + Send + Sync + 'static,
{
    filter_map(name, move |value| {
        f(&value);
        Some(value)
    })
}

/// Sequential transform that may drop elements by returning `None`.
pub fn filter_map<T, F>(name: impl Into<String>, f: F) -> MapStage<F>
where
    F: Fn(T) -> Option<T> + Send + Sync + 'static,
{
    MapStage {
        name: name.into(),
        execution: ExecutionMode::Sequential,
        f: Arc::new(f),
    }
}

/// Parallel transform over `workers` concurrent workers sharing one output.
///
/// The output closes exactly once, after the last worker has finished.
/// `workers` is clamped to at least one.
pub fn fan_out<T, F>(
    name: impl Into<String>,
    workers: usize,
    f: F,
) -> MapStage<impl Fn(T) -> Option<T> + Send + Sync + 'static>
where
    F: Fn(T) -> T + Send + Sync + 'static,
{
    map(name, f).with_execution(ExecutionMode::Parallel { workers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::from_iter;
    use std::time::Duration;

    #[tokio::test]
    async fn test_closure_is_a_stage() {
        let identity = |input: StreamReceiver<i32>| input;
        assert_eq!(Stage::<i32>::name(&identity), "stage");
        let out = identity.run(from_iter(vec![1, 2]));
        assert_eq!(out.collect_all().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_map_preserves_order() {
        let stage = map("double", |v: i32| v * 2);
        assert_eq!(stage.name(), "double");
        assert_eq!(stage.execution(), ExecutionMode::Sequential);

        let out = stage.run(from_iter(1..=5));
        assert_eq!(out.collect_all().await, vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn test_filter_drops_elements() {
        let stage = filter("odd", |v: &i32| v % 2 == 1);
        let out = stage.run(from_iter(1..=6));
        assert_eq!(out.collect_all().await, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_inspect_sees_every_element() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let stage = {
            let seen = Arc::clone(&seen);
            inspect("tap", move |v: &u8| seen.lock().unwrap().push(*v))
        };
        let out = stage.run(from_iter(vec![3u8, 1, 2]));
        assert_eq!(out.collect_all().await, vec![3, 1, 2]);
        assert_eq!(*seen.lock().unwrap(), vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_empty_input_closes_output() {
        let stage = map("noop", |v: u8| v);
        let out = stage.run(from_iter(Vec::<u8>::new()));
        let values = tokio::time::timeout(Duration::from_millis(500), out.collect_all())
            .await
            .expect("output must close on empty input");
        assert!(values.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fan_out_processes_every_element_once() {
        let stage = fan_out("square", 4, |v: u64| v * v);
        assert_eq!(stage.execution(), ExecutionMode::Parallel { workers: 4 });

        let mut out = stage.run(from_iter(1..=50u64)).collect_all().await;
        out.sort_unstable();
        let expected: Vec<u64> = (1..=50u64).map(|v| v * v).collect();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_fan_out_clamps_workers() {
        let stage = fan_out("inc", 0, |v: i32| v + 1);
        assert_eq!(stage.execution(), ExecutionMode::Parallel { workers: 1 });
        assert_eq!(stage.run(from_iter(vec![1])).collect_all().await, vec![2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_with_execution_switches_to_parallel() {
        let stage = filter("even", |v: &u32| v % 2 == 0)
            .with_execution(ExecutionMode::Parallel { workers: 3 });
        assert_eq!(stage.execution(), ExecutionMode::Parallel { workers: 3 });

        let mut out = stage.run(from_iter(1..=20u32)).collect_all().await;
        out.sort_unstable();
        assert_eq!(out, (1..=10).map(|v| v * 2).collect::<Vec<_>>());

        let back = stage.with_execution(ExecutionMode::Sequential);
        assert_eq!(back.execution(), ExecutionMode::Sequential);
    }

    #[tokio::test]
    async fn test_fan_out_worker_panic_closes_output() {
        let stage = fan_out("boom", 2, |v: i32| {
            if v == 3 {
                panic!("bad element");
            }
            v
        });

        let out = stage.run(from_iter(1..=6));
        tokio::time::timeout(Duration::from_secs(2), out.collect_all())
            .await
            .expect("a panicking worker must not leave the output open");
    }
}
