//! relaypipe-demo: runs a numeric pipeline over `1..=count`.
//!
//! Each `--stage` flag appends one stage. Ctrl-C or `--timeout-ms` cancels the
//! run; whatever was already delivered stays printed.
//!
//! ```text
//! relaypipe-demo --count 20 --stage double --stage delay:50 --stage odd --timeout-ms 300
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use relaypipe::pipeline::{BoxedStage, ExecutionMode, PipelineBuilder, filter, map};
use relaypipe::stream::{StreamReceiver, from_iter, stream};
use relaypipe::{CancellationSignal, PipelineOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relaypipe-demo", version, about = "Run a cancellable numeric pipeline")]
struct Args {
    /// Number of source values (1..=count)
    #[arg(long, default_value_t = 10)]
    count: i64,

    /// Stage to append: double, inc, square, odd, delay:<ms>
    #[arg(long = "stage")]
    stages: Vec<StageSpec>,

    /// Workers for arithmetic stages (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    /// Cancel the run after this many milliseconds (overrides config)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// JSON file with pipeline options
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageSpec {
    Double,
    Inc,
    Square,
    Odd,
    Delay(u64),
}

impl FromStr for StageSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let spec = match s {
            "double" => Self::Double,
            "inc" => Self::Inc,
            "square" => Self::Square,
            "odd" => Self::Odd,
            other => match other.strip_prefix("delay:") {
                Some(ms) => Self::Delay(
                    ms.parse()
                        .map_err(|e| format!("invalid delay in stage '{}': {}", other, e))?,
                ),
                None => return Err(format!("unknown stage '{}'", other)),
            },
        };
        Ok(spec)
    }
}

impl StageSpec {
    fn build(self, execution: ExecutionMode) -> BoxedStage<i64> {
        let arithmetic = |name: &str, f: fn(i64) -> i64| -> BoxedStage<i64> {
            Box::new(map(name, f).with_execution(execution))
        };

        match self {
            Self::Double => arithmetic("double", |v| v * 2),
            Self::Inc => arithmetic("inc", |v| v + 1),
            Self::Square => arithmetic("square", |v| v * v),
            Self::Odd => Box::new(filter("odd", |v: &i64| v % 2 != 0)),
            Self::Delay(ms) => Box::new(delay(Duration::from_millis(ms))),
        }
    }
}

/// Stage that holds every element for `pause` before passing it on.
fn delay(pause: Duration) -> impl Fn(StreamReceiver<i64>) -> StreamReceiver<i64> + Send + Sync {
    move |mut input: StreamReceiver<i64>| {
        let (tx, rx) = stream();
        tokio::spawn(async move {
            while let Some(value) = input.recv().await {
                tokio::time::sleep(pause).await;
                if tx.send(value).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_options(args: &Args) -> Result<PipelineOptions> {
    let mut options = match &args.config {
        Some(path) => PipelineOptions::load(path)
            .with_context(|| format!("failed to load options from {}", path.display()))?,
        None => PipelineOptions::default(),
    };

    if let Some(workers) = args.workers {
        options.workers = workers;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        options.deadline_ms = Some(timeout_ms);
    }
    if options.name.is_none() {
        options.name = Some("relaypipe-demo".to_string());
    }

    options.sanitize()?;
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let options = resolve_options(&args)?;

    let stages: Vec<BoxedStage<i64>> = args
        .stages
        .iter()
        .map(|spec| spec.build(options.execution()))
        .collect();

    tracing::info!(
        count = args.count,
        stages = ?args.stages,
        workers = options.workers,
        deadline_ms = ?options.deadline_ms,
        "Starting demo pipeline"
    );

    let signal = CancellationSignal::new();
    let running = PipelineBuilder::new()
        .stages(stages)
        .signal(signal.clone())
        .options(options)
        .build()?
        .run(from_iter(1..=args.count));
    let (mut output, handle) = running.into_parts();

    tokio::spawn(async move {
        tokio::select! {
            _ = signal.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    tracing::info!("Ctrl-C received, cancelling pipeline");
                    signal.cancel();
                }
            }
        }
    });

    while let Some(value) = output.recv().await {
        println!("{}", value);
    }

    let metrics = handle.join().await;
    for hop in &metrics.hops {
        tracing::info!(
            hop = hop.index,
            stage = %hop.target,
            forwarded = hop.forwarded,
            exit = ?hop.exit,
            "Hop summary"
        );
    }
    tracing::info!(
        run_id = %metrics.run_id,
        delivered = metrics.delivered(),
        cancelled = metrics.was_cancelled(),
        elapsed_ms = metrics.elapsed_ms as u64,
        "Demo pipeline finished"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaypipe::pipeline::Stage;

    #[test]
    fn test_parse_stage_specs() {
        assert_eq!("double".parse::<StageSpec>().unwrap(), StageSpec::Double);
        assert_eq!("odd".parse::<StageSpec>().unwrap(), StageSpec::Odd);
        assert_eq!(
            "delay:25".parse::<StageSpec>().unwrap(),
            StageSpec::Delay(25)
        );
        assert!("delay:soon".parse::<StageSpec>().is_err());
        assert!("triple".parse::<StageSpec>().is_err());
    }

    #[test]
    fn test_flags_override_options() {
        let args = Args::parse_from([
            "relaypipe-demo",
            "--workers",
            "2",
            "--timeout-ms",
            "150",
        ]);
        let options = resolve_options(&args).unwrap();
        assert_eq!(options.workers, 2);
        assert_eq!(options.deadline_ms, Some(150));
        assert_eq!(options.display_name(), "relaypipe-demo");
    }

    #[test]
    fn test_invalid_workers_rejected() {
        let args = Args::parse_from(["relaypipe-demo", "--workers", "0"]);
        assert!(resolve_options(&args).is_err());
    }

    #[tokio::test]
    async fn test_odd_filter_after_arithmetic() {
        let stages: Vec<BoxedStage<i64>> = [StageSpec::Inc, StageSpec::Double, StageSpec::Odd]
            .into_iter()
            .map(|spec| spec.build(ExecutionMode::Sequential))
            .collect();
        let output = PipelineBuilder::new()
            .stages(stages)
            .build()
            .unwrap()
            .run(from_iter(1..=4))
            .into_output();
        // (v + 1) * 2 is always even
        assert!(output.collect_all().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_arithmetic_stage_uses_configured_workers() {
        let args = Args::parse_from(["relaypipe-demo", "--workers", "3"]);
        let options = resolve_options(&args).unwrap();
        let stage = StageSpec::Double.build(options.execution());

        let mut out = stage.run(from_iter(1..=6)).collect_all().await;
        out.sort_unstable();
        assert_eq!(out, vec![2, 4, 6, 8, 10, 12]);
    }

    #[tokio::test]
    async fn test_delay_stage_passes_values_through() {
        let stage = StageSpec::Delay(1).build(ExecutionMode::Sequential);
        let output = stage.run(from_iter(vec![5, 6]));
        assert_eq!(output.collect_all().await, vec![5, 6]);
    }
}
