use sluice_flow::{
    ErrorRecord, FailurePolicy, Marker, Pipeline, QueueCapacity, RunOutcome, StageOptions,
    WorkItem,
};
use sluice_processors::{FnProcessor, FnSink, MarkerGate};
use std::error::Error;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const TEST1: Marker = Marker(100);
const TEST2: Marker = Marker(101);
const TEST3: Marker = Marker(102);

// Custom error type for the cell tests
#[derive(thiserror::Error, Debug, Clone)]
enum CellError {
    #[error("cell #{0} is not connected")]
    Disconnected(u64),
}

/// Run settings, overridable from the environment:
///
/// * `SLUICE_CELLS` - number of cells to test
/// * `SLUICE_STEP_DELAY_MS` - simulated time of every step
/// * `SLUICE_MAX_PARALLEL` - concurrency limit of every stage
/// * `SLUICE_DISCONNECTED_CELL` - cell that fails preparation and is skipped
#[derive(Debug, Clone)]
struct SampleConfig {
    cells: u64,
    step_delay: Duration,
    max_parallel: usize,
    disconnected: Option<u64>,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            cells: 3,
            step_delay: Duration::from_secs(1),
            max_parallel: 40,
            disconnected: None,
        }
    }
}

impl SampleConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cells: env_var("SLUICE_CELLS").unwrap_or(defaults.cells),
            step_delay: env_var("SLUICE_STEP_DELAY_MS")
                .map_or(defaults.step_delay, Duration::from_millis),
            max_parallel: env_var("SLUICE_MAX_PARALLEL").unwrap_or(defaults.max_parallel),
            disconnected: env_var("SLUICE_DISCONNECTED_CELL"),
        }
    }

    fn cells(&self) -> Vec<WorkItem> {
        (1..=self.cells)
            .map(|number| {
                let markers = if number % 3 == 0 {
                    vec![TEST3]
                } else {
                    vec![TEST1, TEST2, TEST3]
                };
                WorkItem::new(number).with_markers(markers)
            })
            .collect()
    }
}

fn env_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

async fn step(label: &'static str, cell: WorkItem, delay: Duration) -> Result<WorkItem, CellError> {
    info!("#{} {label}...", cell.number);
    tokio::time::sleep(delay).await;
    Ok(cell)
}

fn cell_test(
    name: &'static str,
    marker: Marker,
    delay: Duration,
) -> MarkerGate<impl sluice_flow::Processor<Input = WorkItem, Output = WorkItem, Error = CellError>>
{
    MarkerGate::new(
        marker,
        FnProcessor::new(name, move |cell: WorkItem| step(name, cell, delay)),
    )
}

fn report_failure(record: &ErrorRecord<WorkItem, CellError>) {
    warn!(
        "#{} failed in {} (attempt {}): {}",
        record.item.number, record.stage, record.attempt, record.error
    );
}

fn cell_pipeline(config: &SampleConfig) -> Pipeline<WorkItem, CellError> {
    let delay = config.step_delay;
    let disconnected = config.disconnected;
    let stage_options = StageOptions::new()
        .with_max_parallel(config.max_parallel)
        .with_queue(QueueCapacity::Unbounded);

    Pipeline::new()
        .with_defaults(stage_options)
        // A cell that cannot be prepared is not tested at all
        .prepare_with(
            FnProcessor::new("prepare", move |cell: WorkItem| async move {
                if disconnected == Some(cell.number) {
                    return Err(CellError::Disconnected(cell.number));
                }
                step("Preparing", cell, delay).await
            }),
            stage_options.with_failure_policy(FailurePolicy::Drop),
        )
        .process(cell_test("Test1", TEST1, delay))
        .process(cell_test("Test2", TEST2, delay))
        .process(cell_test("Test3", TEST3, delay))
        .sink(FnSink::new("finalize", move |cell: WorkItem| async move {
            step("Finalizing", cell, delay).await.map(|_| ())
        }))
        .on_error(report_failure)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let config = SampleConfig::from_env();
    info!(?config, "Starting cell test run");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                // Ignore if the run already finished
                let _ = shutdown_tx.send(());
            }
        });

        let pipeline = cell_pipeline(&config);

        let report = pipeline.run_until(config.cells(), shutdown_rx).await?;

        match report.outcome {
            RunOutcome::Completed => info!(
                delivered = report.delivered,
                failures = report.errors.len(),
                "Done"
            ),
            RunOutcome::Cancelled => warn!(delivered = report.delivered, "Run cancelled"),
        }
        for stage in &report.stages {
            info!(
                stage = %stage.name,
                received = stage.received,
                forwarded = stage.forwarded,
                failed = stage.failed,
                "Stage summary"
            );
        }
        Ok::<(), Box<dyn Error>>(())
    })
}
