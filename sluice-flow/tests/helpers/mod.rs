use sluice_flow::{FlowComponent, FlowFuture, Marker, Processor, Sink, WorkItem};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const T1: Marker = Marker(100);
pub const T2: Marker = Marker(101);
pub const T3: Marker = Marker(102);

// Error Types
#[derive(Debug, Clone, PartialEq)]
pub struct TestError(pub String);

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Test error: {}", self.0)
    }
}

impl Error for TestError {}

/// (stage name, item number) for every item a stage acted on.
pub type Journal = Arc<Mutex<Vec<(String, u64)>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn acted_on(journal: &Journal, stage: &str) -> Vec<u64> {
    let mut numbers: Vec<u64> = journal
        .lock()
        .unwrap()
        .iter()
        .filter(|(name, _)| name == stage)
        .map(|(_, number)| *number)
        .collect();
    numbers.sort_unstable();
    numbers
}

pub fn items(count: u64) -> Vec<WorkItem> {
    (1..=count)
        .map(|number| WorkItem::new(number).with_markers([T1, T2, T3]))
        .collect()
}

pub fn scenario_items() -> Vec<WorkItem> {
    vec![
        WorkItem::new(1).with_markers([T1, T2, T3]),
        WorkItem::new(2).with_markers([T1, T2, T3]),
        WorkItem::new(3).with_markers([T3]),
    ]
}

// Test Components

/// Acts on items carrying its marker (or every item when it has none),
/// recording each one in the journal. Items without the marker pass through.
#[derive(Clone)]
pub struct TestStage {
    pub name: &'static str,
    pub marker: Option<Marker>,
    pub journal: Journal,
    pub fail_on: Vec<u64>,
    pub delay: Duration,
}

impl TestStage {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            marker: None,
            journal: Arc::clone(journal),
            fail_on: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn for_marker(mut self, marker: Marker) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn failing_on(mut self, number: u64) -> Self {
        self.fail_on.push(number);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl FlowComponent for TestStage {
    type Input = WorkItem;
    type Output = WorkItem;
    type Error = TestError;

    fn name(&self) -> &str {
        self.name
    }
}

impl Processor for TestStage {
    fn process(&self, input: Self::Input) -> FlowFuture<'_, Self::Output, Self::Error> {
        Box::pin(async move {
            if let Some(marker) = self.marker {
                if !input.has_marker(marker) {
                    return Ok(input);
                }
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_on.contains(&input.number) {
                return Err(TestError(format!("{} failed for #{}", self.name, input.number)));
            }
            self.journal
                .lock()
                .unwrap()
                .push((self.name.to_string(), input.number));
            Ok(input)
        })
    }
}

/// Sleeps longer for lower item numbers so later items overtake earlier ones.
pub struct StaggeredStage {
    pub step: Duration,
    pub count: u64,
}

impl FlowComponent for StaggeredStage {
    type Input = WorkItem;
    type Output = WorkItem;
    type Error = TestError;

    fn name(&self) -> &str {
        "staggered"
    }
}

impl Processor for StaggeredStage {
    fn process(&self, input: Self::Input) -> FlowFuture<'_, Self::Output, Self::Error> {
        let factor = u32::try_from(self.count + 1 - input.number).unwrap_or(1);
        let delay = self.step * factor;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(input)
        })
    }
}

/// Tracks how many invocations run at the same time.
#[derive(Clone, Default)]
pub struct ConcurrencyProbe {
    pub current: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl FlowComponent for ConcurrencyProbe {
    type Input = WorkItem;
    type Output = WorkItem;
    type Error = TestError;

    fn name(&self) -> &str {
        "probe"
    }
}

impl Processor for ConcurrencyProbe {
    fn process(&self, input: Self::Input) -> FlowFuture<'_, Self::Output, Self::Error> {
        Box::pin(async move {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(input)
        })
    }
}

/// Fails the first `failures` calls for `number`, then succeeds.
pub struct FlakyStage {
    pub number: u64,
    pub failures: usize,
    pub calls: Arc<AtomicUsize>,
}

impl FlowComponent for FlakyStage {
    type Input = WorkItem;
    type Output = WorkItem;
    type Error = TestError;

    fn name(&self) -> &str {
        "flaky"
    }
}

impl Processor for FlakyStage {
    fn process(&self, input: Self::Input) -> FlowFuture<'_, Self::Output, Self::Error> {
        Box::pin(async move {
            if input.number != self.number {
                return Ok(input);
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(TestError(format!("flaky call {call}")))
            } else {
                Ok(input)
            }
        })
    }
}

pub struct PanickingStage;

impl FlowComponent for PanickingStage {
    type Input = WorkItem;
    type Output = WorkItem;
    type Error = TestError;

    fn name(&self) -> &str {
        "boom"
    }
}

impl Processor for PanickingStage {
    fn process(&self, input: Self::Input) -> FlowFuture<'_, Self::Output, Self::Error> {
        Box::pin(async move {
            if input.number == 2 {
                panic!("stage bug");
            }
            Ok(input)
        })
    }
}

/// Records every item it receives, in arrival order.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub received: Arc<Mutex<Vec<WorkItem>>>,
    pub fail_on: Vec<u64>,
}

impl RecordingSink {
    pub fn numbers(&self) -> Vec<u64> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|item| item.number)
            .collect()
    }

    pub fn sorted_numbers(&self) -> Vec<u64> {
        let mut numbers = self.numbers();
        numbers.sort_unstable();
        numbers
    }
}

impl FlowComponent for RecordingSink {
    type Input = WorkItem;
    type Output = ();
    type Error = TestError;

    fn name(&self) -> &str {
        "sink"
    }
}

impl Sink for RecordingSink {
    fn sink(&self, input: Self::Input) -> FlowFuture<'_, (), Self::Error> {
        Box::pin(async move {
            if self.fail_on.contains(&input.number) {
                return Err(TestError(format!("sink failed for #{}", input.number)));
            }
            self.received.lock().unwrap().push(input);
            Ok(())
        })
    }
}

// Add this function to initialize tracing for tests
pub fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sluice_flow=debug".parse().unwrap()),
        )
        .with_test_writer()
        .with_thread_ids(true)
        .with_target(false)
        .compact()
        .try_init();

    if subscriber.is_err() {
        println!("Warning: tracing already initialized");
    }
}
