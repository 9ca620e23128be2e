use std::error::Error;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::isolation::Isolation;
use super::report::{ErrorRecord, RunReport};
use super::running::{CancelHandle, RunningPipeline};
use super::worker::{StageContext, StageWorker};
use crate::error::FlowError;
use crate::flow::{
    options::StageOptions,
    processor::Processor,
    sink::Sink,
    stage::{Operation, StageSpec, StageState},
    types::{BoxedProcessor, BoxedSink, ErrorReporter},
};

/// A builder for constructing and running staged pipelines.
///
/// A pipeline is a linear chain: one prepare stage, any number of transform
/// stages, and a sink. Each stage runs its operation with bounded parallelism
/// and passes results to the next one; the chain is fixed once the pipeline
/// starts.
///
/// # Type Parameters
///
/// * `DataType` - The type of items flowing through the pipeline
/// * `ErrorType` - The error type stage operations can fail with
///
/// # Examples
///
/// ```
/// use sluice_flow::{FlowComponent, FlowFuture, Pipeline, Processor, Sink, StageOptions};
/// use std::fmt;
///
/// #[derive(Debug, Clone)]
/// struct MyError;
///
/// impl fmt::Display for MyError {
///     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
///         write!(f, "MyError")
///     }
/// }
///
/// impl std::error::Error for MyError {}
///
/// struct Double;
///
/// impl FlowComponent for Double {
///     type Input = u64;
///     type Output = u64;
///     type Error = MyError;
/// }
///
/// impl Processor for Double {
///     fn process(&self, input: Self::Input) -> FlowFuture<'_, Self::Output, Self::Error> {
///         Box::pin(async move { Ok(input * 2) })
///     }
/// }
///
/// struct Discard;
///
/// impl FlowComponent for Discard {
///     type Input = u64;
///     type Output = ();
///     type Error = MyError;
/// }
///
/// impl Sink for Discard {
///     fn sink(&self, _input: Self::Input) -> FlowFuture<'_, (), Self::Error> {
///         Box::pin(async move { Ok(()) })
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let report = Pipeline::new()
///         .with_defaults(StageOptions::new().with_max_parallel(4))
///         .prepare(Double)
///         .process(Double)
///         .sink(Discard)
///         .run(1..=10)
///         .await
///         .unwrap();
///
///     assert_eq!(report.delivered, 10);
/// }
/// ```
pub struct Pipeline<DataType, ErrorType> {
    pub(crate) stages: Vec<StageSpec<DataType, ErrorType>>,
    pub(crate) has_sink: bool,
    pub(crate) defaults: StageOptions,
    pub(crate) reporter: Option<ErrorReporter<DataType, ErrorType>>,
}

impl<DataType, ErrorType> Pipeline<DataType, ErrorType>
where
    DataType: Clone + Send + Sync + 'static,
    ErrorType: Error + Send + Sync + 'static,
{
    /// Creates a new empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            has_sink: false,
            defaults: StageOptions::default(),
            reporter: None,
        }
    }

    /// Builds a pipeline from an ordered list of stage operations and a sink.
    ///
    /// The first operation becomes the prepare stage. Every stage runs with
    /// `max_parallel` and the default queue and failure policy.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::NoPrepare`] when `stages` is empty.
    pub fn build<F>(
        stages: Vec<BoxedProcessor<DataType, ErrorType>>,
        sink: BoxedSink<DataType, ErrorType>,
        max_parallel: usize,
        reporter: F,
    ) -> Result<Self, FlowError>
    where
        F: Fn(&ErrorRecord<DataType, ErrorType>) + Send + Sync + 'static,
    {
        if stages.is_empty() {
            return Err(FlowError::NoPrepare);
        }
        let mut pipeline =
            Self::new().with_defaults(StageOptions::new().with_max_parallel(max_parallel));
        for processor in stages {
            pipeline.push(Operation::Process(Arc::from(processor)), None);
        }
        pipeline.push(Operation::Sink(Arc::from(sink)), None);
        pipeline.has_sink = true;
        Ok(pipeline.on_error(reporter))
    }

    /// Sets the options of every stage that was not given its own.
    #[must_use]
    pub fn with_defaults(mut self, options: StageOptions) -> Self {
        self.defaults = options;
        self
    }

    /// Sets the first stage of the pipeline.
    ///
    /// # Panics
    ///
    /// When a stage was already added.
    #[must_use]
    pub fn prepare<ProcessorType>(self, processor: ProcessorType) -> Self
    where
        ProcessorType: Processor<Input = DataType, Output = DataType, Error = ErrorType>
            + Send
            + Sync
            + 'static,
    {
        self.prepare_stage(processor, None)
    }

    /// Like [`prepare`](Self::prepare), with options for this stage only.
    #[must_use]
    pub fn prepare_with<ProcessorType>(self, processor: ProcessorType, options: StageOptions) -> Self
    where
        ProcessorType: Processor<Input = DataType, Output = DataType, Error = ErrorType>
            + Send
            + Sync
            + 'static,
    {
        self.prepare_stage(processor, Some(options))
    }

    /// Appends a transform stage.
    ///
    /// # Panics
    ///
    /// When there is no prepare stage yet, or the sink was already added.
    #[must_use]
    pub fn process<ProcessorType>(self, processor: ProcessorType) -> Self
    where
        ProcessorType: Processor<Input = DataType, Output = DataType, Error = ErrorType>
            + Send
            + Sync
            + 'static,
    {
        self.process_stage(processor, None)
    }

    /// Like [`process`](Self::process), with options for this stage only.
    #[must_use]
    pub fn process_with<ProcessorType>(self, processor: ProcessorType, options: StageOptions) -> Self
    where
        ProcessorType: Processor<Input = DataType, Output = DataType, Error = ErrorType>
            + Send
            + Sync
            + 'static,
    {
        self.process_stage(processor, Some(options))
    }

    /// Adds the terminal stage.
    ///
    /// # Panics
    ///
    /// When there is no prepare stage yet, or a sink was already added.
    #[must_use]
    pub fn sink<SinkType>(self, sink: SinkType) -> Self
    where
        SinkType: Sink<Input = DataType, Output = (), Error = ErrorType> + Send + Sync + 'static,
    {
        self.sink_stage(sink, None)
    }

    /// Like [`sink`](Self::sink), with options for the sink only.
    #[must_use]
    pub fn sink_with<SinkType>(self, sink: SinkType, options: StageOptions) -> Self
    where
        SinkType: Sink<Input = DataType, Output = (), Error = ErrorType> + Send + Sync + 'static,
    {
        self.sink_stage(sink, Some(options))
    }

    /// Registers the callback invoked for every failed invocation.
    #[must_use]
    pub fn on_error<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&ErrorRecord<DataType, ErrorType>) + Send + Sync + 'static,
    {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    fn prepare_stage<ProcessorType>(
        mut self,
        processor: ProcessorType,
        options: Option<StageOptions>,
    ) -> Self
    where
        ProcessorType: Processor<Input = DataType, Output = DataType, Error = ErrorType>
            + Send
            + Sync
            + 'static,
    {
        if !self.stages.is_empty() {
            panic!("Prepare must be the first stage in a pipeline");
        }
        self.push(Operation::Process(Arc::new(processor)), options);
        self
    }

    fn process_stage<ProcessorType>(
        mut self,
        processor: ProcessorType,
        options: Option<StageOptions>,
    ) -> Self
    where
        ProcessorType: Processor<Input = DataType, Output = DataType, Error = ErrorType>
            + Send
            + Sync
            + 'static,
    {
        if self.stages.is_empty() {
            panic!("Pipeline must start with a prepare stage");
        }
        if self.has_sink {
            panic!("Cannot add processor after sink - sink must be the last stage");
        }
        self.push(Operation::Process(Arc::new(processor)), options);
        self
    }

    fn sink_stage<SinkType>(mut self, sink: SinkType, options: Option<StageOptions>) -> Self
    where
        SinkType: Sink<Input = DataType, Output = (), Error = ErrorType> + Send + Sync + 'static,
    {
        if self.stages.is_empty() {
            panic!("Pipeline must start with a prepare stage");
        }
        if self.has_sink {
            panic!("Pipeline already has a sink");
        }
        self.push(Operation::Sink(Arc::new(sink)), options);
        self.has_sink = true;
        self
    }

    fn push(&mut self, operation: Operation<DataType, ErrorType>, options: Option<StageOptions>) {
        let name: Arc<str> = match &operation {
            Operation::Process(processor) => Arc::from(processor.name()),
            Operation::Sink(sink) => Arc::from(sink.name()),
        };
        debug!(stage = %name, position = self.stages.len(), "Adding stage");
        self.stages.push(StageSpec {
            name,
            operation,
            options,
        });
    }

    fn validate(&self) -> Result<(), FlowError> {
        if self.stages.is_empty() {
            return Err(FlowError::NoPrepare);
        }
        if !self.has_sink {
            return Err(FlowError::NoSink);
        }
        Ok(())
    }

    /// Wires the stages together and spawns one task per stage.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::NoPrepare`] or [`FlowError::NoSink`] for an
    /// incomplete pipeline.
    pub fn start(self) -> Result<RunningPipeline<DataType, ErrorType>, FlowError> {
        self.validate()?;

        let defaults = self.defaults;
        let options: Vec<StageOptions> = self
            .stages
            .iter()
            .map(|spec| {
                let options = spec.options.unwrap_or(defaults);
                options.with_max_parallel(options.max_parallel)
            })
            .collect();

        // One queue per stage input; stage i writes into queue i + 1.
        let (mut senders, receivers): (Vec<_>, Vec<_>) =
            options.iter().map(|options| options.queue.channel()).unzip();
        let input = senders.remove(0);
        let mut outputs = senders.into_iter().map(Some).chain(std::iter::once(None));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (records_tx, records_rx) = flume::unbounded();
        let mut tasks = JoinSet::new();
        let mut states = Vec::with_capacity(self.stages.len());

        for (index, ((spec, options), receiver)) in self
            .stages
            .into_iter()
            .zip(options)
            .zip(receivers)
            .enumerate()
        {
            let (state_tx, state_rx) = watch::channel(StageState::Open);
            states.push((spec.name.to_string(), state_rx));

            let isolation = Isolation::new(
                Arc::clone(&spec.name),
                options.on_error.retries(),
                self.reporter.clone(),
                records_tx.clone(),
            );
            let context = StageContext {
                name: spec.name,
                operation: spec.operation,
                options,
                isolation: Arc::new(isolation),
                state: state_tx,
                cancel: cancel_rx.clone(),
            };
            let worker = StageWorker::new(context, receiver, outputs.next().flatten());
            tasks.spawn(async move { (index, worker.run().await) });
        }

        info!(stages = states.len(), "Pipeline started");

        Ok(RunningPipeline {
            input: Some(input),
            cancel: CancelHandle {
                flag: Arc::new(cancel_tx),
            },
            tasks,
            states,
            records: records_rx,
            submitted: 0,
        })
    }

    /// Submits every item in order, signals completion, and waits for the sink
    /// to drain.
    ///
    /// # Errors
    ///
    /// Only engine failures end the run with an error; failed items are
    /// reported in [`RunReport::errors`].
    #[instrument(skip(self, items))]
    pub async fn run<I>(self, items: I) -> Result<RunReport<DataType, ErrorType>, FlowError>
    where
        I: IntoIterator<Item = DataType>,
    {
        let mut running = self.start()?;
        feed(&mut running, items).await;
        running.wait().await
    }

    /// Like [`run`](Self::run), but cancels the run when `shutdown` fires.
    ///
    /// A cancelled run is not an error: the report's outcome is
    /// [`RunOutcome::Cancelled`](super::report::RunOutcome::Cancelled).
    ///
    /// # Errors
    ///
    /// Only engine failures end the run with an error.
    #[instrument(skip(self, items, shutdown))]
    pub async fn run_until<I>(
        self,
        items: I,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<RunReport<DataType, ErrorType>, FlowError>
    where
        I: IntoIterator<Item = DataType>,
    {
        let mut running = self.start()?;
        let cancel = running.cancel_handle();
        let watcher = tokio::spawn(async move {
            match shutdown.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    warn!("Received shutdown signal");
                    cancel.cancel();
                }
                Err(broadcast::error::RecvError::Closed) => {}
            }
        });

        feed(&mut running, items).await;
        let report = running.wait().await;
        watcher.abort();
        report
    }
}

async fn feed<DataType, ErrorType, I>(running: &mut RunningPipeline<DataType, ErrorType>, items: I)
where
    DataType: Send + 'static,
    ErrorType: Send + 'static,
    I: IntoIterator<Item = DataType>,
{
    for item in items {
        if let Err(e) = running.submit(item).await {
            // The reason surfaces from `wait`
            debug!("Stopped submitting: {}", e);
            break;
        }
    }
    running.complete();
}

impl<DataType, ErrorType> Default for Pipeline<DataType, ErrorType>
where
    DataType: Clone + Send + Sync + 'static,
    ErrorType: Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
