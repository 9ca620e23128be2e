use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::isolation::Isolation;
use super::report::StageSummary;
use crate::error::FlowError;
use crate::flow::options::StageOptions;
use crate::flow::stage::{Operation, StageState};

#[derive(Default)]
struct Counters {
    received: AtomicUsize,
    forwarded: AtomicUsize,
    finalized: AtomicUsize,
    failed: AtomicUsize,
    dropped: AtomicUsize,
    in_flight: AtomicUsize,
}

/// Everything a stage task needs besides its queues.
pub(crate) struct StageContext<DataType, ErrorType> {
    pub(crate) name: Arc<str>,
    pub(crate) operation: Operation<DataType, ErrorType>,
    pub(crate) options: StageOptions,
    pub(crate) isolation: Arc<Isolation<DataType, ErrorType>>,
    pub(crate) state: watch::Sender<StageState>,
    pub(crate) cancel: watch::Receiver<bool>,
}

/// Drives one stage: pulls from the input queue, fans out up to
/// `max_parallel` invocations, and fans results into the output queue.
///
/// The input queue disconnecting is the upstream completion signal. Dropping
/// the output sender once everything in flight has finished is this stage's
/// completion signal to its single downstream link.
pub(crate) struct StageWorker<DataType, ErrorType> {
    context: StageContext<DataType, ErrorType>,
    input: flume::Receiver<DataType>,
    output: Option<flume::Sender<DataType>>,
    counters: Arc<Counters>,
}

impl<DataType, ErrorType> StageWorker<DataType, ErrorType>
where
    DataType: Clone + Send + Sync + 'static,
    ErrorType: std::error::Error + Send + Sync + 'static,
{
    pub(crate) fn new(
        context: StageContext<DataType, ErrorType>,
        input: flume::Receiver<DataType>,
        output: Option<flume::Sender<DataType>>,
    ) -> Self {
        Self {
            context,
            input,
            output,
            counters: Arc::new(Counters::default()),
        }
    }

    pub(crate) async fn run(mut self) -> Result<StageSummary, FlowError> {
        let mut tasks = JoinSet::new();
        match self.drive(&mut tasks).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                tasks.abort_all();
                self.context.state.send_replace(StageState::Faulted);
                error!(stage = %self.context.name, "Stage faulted: {}", e);
                Err(e)
            }
        }
    }

    async fn drive(&mut self, tasks: &mut JoinSet<()>) -> Result<StageSummary, FlowError> {
        let semaphore = Arc::new(Semaphore::new(self.context.options.max_parallel));
        let mut cancel = self.context.cancel.clone();
        debug!(
            stage = %self.context.name,
            max_parallel = self.context.options.max_parallel,
            "Stage open"
        );

        loop {
            tokio::select! {
                biased;
                () = cancelled(&mut cancel) => return self.cancel(tasks),
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => self.check(joined)?,
                next = next_item(&semaphore, &self.input) => match next {
                    Some((permit, item)) => self.dispatch(tasks, permit, item)?,
                    None => break,
                },
            }
        }

        self.transition(StageState::Draining)?;

        loop {
            tokio::select! {
                biased;
                () = cancelled(&mut cancel) => return self.cancel(tasks),
                joined = tasks.join_next() => match joined {
                    Some(joined) => self.check(joined)?,
                    None => break,
                },
            }
        }

        self.complete()
    }

    fn dispatch(
        &self,
        tasks: &mut JoinSet<()>,
        permit: OwnedSemaphorePermit,
        item: DataType,
    ) -> Result<(), FlowError> {
        self.counters.received.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        if in_flight > self.context.options.max_parallel {
            return Err(FlowError::invariant(
                &self.context.name,
                format!(
                    "{in_flight} invocations in flight, limit is {}",
                    self.context.options.max_parallel
                ),
            ));
        }

        let invocation = Invocation {
            name: Arc::clone(&self.context.name),
            operation: self.context.operation.clone(),
            isolation: Arc::clone(&self.context.isolation),
            output: self.output.clone(),
            forward_failures: self.context.options.on_error.forwards_failures(),
            counters: Arc::clone(&self.counters),
        };
        tasks.spawn(invocation.run(item, permit));
        Ok(())
    }

    fn check(&self, joined: Result<(), JoinError>) -> Result<(), FlowError> {
        match joined {
            Ok(()) => Ok(()),
            Err(e) if e.is_panic() => Err(FlowError::StagePanicked {
                stage: self.context.name.to_string(),
            }),
            Err(_) => Ok(()),
        }
    }

    fn complete(&mut self) -> Result<StageSummary, FlowError> {
        let received = self.counters.received.load(Ordering::SeqCst);
        let accounted = self.counters.forwarded.load(Ordering::SeqCst)
            + self.counters.finalized.load(Ordering::SeqCst)
            + self.counters.dropped.load(Ordering::SeqCst);
        if received != accounted {
            return Err(FlowError::invariant(
                &self.context.name,
                format!("received {received} items but accounted for {accounted}"),
            ));
        }

        // Last sender clone held by this stage; downstream starts draining.
        self.output = None;
        self.transition(StageState::Completed)?;
        Ok(self.summary(StageState::Completed))
    }

    fn cancel(&self, tasks: &mut JoinSet<()>) -> Result<StageSummary, FlowError> {
        tasks.abort_all();
        self.transition(StageState::Cancelled)?;
        warn!(
            stage = %self.context.name,
            in_flight = self.counters.in_flight.load(Ordering::SeqCst),
            "Stage cancelled"
        );
        Ok(self.summary(StageState::Cancelled))
    }

    fn transition(&self, next: StageState) -> Result<(), FlowError> {
        let current = *self.context.state.borrow();
        if !current.can_transition_to(next) {
            return Err(FlowError::invariant(
                &self.context.name,
                format!("illegal transition from {current} to {next}"),
            ));
        }
        self.context.state.send_replace(next);
        info!(stage = %self.context.name, from = %current, to = %next, "Stage transition");
        Ok(())
    }

    fn summary(&self, state: StageState) -> StageSummary {
        StageSummary {
            name: self.context.name.to_string(),
            state,
            received: self.counters.received.load(Ordering::SeqCst),
            forwarded: self.counters.forwarded.load(Ordering::SeqCst),
            finalized: self.counters.finalized.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
        }
    }
}

/// One item's trip through a stage operation.
struct Invocation<DataType, ErrorType> {
    name: Arc<str>,
    operation: Operation<DataType, ErrorType>,
    isolation: Arc<Isolation<DataType, ErrorType>>,
    output: Option<flume::Sender<DataType>>,
    forward_failures: bool,
    counters: Arc<Counters>,
}

impl<DataType, ErrorType> Invocation<DataType, ErrorType>
where
    DataType: Clone + Send + Sync + 'static,
    ErrorType: std::error::Error + Send + Sync + 'static,
{
    async fn run(self, item: DataType, permit: OwnedSemaphorePermit) {
        let outcome = match &self.operation {
            Operation::Process(processor) => self
                .isolation
                .call(item, |input| processor.process(input))
                .await
                .map(Some),
            Operation::Sink(sink) => self
                .isolation
                .call(item, |input| sink.sink(input))
                .await
                .map(|()| None),
        };

        match outcome {
            Ok(Some(output)) => self.forward(output).await,
            Ok(None) => {
                self.counters.finalized.fetch_add(1, Ordering::SeqCst);
            }
            Err(original) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                if self.forward_failures {
                    self.forward(original).await;
                } else {
                    debug!(stage = %self.name, "Dropping failed item");
                    self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
    }

    async fn forward(&self, item: DataType) {
        let Some(output) = &self.output else {
            // Sink: nothing downstream to forward to
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
            return;
        };
        if output.send_async(item).await.is_ok() {
            self.counters.forwarded.fetch_add(1, Ordering::SeqCst);
        } else {
            debug!(stage = %self.name, "Downstream stage gone, dropping item");
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Waits for a permit, then for the next item. `None` once upstream has
/// completed and the queue is empty.
async fn next_item<DataType>(
    semaphore: &Arc<Semaphore>,
    input: &flume::Receiver<DataType>,
) -> Option<(OwnedSemaphorePermit, DataType)> {
    // The semaphore is never closed.
    let permit = Arc::clone(semaphore).acquire_owned().await.ok()?;
    let item = input.recv_async().await.ok()?;
    Some((permit, item))
}

/// Resolves once the run is cancelled. Never resolves if the cancel flag's
/// owner is gone without cancelling.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}
