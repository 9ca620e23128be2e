use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::report::{ErrorRecord, RunOutcome, RunReport, StageSummary};
use crate::error::FlowError;
use crate::flow::stage::StageState;

type StageResult = (usize, Result<StageSummary, FlowError>);

/// Cancels the run it was taken from. Cheap to clone and safe to keep after
/// the run finished.
#[derive(Clone)]
pub struct CancelHandle {
    pub(crate) flag: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.flag.send_replace(true) {
            warn!("Pipeline cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }
}

/// A pipeline whose stages are running.
///
/// Items are fed with [`submit`](Self::submit); [`complete`](Self::complete)
/// tells the first stage no more items will come, and [`wait`](Self::wait)
/// resolves once the sink has drained. Dropping a running pipeline aborts
/// every stage.
pub struct RunningPipeline<DataType, ErrorType> {
    pub(crate) input: Option<flume::Sender<DataType>>,
    pub(crate) cancel: CancelHandle,
    pub(crate) tasks: JoinSet<StageResult>,
    pub(crate) states: Vec<(String, watch::Receiver<StageState>)>,
    pub(crate) records: flume::Receiver<ErrorRecord<DataType, ErrorType>>,
    pub(crate) submitted: usize,
}

impl<DataType, ErrorType> RunningPipeline<DataType, ErrorType>
where
    DataType: Send + 'static,
    ErrorType: Send + 'static,
{
    /// Hands an item to the first stage, suspending while its queue is full.
    ///
    /// # Errors
    ///
    /// * [`FlowError::Cancelled`] once the run has been cancelled
    /// * [`FlowError::Closed`] after [`complete`](Self::complete), or when the
    ///   first stage stopped on an engine failure (reported by `wait`)
    pub async fn submit(&mut self, item: DataType) -> Result<(), FlowError> {
        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        let input = self.input.as_ref().ok_or(FlowError::Closed)?;
        if input.send_async(item).await.is_err() {
            return Err(if self.cancel.is_cancelled() {
                FlowError::Cancelled
            } else {
                FlowError::Closed
            });
        }
        self.submitted += 1;
        Ok(())
    }

    /// Signals that no more items will be submitted.
    pub fn complete(&mut self) {
        if self.input.take().is_some() {
            debug!(submitted = self.submitted, "Submission complete");
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Current state of every stage, in pipeline order.
    pub fn states(&self) -> Vec<(String, StageState)> {
        self.states
            .iter()
            .map(|(name, state)| (name.clone(), *state.borrow()))
            .collect()
    }

    /// Completes submission and waits for every stage to finish.
    ///
    /// # Errors
    ///
    /// Returns the first engine failure of any stage. The remaining stages are
    /// cancelled and aborted before this returns.
    pub async fn wait(mut self) -> Result<RunReport<DataType, ErrorType>, FlowError> {
        self.complete();

        let mut summaries: Vec<Option<StageSummary>> = vec![None; self.states.len()];
        while let Some(joined) = self.tasks.join_next().await {
            let (index, result) = joined.map_err(|_| FlowError::invariant(
                "pipeline",
                "stage task ended without reporting",
            ))?;
            match result {
                Ok(summary) => summaries[index] = Some(summary),
                Err(e) => {
                    error!("Pipeline failed: {}", e);
                    self.cancel.cancel();
                    return Err(e);
                }
            }
        }

        let stages = summaries
            .into_iter()
            .enumerate()
            .map(|(index, summary)| {
                summary.ok_or_else(|| {
                    FlowError::invariant(
                        &self.states[index].0,
                        "stage finished without a summary",
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let outcome = if stages
            .iter()
            .any(|summary| summary.state == StageState::Cancelled)
        {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Completed
        };
        let (delivered, finalized) = stages
            .last()
            .map_or((0, 0), |sink| (sink.received, sink.finalized));
        let errors: Vec<_> = self.records.try_iter().collect();

        info!(
            ?outcome,
            submitted = self.submitted,
            delivered,
            failures = errors.len(),
            "Pipeline finished"
        );

        Ok(RunReport {
            outcome,
            submitted: self.submitted,
            delivered,
            finalized,
            errors,
            stages,
        })
    }
}
