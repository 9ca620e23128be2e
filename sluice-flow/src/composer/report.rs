//! What a run leaves behind: failed items and per-stage bookkeeping.

use crate::flow::stage::StageState;

/// A single failed invocation of a stage operation.
#[derive(Debug, Clone)]
pub struct ErrorRecord<DataType, ErrorType> {
    /// Name of the stage that failed
    pub stage: String,
    /// The item as it entered the stage
    pub item: DataType,
    /// What the operation returned
    pub error: ErrorType,
    /// 1-based attempt number; greater than one only under a retry policy
    pub attempt: usize,
}

/// Counters of one stage at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub name: String,
    pub state: StageState,
    /// Items taken from the input queue
    pub received: usize,
    /// Items sent to the next stage
    pub forwarded: usize,
    /// Items consumed successfully by a sink
    pub finalized: usize,
    /// Items whose operation failed after all attempts
    pub failed: usize,
    /// Items removed from the chain
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every stage drained and completed
    Completed,
    /// The run was cancelled before it drained
    Cancelled,
}

/// Result of a pipeline run that did not hit an engine failure.
#[derive(Debug, Clone)]
pub struct RunReport<DataType, ErrorType> {
    pub outcome: RunOutcome,
    /// Items accepted by the first stage
    pub submitted: usize,
    /// Items that reached the sink
    pub delivered: usize,
    /// Items the sink consumed without error
    pub finalized: usize,
    /// Every failed invocation, in the order they were observed
    pub errors: Vec<ErrorRecord<DataType, ErrorType>>,
    /// Stage summaries in pipeline order
    pub stages: Vec<StageSummary>,
}

impl<DataType, ErrorType> RunReport<DataType, ErrorType> {
    /// True when the run completed and no invocation failed.
    pub fn is_clean(&self) -> bool {
        self.outcome == RunOutcome::Completed && self.errors.is_empty()
    }

    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|summary| summary.name == name)
    }
}
