use thiserror::Error;

/// Engine-level failures of a pipeline run.
///
/// Failures of individual items never show up here: they are absorbed by the
/// stage that observed them and surface as [`ErrorRecord`](crate::ErrorRecord)s
/// in the run report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// The pipeline has no first stage to submit items to
    #[error("Flow error: No prepare stage configured")]
    NoPrepare,

    /// The pipeline has no terminal stage
    #[error("Flow error: No sink configured")]
    NoSink,

    /// The engine's own bookkeeping went wrong; the run is aborted
    #[error("Invariant violation in stage '{stage}': {detail}")]
    InvariantViolation {
        /// Stage that detected the violation
        stage: String,
        /// What was observed
        detail: String,
    },

    /// A stage operation panicked instead of returning an error
    #[error("Stage '{stage}' panicked while processing an item")]
    StagePanicked {
        /// Stage whose operation panicked
        stage: String,
    },

    /// The run was cancelled before the item could be accepted
    #[error("Flow error: Pipeline was cancelled")]
    Cancelled,

    /// Completion was already signalled, no more items are accepted
    #[error("Flow error: Pipeline no longer accepts items")]
    Closed,
}

impl FlowError {
    pub(crate) fn invariant(stage: &str, detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            stage: stage.to_string(),
            detail: detail.into(),
        }
    }
}
