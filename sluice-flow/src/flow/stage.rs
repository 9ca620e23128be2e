use std::fmt;
use std::sync::Arc;

use super::options::StageOptions;
use super::types::{SharedProcessor, SharedSink};

/// Lifecycle of a stage within one run.
///
/// ```text
/// Open ──upstream done──▶ Draining ──in-flight empty──▶ Completed
///   │                        │
///   └────────┬───────────────┘
///            ├──cancel──▶ Cancelled
///            └──engine fault──▶ Faulted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Accepting items from upstream
    Open,
    /// Upstream finished; processing what is queued or in flight
    Draining,
    /// Everything forwarded and completion signalled downstream
    Completed,
    /// Stopped by cancellation without waiting for in-flight work
    Cancelled,
    /// Stopped by an engine failure
    Faulted,
}

impl StageState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Faulted)
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Draining)
                | (Self::Draining, Self::Completed)
                | (Self::Open | Self::Draining, Self::Cancelled)
                | (Self::Open | Self::Draining, Self::Faulted)
        )
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Draining => "draining",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

pub(crate) enum Operation<DataType, ErrorType> {
    Process(SharedProcessor<DataType, ErrorType>),
    Sink(SharedSink<DataType, ErrorType>),
}

impl<DataType, ErrorType> Clone for Operation<DataType, ErrorType> {
    fn clone(&self) -> Self {
        match self {
            Self::Process(processor) => Self::Process(Arc::clone(processor)),
            Self::Sink(sink) => Self::Sink(Arc::clone(sink)),
        }
    }
}

/// A stage as configured on the builder, before the run wires it up.
pub(crate) struct StageSpec<DataType, ErrorType> {
    pub(crate) name: Arc<str>,
    pub(crate) operation: Operation<DataType, ErrorType>,
    pub(crate) options: Option<StageOptions>,
}
