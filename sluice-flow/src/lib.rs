//! Sluice Flow
//!
//! A staged pipeline engine: items submitted to the first stage flow through an
//! ordered chain of async transform stages into a terminal sink. Every stage
//! bounds its own parallelism, owns its input queue, and absorbs per-item
//! failures so one bad item never stops the run.

pub mod composer;
pub mod error;
pub mod flow;

// Re-export main types for easier access
pub use composer::report::{ErrorRecord, RunOutcome, RunReport, StageSummary};
pub use composer::{CancelHandle, Pipeline, RunningPipeline};
pub use error::FlowError;
pub use flow::component::FlowComponent;
pub use flow::item::{Marked, Marker, WorkItem};
pub use flow::options::{FailurePolicy, QueueCapacity, StageOptions};
pub use flow::processor::Processor;
pub use flow::sink::Sink;
pub use flow::stage::StageState;
pub use flow::types::{BoxedProcessor, BoxedSink, ErrorReporter, FlowFuture};
