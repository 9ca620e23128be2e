use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::processor::Processor;
use super::sink::Sink;
use crate::composer::report::ErrorRecord;

// For every stage operation
pub type FlowFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Callback invoked for every failed invocation. Runs on the worker that saw
/// the failure, so it must be quick and must not panic.
pub type ErrorReporter<DataType, ErrorType> =
    Arc<dyn Fn(&ErrorRecord<DataType, ErrorType>) + Send + Sync>;

pub type BoxedProcessor<DataType, ErrorType> =
    Box<dyn Processor<Input = DataType, Output = DataType, Error = ErrorType> + Send + Sync>;

pub type BoxedSink<DataType, ErrorType> =
    Box<dyn Sink<Input = DataType, Output = (), Error = ErrorType> + Send + Sync>;

pub(crate) type SharedProcessor<DataType, ErrorType> =
    Arc<dyn Processor<Input = DataType, Output = DataType, Error = ErrorType> + Send + Sync>;

pub(crate) type SharedSink<DataType, ErrorType> =
    Arc<dyn Sink<Input = DataType, Output = (), Error = ErrorType> + Send + Sync>;
