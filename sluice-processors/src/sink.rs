//! Sinks built from async functions

use futures::FutureExt;
use sluice_flow::{FlowComponent, FlowFuture, Sink};
use std::future::Future;
use std::marker::PhantomData;

/// A sink that runs an async function on every item that reaches it
pub struct FnSink<T, E, F, Fut> {
    name: String,
    operation: F,
    _phantom: PhantomData<fn(T) -> (Fut, E)>,
}

impl<T, E, F, Fut> FnSink<T, E, F, Fut>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    /// Creates a sink named `name` that runs `operation` on each item
    #[must_use]
    pub fn new(name: impl Into<String>, operation: F) -> Self {
        Self {
            name: name.into(),
            operation,
            _phantom: PhantomData,
        }
    }
}

impl<T, E, F, Fut> FlowComponent for FnSink<T, E, F, Fut>
where
    E: std::error::Error + Send + Sync + 'static,
{
    type Input = T;
    type Output = ();
    type Error = E;

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T, E, F, Fut> Sink for FnSink<T, E, F, Fut>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    fn sink(&self, input: Self::Input) -> FlowFuture<'_, (), Self::Error> {
        (self.operation)(input).boxed()
    }
}
