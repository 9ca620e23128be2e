//! Transform stages built from async functions

use futures::FutureExt;
use sluice_flow::{FlowComponent, FlowFuture, Processor};
use std::future::Future;
use std::marker::PhantomData;

/// A transform stage that runs an async function on every item
pub struct FnProcessor<T, E, F, Fut> {
    name: String,
    operation: F,
    _phantom: PhantomData<fn(T) -> (Fut, E)>,
}

impl<T, E, F, Fut> FnProcessor<T, E, F, Fut>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    /// Creates a stage named `name` that runs `operation` on each item
    #[must_use]
    pub fn new(name: impl Into<String>, operation: F) -> Self {
        Self {
            name: name.into(),
            operation,
            _phantom: PhantomData,
        }
    }
}

impl<T, E, F, Fut> FlowComponent for FnProcessor<T, E, F, Fut>
where
    E: std::error::Error + Send + Sync + 'static,
{
    type Input = T;
    type Output = T;
    type Error = E;

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T, E, F, Fut> Processor for FnProcessor<T, E, F, Fut>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    fn process(&self, input: Self::Input) -> FlowFuture<'_, Self::Output, Self::Error> {
        (self.operation)(input).boxed()
    }
}
