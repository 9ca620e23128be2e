//! Marker gates for transform stages

use sluice_flow::{FlowComponent, FlowFuture, Marked, Marker, Processor};
use tracing::debug;

/// Runs the wrapped processor only for items carrying `marker`.
///
/// Items without the marker are passed through untouched: the inner
/// processor is not called, so it has no side effects for them.
pub struct MarkerGate<P> {
    marker: Marker,
    inner: P,
}

impl<P> MarkerGate<P> {
    /// Gates `inner` behind `marker`
    #[must_use]
    pub const fn new(marker: Marker, inner: P) -> Self {
        Self { marker, inner }
    }

    /// The marker an item needs for the inner processor to run
    pub const fn marker(&self) -> Marker {
        self.marker
    }
}

impl<P> FlowComponent for MarkerGate<P>
where
    P: FlowComponent,
{
    type Input = P::Input;
    type Output = P::Output;
    type Error = P::Error;

    fn name(&self) -> &str {
        self.inner.name()
    }
}

impl<P, T> Processor for MarkerGate<P>
where
    P: Processor<Input = T, Output = T>,
    T: Marked + Send + 'static,
{
    fn process(&self, input: Self::Input) -> FlowFuture<'_, Self::Output, Self::Error> {
        if input.has_marker(self.marker) {
            self.inner.process(input)
        } else {
            debug!(stage = self.inner.name(), marker = %self.marker, "Skipping item");
            Box::pin(async move { Ok(input) })
        }
    }
}
