use super::component::FlowComponent;
use super::types::FlowFuture;

/// The terminal operation of a pipeline. Consumes each item for its side effect.
pub trait Sink: FlowComponent<Output = ()> {
    fn sink(&self, input: Self::Input) -> FlowFuture<'_, (), Self::Error>;
}
