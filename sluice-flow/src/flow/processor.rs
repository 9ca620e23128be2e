use super::component::FlowComponent;
use super::types::FlowFuture;

/// A transform stage operation.
///
/// Deciding whether an item needs this stage at all is up to the processor:
/// an item that does not apply is returned unchanged.
pub trait Processor: FlowComponent {
    fn process(&self, input: Self::Input) -> FlowFuture<'_, Self::Output, Self::Error>;
}
