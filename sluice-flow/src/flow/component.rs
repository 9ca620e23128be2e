use std::error::Error;

/// Shape shared by every component that can be placed in a pipeline.
pub trait FlowComponent {
    type Input;
    type Output;
    type Error: Error + Send + Sync + 'static;

    /// Name used in stage logs and error records.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
