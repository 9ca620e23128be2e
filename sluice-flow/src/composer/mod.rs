mod isolation;
pub mod pipeline;
pub mod report;
mod running;
mod worker;

pub use self::pipeline::Pipeline;
pub use self::running::{CancelHandle, RunningPipeline};
