//! Sluice Processors
//!
//! Ready-made stage and sink components for sluice pipelines: closure
//! adapters for async functions, and a marker gate that limits a stage to the
//! items that ask for it.

#![warn(missing_docs)]

pub mod gate;
pub mod sink;
pub mod transform;

pub use gate::MarkerGate;
pub use sink::FnSink;
pub use transform::FnProcessor;
