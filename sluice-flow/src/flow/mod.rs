pub mod component;
pub mod item;
pub mod options;
pub mod processor;
pub mod sink;
pub mod stage;
pub mod types;
