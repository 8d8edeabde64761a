pub mod parser;
pub mod queue;
pub mod registry;
pub mod state;
pub mod sweep;

pub use queue::{QueueConfig, ReplacementQueue};
pub use registry::{DestinationRegistry, QueueError};
pub use sweep::StalenessSweeper;
