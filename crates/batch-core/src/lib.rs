//! batch-core — shared types, collaborator traits, and configuration.

pub mod clock;
pub mod collab;
pub mod config;
pub mod types;

pub use clock::Clock;
pub use collab::{Executor, NodeSource, SubmitError, TargetModel, TargetProbe};
pub use config::GridConfig;
pub use types::*;
