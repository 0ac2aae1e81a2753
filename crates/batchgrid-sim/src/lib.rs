//! batchgrid-sim — in-process stand-ins for the scheduler's collaborators.
//!
//! Lets the scheduler run end to end without remote workers:
//!
//! ```text
//! SimExecutor ──spawn──▶ task per operation
//!                          ├── sleep until planned end
//!                          ├── apply stage effect to SimTarget (via SimModel)
//!                          └── send Completion on the shared channel
//! ```

pub mod executor;
pub mod model;
pub mod nodes;
pub mod target;

pub use executor::SimExecutor;
pub use model::SimModel;
pub use nodes::StaticNodes;
pub use target::SimTarget;
