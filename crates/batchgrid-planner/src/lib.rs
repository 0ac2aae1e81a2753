//! batchgrid-planner — sizes batches and picks the greed that maximises
//! throughput under the current pool.
//!
//! # Planning Algorithm
//!
//! ```text
//! for greed in min_greed..=max_greed step greed_step:
//!     drain       = most threads removing <= greed * baseline_level
//!     stabilize_a = fewest threads cancelling drain's instability
//!     build       = fewest threads restoring level to baseline
//!     stabilize_b = fewest threads cancelling build's instability
//!     batches     = how many whole batches a pool snapshot can hold
//!     throughput  = drained * batches / (longest duration + 2 * spacer)
//! keep the first candidate with the highest throughput
//! ```
//!
//! Thread counts come from inverting the injected forward formulas by
//! binary search, so the planner never divides by a formula's output.

pub mod error;
pub mod plan;
pub mod planner;

pub use error::{PlanError, PlanResult};
pub use plan::{BatchPlan, BatchShape, correction};
pub use planner::StagePlanner;
