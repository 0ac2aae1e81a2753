//! Planner error types.

use batch_core::Stage;
use thiserror::Error;

/// Why no batch plan could be produced.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no greed value in {min_greed}..={max_greed} removes any level")]
    NothingToDrain { min_greed: f64, max_greed: f64 },

    #[error("{stage} cannot reach its goal within {max_threads} threads")]
    Unreachable { stage: Stage, max_threads: u32 },

    #[error(
        "not enough capacity for one batch: needs {needed:.2} across four nodes, \
         pool has {total:.2} free (largest node {largest:.2})"
    )]
    InsufficientCapacity { needed: f64, total: f64, largest: f64 },
}

pub type PlanResult<T> = Result<T, PlanError>;
