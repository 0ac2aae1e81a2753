//! Scheduler error types.
//!
//! Every variant is fatal to the run. Recoverable conditions (a greed
//! candidate that does not fit, a desync) are logged and counted instead.

use batch_core::{Stage, SubmitError};
use batchgrid_planner::PlanError;
use batchgrid_pool::PoolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(
        "capacity exhausted reserving {amount:.2} for {stage} of batch {batch_id}; \
         pool accounting diverged from the plan"
    )]
    CapacityExhausted {
        stage: Stage,
        batch_id: u64,
        amount: f64,
    },

    #[error("failed to submit {stage} of batch {batch_id} ({threads} threads on {node}): {source}")]
    Submission {
        stage: Stage,
        batch_id: u64,
        node: String,
        threads: u32,
        #[source]
        source: SubmitError,
    },

    #[error("{stage} operation {op_id} of batch {batch_id} would end before its queue tail")]
    OutOfOrder {
        stage: Stage,
        op_id: u64,
        batch_id: u64,
    },

    #[error("capacity release failed: {0}")]
    Pool(#[from] PoolError),

    #[error("{stage} operation {op_id} of batch {batch_id} on {node} lost (due at {planned_end:.1}ms)")]
    OperationLost {
        stage: Stage,
        op_id: u64,
        batch_id: u64,
        node: String,
        planned_end: f64,
    },

    #[error("completion channel closed with operations in flight")]
    ChannelClosed,

    #[error("completion for {stage} on {node} (cost {cost:.2}) matches no in-flight operation")]
    UnknownCompletion { stage: Stage, node: String, cost: f64 },

    #[error("no feasible batch plan: {0}")]
    Infeasible(#[from] PlanError),

    #[error("target not at baseline after {rounds} prep rounds (level {level:.2}, instability {instability:.4})")]
    PrepStalled {
        rounds: u32,
        level: f64,
        instability: f64,
    },

    #[error("not enough capacity for a single {stage} thread ({needed:.2} needed, largest node {largest:.2})")]
    InsufficientCapacity {
        stage: Stage,
        needed: f64,
        largest: f64,
    },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
