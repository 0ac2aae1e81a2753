//! Interfaces to the collaborators the scheduler depends on.
//!
//! The core never executes work or evaluates the target itself. It goes
//! through these traits, which the simulator and any real backend implement.

use thiserror::Error;

use crate::types::{NodeInfo, Operation, Stage, TargetState};

/// Pure growth/decay formulas for the target, parameterised by its state.
///
/// Implementations must be monotone in `threads`: more threads never
/// produce a smaller effect in magnitude.
pub trait TargetModel: Send + Sync {
    /// Change in level after `threads` of `stage` complete against `state`.
    fn level_delta(&self, stage: Stage, threads: u32, state: &TargetState) -> f64;

    /// Change in instability after `threads` of `stage` complete against `state`.
    fn instability_delta(&self, stage: Stage, threads: u32, state: &TargetState) -> f64;

    /// Run time of one `stage` instance launched at `state`, in milliseconds.
    fn duration(&self, stage: Stage, state: &TargetState) -> f64;
}

/// Read-only view of the live target.
pub trait TargetProbe: Send + Sync {
    fn target_id(&self) -> &str;

    fn observe(&self) -> TargetState;
}

/// Pool discovery: enumerates worker nodes and their capacity.
pub trait NodeSource: Send + Sync {
    fn nodes(&self) -> Vec<NodeInfo>;
}

/// Why the executor could not start an operation.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("submission rejected: {0}")]
    Rejected(String),
}

/// Starts operations on worker nodes.
///
/// `submit` acknowledges synchronously and returns the submission latency
/// in milliseconds. The operation's completion arrives later on the
/// completion channel shared with the scheduler, if it wants a report.
pub trait Executor: Send + Sync {
    fn submit(&self, target_id: &str, op: &Operation) -> Result<f64, SubmitError>;
}
