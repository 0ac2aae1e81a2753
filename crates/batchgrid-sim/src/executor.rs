//! Executor that runs each operation as a tokio task.
//!
//! A submitted operation sleeps until its end time, applies its stage
//! effect to the [`SimTarget`], then reports on the completion channel if
//! it asked to. An operation submitted after its planned start ends late by
//! the same amount, and that slip is returned as the submission latency.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use batch_core::{Clock, Completion, Executor, Operation, SubmitError, TargetModel};

use crate::target::SimTarget;

pub struct SimExecutor {
    model: Arc<dyn TargetModel>,
    target: SimTarget,
    clock: Clock,
    completions: mpsc::UnboundedSender<Completion>,
    /// Simulated time spent starting an operation.
    overhead_ms: f64,
    submitted: AtomicU64,
}

impl SimExecutor {
    pub fn new(
        model: Arc<dyn TargetModel>,
        target: SimTarget,
        clock: Clock,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            model,
            target,
            clock,
            completions,
            overhead_ms: 0.0,
            submitted: AtomicU64::new(0),
        }
    }

    pub fn with_overhead(mut self, overhead_ms: f64) -> Self {
        self.overhead_ms = overhead_ms.max(0.0);
        self
    }

    /// Number of operations accepted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

impl Executor for SimExecutor {
    fn submit(&self, target_id: &str, op: &Operation) -> Result<f64, SubmitError> {
        if target_id != self.target.id() {
            return Err(SubmitError::Rejected(format!("unknown target '{target_id}'")));
        }
        if op.threads == 0 {
            return Err(SubmitError::Rejected(format!("operation {} has no threads", op.id)));
        }
        let runtime = Handle::try_current()
            .map_err(|e| SubmitError::NodeUnreachable(format!("{}: {e}", op.node_id)))?;

        let started = self.clock.now_ms() + self.overhead_ms;
        let latency = (started - op.start()).max(0.0);
        let end = op.planned_end + latency;

        let model = Arc::clone(&self.model);
        let target = self.target.clone();
        let clock = self.clock;
        let completions = self.completions.clone();
        let (id, stage, threads, wants_report) = (op.id, op.stage, op.threads, op.wants_report);
        let completion = Completion {
            stage,
            node_id: op.node_id.clone(),
            cost: op.cost(),
        };

        runtime.spawn(async move {
            tokio::time::sleep_until(clock.instant_at(end)).await;
            let state = target.apply(stage, threads, model.as_ref());
            trace!(
                op = id,
                %stage,
                threads,
                level = state.level,
                instability = state.instability,
                "operation finished"
            );
            if wants_report && completions.send(completion).is_err() {
                debug!(op = id, "completion receiver dropped");
            }
        });

        self.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(latency)
    }
}
