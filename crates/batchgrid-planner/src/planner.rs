//! Stage planner — searches greed for the highest-throughput batch plan.
//!
//! Every candidate is checked against a snapshot of the pool, so planning
//! never touches the live reservation state.

use std::sync::Arc;

use tracing::{debug, info};

use batch_core::config::PlannerConfig;
use batch_core::{StageTable, TargetModel, TargetState};
use batchgrid_pool::ResourcePool;

use crate::error::{PlanError, PlanResult};
use crate::plan::{self, BatchPlan, BatchShape};

/// Computes batch plans from target state and pool capacity.
#[derive(Clone)]
pub struct StagePlanner {
    config: PlannerConfig,
    /// Gap between consecutive stage completions.
    spacer_ms: f64,
    model: Arc<dyn TargetModel>,
}

impl StagePlanner {
    pub fn new(config: PlannerConfig, spacer_ms: f64, model: Arc<dyn TargetModel>) -> Self {
        Self {
            config,
            spacer_ms,
            model,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn model(&self) -> &dyn TargetModel {
        self.model.as_ref()
    }

    /// Threads for one wave that moves `target` back towards baseline.
    pub fn correction(&self, target: &TargetState, tolerance: f64) -> StageTable<u32> {
        plan::correction(
            self.model.as_ref(),
            target,
            tolerance,
            self.config.max_threads,
        )
    }

    /// Search greed over its domain and return the plan with the highest
    /// throughput. The first maximum found wins.
    pub fn plan(&self, target: &TargetState, pool: &ResourcePool) -> PlanResult<BatchPlan> {
        let mut best: Option<BatchPlan> = None;
        let mut last_miss: Option<PlanError> = None;
        let mut candidates = 0u32;

        for greed in self.greed_steps() {
            candidates += 1;
            match self.evaluate(greed, target, pool) {
                Ok(plan) => {
                    if best.as_ref().is_none_or(|b| plan.throughput > b.throughput) {
                        best = Some(plan);
                    }
                }
                Err(miss) => {
                    debug!(greed, reason = %miss, "greed candidate rejected");
                    last_miss = Some(prefer_miss(last_miss, miss));
                }
            }
        }

        match best {
            Some(plan) => {
                info!(
                    greed = plan.greed,
                    batches = plan.max_concurrent_batches,
                    batch_cost = plan.batch_cost,
                    throughput = plan.throughput,
                    candidates,
                    "batch plan selected"
                );
                Ok(plan)
            }
            None => Err(match last_miss {
                Some(PlanError::NothingToDrain { .. }) | None => PlanError::NothingToDrain {
                    min_greed: self.config.min_greed,
                    max_greed: self.config.max_greed,
                },
                Some(other) => other,
            }),
        }
    }

    /// Recompute thread counts and durations at a fixed greed.
    pub fn plan_at_greed(
        &self,
        greed: f64,
        target: &TargetState,
        pool: &ResourcePool,
    ) -> PlanResult<BatchPlan> {
        self.evaluate(greed, target, pool)
    }

    /// Size one batch at `greed` without consulting the pool.
    pub fn shape(&self, greed: f64, target: &TargetState) -> PlanResult<BatchShape> {
        BatchShape::size(
            self.model.as_ref(),
            &target.at_baseline(),
            greed,
            self.config.max_threads,
        )
    }

    /// Score a single greed candidate.
    ///
    /// Threads are sized against the baseline state, since a batch lands on
    /// a prepared target. Durations use the observed state, since that is
    /// what the operations will be launched against.
    fn evaluate(
        &self,
        greed: f64,
        target: &TargetState,
        pool: &ResourcePool,
    ) -> PlanResult<BatchPlan> {
        let shape = self.shape(greed, target)?;
        let costs = shape.costs(&self.config.thread_cost);
        let cost_list = costs.iter().map(|(_, c)| *c).collect::<Vec<_>>();
        let batch_cost: f64 = cost_list.iter().sum();

        let batches = pool.count_fits(&cost_list, self.config.max_batches);
        if batches == 0 {
            return Err(PlanError::InsufficientCapacity {
                needed: batch_cost,
                total: pool.total(),
                largest: pool.largest(),
            });
        }

        let durations = StageTable::from_fn(|stage| self.model.duration(stage, target));
        let longest = durations.iter().map(|(_, d)| *d).fold(0.0, f64::max);
        let critical_path = (longest + 2.0 * self.spacer_ms).max(f64::EPSILON);
        let throughput = shape.drained * f64::from(batches) / critical_path;

        Ok(BatchPlan {
            greed,
            threads: shape.threads,
            durations,
            costs,
            batch_cost,
            pool_cost: batch_cost * f64::from(batches),
            max_concurrent_batches: batches,
            drained: shape.drained,
            throughput,
        })
    }

    /// Greed candidates from `min_greed` up to `max_greed`. A step that is
    /// not positive yields `min_greed` alone.
    fn greed_steps(&self) -> impl Iterator<Item = f64> + use<> {
        let PlannerConfig {
            min_greed,
            max_greed,
            greed_step,
            ..
        } = self.config;
        let count = if greed_step > 0.0 {
            ((max_greed - min_greed) / greed_step + 1e-9).floor().max(0.0) as u32
        } else {
            0
        };
        (0..=count).map(move |k| (min_greed + f64::from(k) * greed_step).min(max_greed))
    }
}

/// Keep the most informative rejection: capacity shortfalls outrank
/// unreachable stages, which outrank empty drains.
fn prefer_miss(previous: Option<PlanError>, next: PlanError) -> PlanError {
    fn rank(e: &PlanError) -> u8 {
        match e {
            PlanError::NothingToDrain { .. } => 0,
            PlanError::Unreachable { .. } => 1,
            PlanError::InsufficientCapacity { .. } => 2,
        }
    }
    match previous {
        Some(prev) if rank(&prev) > rank(&next) => prev,
        Some(PlanError::InsufficientCapacity { needed, total, largest })
            if matches!(next, PlanError::InsufficientCapacity { needed: n, .. } if n > needed) =>
        {
            PlanError::InsufficientCapacity {
                needed,
                total,
                largest,
            }
        }
        _ => next,
    }
}
