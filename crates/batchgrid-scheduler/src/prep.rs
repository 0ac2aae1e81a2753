//! Prep driver — brings the target back to baseline.
//!
//! No ordering or cutoff concerns here. Each round sizes one wave of
//! StabilizeA, Build and StabilizeB to the observed deficit, reserves what
//! fits, fires it, waits for the wave's single reporting operation, frees
//! the wave and measures again.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use batch_core::config::PrepConfig;
use batch_core::{
    Clock, Completion, Executor, Operation, Stage, StageTable, TargetProbe, TargetState,
};
use batchgrid_planner::StagePlanner;
use batchgrid_pool::ResourcePool;

use crate::error::{SchedulerError, SchedulerResult};
use crate::pipeline::COST_SLACK;

/// Stages a prep wave uses, in completion order.
const WAVE: [Stage; 3] = [Stage::StabilizeA, Stage::Build, Stage::StabilizeB];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrepReport {
    pub rounds: u32,
    pub operations: u64,
    /// Target state when prep finished.
    pub state: TargetState,
}

/// Borrows the scheduler's parts for the duration of one prep.
///
/// Built by [`PipelineScheduler::prepare`](crate::PipelineScheduler::prepare).
pub struct PrepDriver<'a> {
    pub(crate) config: &'a PrepConfig,
    pub(crate) spacer_ms: f64,
    pub(crate) lost_grace_ms: f64,
    pub(crate) planner: &'a StagePlanner,
    pub(crate) pool: &'a mut ResourcePool,
    pub(crate) target: &'a dyn TargetProbe,
    pub(crate) executor: &'a dyn Executor,
    pub(crate) completions: &'a mut mpsc::UnboundedReceiver<Completion>,
    pub(crate) clock: Clock,
    pub(crate) next_op_id: &'a mut u64,
}

impl PrepDriver<'_> {
    pub async fn run(mut self) -> SchedulerResult<PrepReport> {
        let target_id = self.target.target_id().to_string();
        let mut report = PrepReport {
            rounds: 0,
            operations: 0,
            state: self.target.observe(),
        };
        info!(
            target = %target_id,
            deficit = report.state.level_deficit(),
            excess = report.state.instability_excess(),
            "prep starting"
        );

        while !report.state.is_at_baseline(self.config.tolerance) {
            if report.rounds >= self.config.max_rounds {
                return Err(SchedulerError::PrepStalled {
                    rounds: report.rounds,
                    level: report.state.level,
                    instability: report.state.instability,
                });
            }
            report.rounds += 1;

            let wave = self.reserve_wave(&report.state, report.rounds)?;
            report.operations += wave.len() as u64;
            let outcome = self.run_wave(&target_id, &wave).await;
            for op in &wave {
                self.pool.free(op.cost(), &op.node_id)?;
            }
            outcome?;

            report.state = self.target.observe();
            debug!(
                round = report.rounds,
                level = report.state.level,
                instability = report.state.instability,
                "prep round finished"
            );
        }

        info!(rounds = report.rounds, operations = report.operations, "target at baseline");
        Ok(report)
    }

    /// Size and reserve one wave. The batch id of a prep operation is its
    /// round number.
    fn reserve_wave(&mut self, state: &TargetState, round: u32) -> SchedulerResult<Vec<Operation>> {
        let unit_cost = self.planner.config().thread_cost;
        let mut threads = self.planner.correction(state, self.config.tolerance);
        self.fit_to_pool(&mut threads, &unit_cost);

        let model = self.planner.model();
        let durations = StageTable::from_fn(|stage| model.duration(stage, state));
        let longest = WAVE
            .iter()
            .filter(|stage| threads[**stage] > 0)
            .map(|stage| durations[*stage])
            .fold(0.0, f64::max);
        let first_end = self.clock.now_ms() + longest + self.spacer_ms;

        let mut wave = Vec::new();
        for (offset, stage) in WAVE.into_iter().enumerate() {
            if threads[stage] == 0 {
                continue;
            }
            for (node_id, granted) in self.pool.reserve_split(unit_cost[stage], threads[stage]) {
                wave.push(Operation {
                    id: *self.next_op_id,
                    stage,
                    node_id,
                    threads: granted,
                    unit_cost: unit_cost[stage],
                    planned_end: first_end + self.spacer_ms * offset as f64,
                    duration: durations[stage],
                    batch_id: u64::from(round),
                    wants_report: false,
                });
                *self.next_op_id += 1;
            }
        }

        let Some(last) = wave.last_mut() else {
            let stage = WAVE
                .into_iter()
                .find(|stage| threads[*stage] > 0)
                .unwrap_or(Stage::StabilizeA);
            return Err(SchedulerError::InsufficientCapacity {
                stage,
                needed: unit_cost[stage],
                largest: self.pool.largest(),
            });
        };
        // The reporter lands after everything else in its wave.
        last.wants_report = true;
        last.planned_end += self.spacer_ms;
        Ok(wave)
    }

    /// Scale build and stabilize B down together when the wave would not
    /// fit in the pool's free capacity. Stages that had work keep at least
    /// one thread.
    fn fit_to_pool(&self, threads: &mut StageTable<u32>, unit_cost: &StageTable<f64>) {
        let cost = |stage: Stage, t: &StageTable<u32>| f64::from(t[stage]) * unit_cost[stage];
        let wanted: f64 = WAVE.iter().map(|s| cost(*s, &*threads)).sum();
        let available = self.pool.total();
        if wanted <= available {
            return;
        }

        let fixed = cost(Stage::StabilizeA, &*threads);
        let flexible = wanted - fixed;
        let share = ((available - fixed) / flexible).clamp(0.0, 1.0);
        for stage in [Stage::Build, Stage::StabilizeB] {
            if threads[stage] > 0 {
                threads[stage] = ((f64::from(threads[stage]) * share).floor() as u32).max(1);
            }
        }
        debug!(wanted, available, share, "prep wave scaled to pool");
    }

    /// Submit the wave and wait for its reporting operation.
    async fn run_wave(&mut self, target_id: &str, wave: &[Operation]) -> SchedulerResult<()> {
        let mut slip = 0.0f64;
        for op in wave {
            let latency = self
                .executor
                .submit(target_id, op)
                .map_err(|source| SchedulerError::Submission {
                    stage: op.stage,
                    batch_id: op.batch_id,
                    node: op.node_id.clone(),
                    threads: op.threads,
                    source,
                })?;
            slip = slip.max(latency);
            debug!(
                op = op.id,
                stage = %op.stage,
                node = %op.node_id,
                threads = op.threads,
                planned_end = op.planned_end,
                "prep operation dispatched"
            );
        }

        let Some(reporter) = wave.iter().find(|op| op.wants_report) else {
            return Ok(());
        };
        let deadline = self
            .clock
            .instant_at(reporter.planned_end + slip + self.lost_grace_ms);

        match tokio::time::timeout_at(deadline, self.completions.recv()).await {
            Ok(Some(done))
                if done.stage == reporter.stage
                    && done.node_id == reporter.node_id
                    && (done.cost - reporter.cost()).abs() <= COST_SLACK =>
            {
                Ok(())
            }
            Ok(Some(done)) => Err(SchedulerError::UnknownCompletion {
                stage: done.stage,
                node: done.node_id,
                cost: done.cost,
            }),
            Ok(None) => Err(SchedulerError::ChannelClosed),
            Err(_) => Err(SchedulerError::OperationLost {
                stage: reporter.stage,
                op_id: reporter.id,
                batch_id: reporter.batch_id,
                node: reporter.node_id.clone(),
                planned_end: reporter.planned_end,
            }),
        }
    }
}
