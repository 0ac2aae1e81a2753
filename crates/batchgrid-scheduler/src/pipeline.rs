//! Pipeline scheduler — admits batches and dispatches their stages in order.
//!
//! One cooperative loop owns the pool, the four stage queues and the set
//! of in-flight operations:
//!
//! ```text
//! loop:
//!     consume ready completions      (free capacity, check order)
//!     refresh pool, observe target
//!     re-plan at fixed greed, admit batches that fit
//!     dispatch eligible operations   (start <= cutoff)
//!     settle after a wave, or await the next completion
//! ```
//!
//! The cutoff is the planned end of the oldest in-flight StabilizeB, so a
//! newly admitted batch never overtakes an earlier one on the wire.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use batch_core::clock::millis;
use batch_core::config::{PrepConfig, SchedulerConfig};
use batch_core::{
    Clock, Completion, Executor, NodeSource, Operation, Stage, StageTable, TargetProbe,
    TargetState,
};
use batchgrid_planner::{BatchPlan, PlanError, StagePlanner};
use batchgrid_pool::ResourcePool;

use crate::desync::{DesyncDetector, DesyncEvent};
use crate::error::{SchedulerError, SchedulerResult};
use crate::prep::{PrepDriver, PrepReport};
use crate::queues::StageQueues;

/// Slack when matching a completion's cost to an in-flight operation.
pub(crate) const COST_SLACK: f64 = 1e-6;

/// Everything the scheduler talks to besides the pool and planner.
pub struct Collaborators {
    pub target: Arc<dyn TargetProbe>,
    pub nodes: Arc<dyn NodeSource>,
    pub executor: Arc<dyn Executor>,
    /// Receiving end of the channel the executor reports on.
    pub completions: mpsc::UnboundedReceiver<Completion>,
    pub clock: Clock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// Every batch allowed by `max_batches` finished.
    Completed,
    /// Shutdown was requested and admitted batches drained.
    Shutdown,
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub batches_admitted: u64,
    pub batches_completed: u64,
    pub operations_dispatched: u64,
    pub completions: u64,
    pub desyncs: u64,
    pub resyncs: u64,
    pub greed: Option<f64>,
    pub halt_reason: Option<HaltReason>,
}

/// Why the loop woke up while waiting.
enum Wake {
    Completion(Option<Completion>),
    Lost,
    Shutdown { open: bool },
}

pub struct PipelineScheduler {
    config: SchedulerConfig,
    planner: StagePlanner,
    pool: ResourcePool,
    target: Arc<dyn TargetProbe>,
    nodes: Arc<dyn NodeSource>,
    executor: Arc<dyn Executor>,
    completions: mpsc::UnboundedReceiver<Completion>,
    clock: Clock,
    /// Held fixed for the pipeline's lifetime unless recalculated.
    greed: Option<f64>,
    plan: Option<BatchPlan>,
    queues: StageQueues,
    in_flight: StageTable<VecDeque<Operation>>,
    desync: DesyncDetector,
    /// Earliest planned end for the next admitted batch's drain.
    next_end: f64,
    next_op_id: u64,
    next_batch_id: u64,
    summary: RunSummary,
}

impl PipelineScheduler {
    pub fn new(
        config: SchedulerConfig,
        planner: StagePlanner,
        pool: ResourcePool,
        parts: Collaborators,
    ) -> Self {
        let desync = DesyncDetector::new(config.desync_window);
        Self {
            config,
            planner,
            pool,
            target: parts.target,
            nodes: parts.nodes,
            executor: parts.executor,
            completions: parts.completions,
            clock: parts.clock,
            greed: None,
            plan: None,
            queues: StageQueues::new(),
            in_flight: StageTable::from_fn(|_| VecDeque::new()),
            desync,
            next_end: 0.0,
            next_op_id: 1,
            next_batch_id: 1,
            summary: RunSummary::default(),
        }
    }

    pub fn greed(&self) -> Option<f64> {
        self.greed
    }

    /// The plan used for the most recent admission.
    pub fn plan(&self) -> Option<&BatchPlan> {
        self.plan.as_ref()
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn queues(&self) -> &StageQueues {
        &self.queues
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.iter().map(|(_, q)| q.len()).sum()
    }

    pub fn is_desynced(&self) -> bool {
        self.desync.is_desynced()
    }

    /// Search greed again from the current pool and target and hold the
    /// result fixed from now on.
    pub fn recalculate_greed(&mut self) -> SchedulerResult<BatchPlan> {
        self.pool.refresh(self.nodes.as_ref());
        let state = self.target.observe();
        let plan = self.planner.plan(&state, &self.pool)?;
        info!(
            greed = plan.greed,
            previous = ?self.greed,
            batches = plan.max_concurrent_batches,
            "greed recalculated"
        );
        self.greed = Some(plan.greed);
        self.summary.greed = self.greed;
        self.plan = Some(plan.clone());
        Ok(plan)
    }

    /// Bring the target back to baseline before batching starts.
    pub async fn prepare(&mut self, config: &PrepConfig) -> SchedulerResult<PrepReport> {
        self.pool.refresh(self.nodes.as_ref());
        let result = PrepDriver {
            config,
            spacer_ms: self.config.spacer_ms,
            lost_grace_ms: self.config.lost_grace_ms,
            planner: &self.planner,
            pool: &mut self.pool,
            target: self.target.as_ref(),
            executor: self.executor.as_ref(),
            completions: &mut self.completions,
            clock: self.clock,
            next_op_id: &mut self.next_op_id,
        }
        .run()
        .await;
        if let Err(e) = &result {
            error!(error = %e, "prep halted");
        }
        result
    }

    /// Run the pipeline until the batch limit is reached or `shutdown`
    /// flips to true, then drain admitted batches and return.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> SchedulerResult<RunSummary> {
        let result = self.run_loop(shutdown).await;
        match &result {
            Ok(summary) => info!(
                admitted = summary.batches_admitted,
                completed = summary.batches_completed,
                desyncs = summary.desyncs,
                halt = ?summary.halt_reason,
                "pipeline finished"
            ),
            Err(e) => error!(error = %e, "pipeline halted"),
        }
        result
    }

    async fn run_loop(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> SchedulerResult<RunSummary> {
        let target_id = self.target.target_id().to_string();
        info!(
            target = %target_id,
            max_batches = ?self.config.max_batches,
            window = self.config.desync_window,
            "pipeline starting"
        );
        let mut watching = true;
        let mut stopping = false;

        let halt = loop {
            self.consume_ready()?;

            if !stopping && *shutdown.borrow() {
                stopping = true;
                info!(
                    in_flight = self.in_flight_len(),
                    "shutdown requested, draining admitted batches"
                );
            }
            if self.is_idle() {
                if stopping {
                    break HaltReason::Shutdown;
                }
                if self.at_batch_limit() {
                    break HaltReason::Completed;
                }
            }

            if self.pool.refresh(self.nodes.as_ref()) {
                debug!(total = self.pool.total(), nodes = self.pool.len(), "pool changed");
            }
            let state = self.target.observe();

            if !self.desync.is_desynced() {
                if !stopping {
                    self.admit(&state)?;
                }
                if self.dispatch(&target_id)? > 0 {
                    tokio::time::sleep(millis(self.config.settle_ms)).await;
                    continue;
                }
            }

            if self.in_flight_len() == 0 {
                if self.desync.is_desynced() {
                    warn!("nothing in flight to realign with, forcing resync");
                    self.desync.reset();
                    self.resync()?;
                    continue;
                }
                // Nothing queued, nothing running, and no batch fits.
                return Err(self.no_room());
            }

            self.wait(&mut shutdown, &mut watching).await?;
        };

        self.summary.halt_reason = Some(halt);
        Ok(self.summary.clone())
    }

    fn is_idle(&self) -> bool {
        self.queues.is_empty() && self.in_flight_len() == 0
    }

    fn at_batch_limit(&self) -> bool {
        self.config
            .max_batches
            .is_some_and(|max| self.summary.batches_admitted >= max)
    }

    // ── Admission ─────────────────────────────────────────────────

    /// Admit as many batches as the current plan and pool allow.
    fn admit(&mut self, state: &TargetState) -> SchedulerResult<u32> {
        if self.at_batch_limit() {
            return Ok(0);
        }
        let Some(plan) = self.refresh_plan(state)? else {
            return Ok(0);
        };

        let costs = plan.cost_list();
        let mut admitted = 0;
        while admitted < plan.max_concurrent_batches
            && !self.at_batch_limit()
            && self.pool.fits(&costs)
        {
            self.materialise(&plan)?;
            admitted += 1;
        }
        if admitted > 0 {
            debug!(
                admitted,
                greed = plan.greed,
                queued = self.queues.total_len(),
                "batches admitted"
            );
        }
        self.plan = Some(plan);
        Ok(admitted)
    }

    /// Re-plan at the held greed, falling back to a full search when that
    /// greed stops being feasible. `None` means wait for capacity.
    fn refresh_plan(&mut self, state: &TargetState) -> SchedulerResult<Option<BatchPlan>> {
        let busy = !self.is_idle();
        if let Some(greed) = self.greed {
            match self.planner.plan_at_greed(greed, state, &self.pool) {
                Ok(plan) => return Ok(Some(plan)),
                Err(miss) if busy => {
                    debug!(greed, reason = %miss, "no room for another batch yet");
                    return Ok(None);
                }
                Err(miss) => warn!(greed, reason = %miss, "held greed infeasible, searching again"),
            }
        }

        match self.planner.plan(state, &self.pool) {
            Ok(plan) => {
                self.greed = Some(plan.greed);
                self.summary.greed = self.greed;
                Ok(Some(plan))
            }
            Err(miss) if busy => {
                debug!(reason = %miss, "no feasible plan while batches are running");
                Ok(None)
            }
            Err(miss) => Err(miss.into()),
        }
    }

    /// Reserve and queue the four operations of one batch.
    fn materialise(&mut self, plan: &BatchPlan) -> SchedulerResult<()> {
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;

        let spacer = self.config.spacer_ms;
        let now = self.clock.now_ms();
        let base = self.next_end.max(now + plan.longest_duration() + spacer);
        let unit_cost = self.planner.config().thread_cost;

        for (offset, stage) in Stage::ALL.into_iter().enumerate() {
            let amount = plan.costs[stage];
            let node_id = self
                .pool
                .reserve(amount)
                .ok_or(SchedulerError::CapacityExhausted {
                    stage,
                    batch_id,
                    amount,
                })?;
            let op = Operation {
                id: self.next_op_id,
                stage,
                node_id,
                threads: plan.threads[stage],
                unit_cost: unit_cost[stage],
                planned_end: base + spacer * offset as f64,
                duration: plan.durations[stage],
                batch_id,
                wants_report: true,
            };
            self.next_op_id += 1;
            self.queues
                .push(op)
                .map_err(|op| SchedulerError::OutOfOrder {
                    stage,
                    op_id: op.id,
                    batch_id,
                })?;
        }

        self.next_end = base + spacer * Stage::ALL.len() as f64;
        self.summary.batches_admitted += 1;
        debug!(batch = batch_id, drain_end = base, "batch queued");
        Ok(())
    }

    fn no_room(&self) -> SchedulerError {
        SchedulerError::Infeasible(PlanError::InsufficientCapacity {
            needed: self.plan.as_ref().map_or(0.0, |p| p.batch_cost),
            total: self.pool.total(),
            largest: self.pool.largest(),
        })
    }

    // ── Dispatch ──────────────────────────────────────────────────

    /// Planned end of the oldest outstanding StabilizeB, in flight first.
    fn cutoff(&self) -> f64 {
        let last = Stage::last();
        self.in_flight[last]
            .front()
            .or_else(|| self.queues.front(last))
            .map_or(f64::INFINITY, |op| op.planned_end)
    }

    /// Submit every eligible operation, stage by stage, and carry the
    /// accumulated submission latency onto everything still queued.
    fn dispatch(&mut self, target_id: &str) -> SchedulerResult<usize> {
        let cutoff = self.cutoff();
        let mut delay = 0.0;
        let mut dispatched = 0;

        for stage in Stage::ALL {
            while self.queues.front(stage).is_some_and(|op| op.start() <= cutoff) {
                let Some(mut op) = self.queues.pop(stage) else {
                    break;
                };
                op.planned_end += delay;
                let latency = self.executor.submit(target_id, &op).map_err(|source| {
                    SchedulerError::Submission {
                        stage,
                        batch_id: op.batch_id,
                        node: op.node_id.clone(),
                        threads: op.threads,
                        source,
                    }
                })?;
                let latency = if latency.is_finite() { latency.max(0.0) } else { 0.0 };
                op.planned_end += latency;
                delay += latency;
                debug!(
                    op = op.id,
                    batch = op.batch_id,
                    %stage,
                    node = %op.node_id,
                    threads = op.threads,
                    planned_end = op.planned_end,
                    latency,
                    "operation dispatched"
                );
                self.in_flight[stage].push_back(op);
                dispatched += 1;
            }
        }

        if delay > 0.0 {
            self.queues.delay_all(delay);
            self.next_end += delay;
            debug!(delay, "submission latency carried forward");
        }
        self.summary.operations_dispatched += dispatched as u64;
        Ok(dispatched)
    }

    // ── Completions ───────────────────────────────────────────────

    fn consume_ready(&mut self) -> SchedulerResult<()> {
        loop {
            match self.completions.try_recv() {
                Ok(done) => self.complete(done)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) if self.in_flight_len() == 0 => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(SchedulerError::ChannelClosed),
            }
        }
    }

    /// Block until a completion arrives, the oldest operation overruns its
    /// grace period, or shutdown is signalled.
    async fn wait(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        watching: &mut bool,
    ) -> SchedulerResult<()> {
        let deadline = self
            .oldest_in_flight()
            .map(|op| self.clock.instant_at(op.planned_end + self.config.lost_grace_ms));
        let lost = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let wake = tokio::select! {
            msg = self.completions.recv() => Wake::Completion(msg),
            () = lost => Wake::Lost,
            changed = shutdown.changed(), if *watching => Wake::Shutdown { open: changed.is_ok() },
        };

        match wake {
            Wake::Completion(Some(done)) => self.complete(done),
            Wake::Completion(None) => Err(SchedulerError::ChannelClosed),
            Wake::Lost => Err(self.lost()),
            Wake::Shutdown { open } => {
                // A dropped sender can never request shutdown.
                *watching = open;
                Ok(())
            }
        }
    }

    fn oldest_in_flight(&self) -> Option<&Operation> {
        self.in_flight
            .iter()
            .filter_map(|(_, q)| q.front())
            .min_by(|a, b| a.planned_end.total_cmp(&b.planned_end))
    }

    fn lost(&self) -> SchedulerError {
        match self.oldest_in_flight() {
            Some(op) => SchedulerError::OperationLost {
                stage: op.stage,
                op_id: op.id,
                batch_id: op.batch_id,
                node: op.node_id.clone(),
                planned_end: op.planned_end,
            },
            None => SchedulerError::ChannelClosed,
        }
    }

    /// Retire the in-flight operation a completion belongs to.
    ///
    /// Capacity is released for every completion, including those that
    /// arrive while the pipeline is desynced.
    fn complete(&mut self, done: Completion) -> SchedulerResult<()> {
        let flight = &mut self.in_flight[done.stage];
        let position = flight.iter().position(|op| {
            op.node_id == done.node_id && (op.cost() - done.cost).abs() <= COST_SLACK
        });
        let Some(op) = position.and_then(|pos| flight.remove(pos)) else {
            return Err(SchedulerError::UnknownCompletion {
                stage: done.stage,
                node: done.node_id,
                cost: done.cost,
            });
        };

        self.pool.free(op.cost(), &op.node_id)?;
        self.summary.completions += 1;
        if op.stage == Stage::last() {
            self.summary.batches_completed += 1;
        }
        debug!(
            op = op.id,
            batch = op.batch_id,
            stage = %op.stage,
            node = %op.node_id,
            "operation completed"
        );

        match self.desync.record(op.stage) {
            DesyncEvent::Raised => {
                self.summary.desyncs += 1;
                warn!(
                    stage = %op.stage,
                    batch = op.batch_id,
                    window = ?self.desync.window().collect::<Vec<_>>(),
                    "completions out of order, pausing dispatch"
                );
            }
            DesyncEvent::Realigned => {
                info!(batch = op.batch_id, "completion order realigned");
                self.resync()?;
            }
            DesyncEvent::InSync | DesyncEvent::Pending => {}
        }
        Ok(())
    }

    /// Shrink the oldest queued drain to a single thread and release the
    /// rest of its reservation.
    fn resync(&mut self) -> SchedulerResult<()> {
        self.summary.resyncs += 1;
        if let Some(op) = self.queues.front_mut(Stage::Drain) {
            if op.threads > 1 {
                let excess = f64::from(op.threads - 1) * op.unit_cost;
                self.pool.free(excess, &op.node_id)?;
                info!(
                    op = op.id,
                    batch = op.batch_id,
                    from = op.threads,
                    freed = excess,
                    "drain shrunk to resync"
                );
                op.threads = 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use batch_core::{GridConfig, SubmitError, TargetModel};
    use batchgrid_sim::{SimExecutor, SimModel, SimTarget, StaticNodes};

    /// Accepts every operation with the same latency and remembers the
    /// planned end each one was submitted with.
    struct FixedLatency {
        latency: f64,
        seen: Mutex<Vec<(u64, f64)>>,
    }

    impl Executor for FixedLatency {
        fn submit(&self, _target_id: &str, op: &Operation) -> Result<f64, SubmitError> {
            self.seen.lock().unwrap().push((op.id, op.planned_end));
            Ok(self.latency)
        }
    }

    fn scheduler_with<F>(
        config: &GridConfig,
        executor: F,
    ) -> (PipelineScheduler, mpsc::UnboundedSender<Completion>)
    where
        F: FnOnce(Arc<dyn TargetModel>, SimTarget, Clock, mpsc::UnboundedSender<Completion>)
            -> Arc<dyn Executor>,
    {
        let clock = Clock::start();
        let model: Arc<dyn TargetModel> = Arc::new(SimModel::new(config.model.clone()));
        let target = SimTarget::new(
            config.target.id.clone(),
            TargetState::baseline(
                config.target.baseline_level,
                config.target.baseline_instability,
            ),
        );
        let nodes = StaticNodes::new(config.nodes.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let executor = executor(Arc::clone(&model), target.clone(), clock, tx.clone());
        let pool = ResourcePool::from_source(&nodes, config.pool.clone());
        let planner = StagePlanner::new(config.planner.clone(), config.scheduler.spacer_ms, model);
        let parts = Collaborators {
            target: Arc::new(target),
            nodes: Arc::new(nodes),
            executor,
            completions: rx,
            clock,
        };
        (
            PipelineScheduler::new(config.scheduler.clone(), planner, pool, parts),
            tx,
        )
    }

    fn scheduler(config: &GridConfig) -> (PipelineScheduler, mpsc::UnboundedSender<Completion>) {
        scheduler_with(config, |model, target, clock, tx| {
            let executor: Arc<dyn Executor> = Arc::new(SimExecutor::new(model, target, clock, tx));
            executor
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_scheduler_is_idle() {
        let (sched, _tx) = scheduler(&GridConfig::scaffold("t"));
        assert!(sched.greed().is_none());
        assert!(sched.is_idle());
        assert_eq!(sched.cutoff(), f64::INFINITY);
        assert!(!sched.at_batch_limit());
    }

    #[tokio::test(start_paused = true)]
    async fn recalculate_greed_holds_result() {
        let (mut sched, _tx) = scheduler(&GridConfig::scaffold("t"));
        let plan = sched.recalculate_greed().unwrap();
        assert_eq!(sched.greed(), Some(plan.greed));
        assert_eq!(sched.summary().greed, Some(plan.greed));
        assert!(plan.max_concurrent_batches >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn admission_reserves_and_orders_batches() {
        let mut config = GridConfig::scaffold("t");
        config.scheduler.max_batches = Some(3);
        let (mut sched, _tx) = scheduler(&config);

        let state = sched.target.observe();
        let admitted = sched.admit(&state).unwrap();
        assert_eq!(admitted, 3);
        assert_eq!(sched.queues().total_len(), 12);
        assert!(sched.queues().is_ordered());
        assert!(sched.at_batch_limit());

        let plan = sched.plan().unwrap().clone();
        assert!((sched.pool().held() - 3.0 * plan.batch_cost).abs() < 1e-6);

        // Stage completions within a batch are one spacer apart, and the
        // next batch starts after the previous one finishes.
        let spacer = config.scheduler.spacer_ms;
        let drains: Vec<f64> = sched.queues().iter(Stage::Drain).map(|op| op.planned_end).collect();
        let last: Vec<f64> = sched
            .queues()
            .iter(Stage::StabilizeB)
            .map(|op| op.planned_end)
            .collect();
        assert!((last[0] - drains[0] - 3.0 * spacer).abs() < 1e-9);
        assert!(drains[1] > last[0]);
        assert_eq!(sched.cutoff(), last[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn resync_shrinks_oldest_drain() {
        let mut config = GridConfig::scaffold("t");
        config.scheduler.max_batches = Some(2);
        let (mut sched, _tx) = scheduler(&config);
        let state = sched.target.observe();
        sched.admit(&state).unwrap();

        let held = sched.pool().held();
        let drain = sched.queues().front(Stage::Drain).unwrap().clone();
        assert!(drain.threads > 1);

        sched.resync().unwrap();
        let shrunk = sched.queues().front(Stage::Drain).unwrap();
        assert_eq!(shrunk.threads, 1);
        let freed = f64::from(drain.threads - 1) * drain.unit_cost;
        assert!((sched.pool().held() - (held - freed)).abs() < 1e-6);
        assert_eq!(sched.summary().resyncs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_latency_shifts_everything_after_it() {
        let mut config = GridConfig::scaffold("t");
        config.scheduler.max_batches = Some(3);
        // Wide spacing keeps the last batch behind the cutoff.
        config.scheduler.spacer_ms = 1_000.0;
        let latency = 7.0;
        let recorder = Arc::new(FixedLatency {
            latency,
            seen: Mutex::new(Vec::new()),
        });
        let executor: Arc<dyn Executor> = recorder.clone();
        let (mut sched, _tx) = scheduler_with(&config, move |_, _, _, _| executor);

        let state = sched.target.observe();
        assert_eq!(sched.admit(&state).unwrap(), 3);
        let planned: HashMap<u64, f64> = Stage::ALL
            .into_iter()
            .flat_map(|stage| sched.queues().iter(stage))
            .map(|op| (op.id, op.planned_end))
            .collect();
        let next_end = sched.next_end;

        let dispatched = sched.dispatch("t").unwrap();
        assert!(dispatched >= 4);
        assert!(!sched.queues().is_empty());

        // Each submission carries the latency of every earlier one.
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), dispatched);
        for (k, (id, end)) in seen.iter().enumerate() {
            let expected = planned[id] + latency * k as f64;
            assert!((end - expected).abs() < 1e-6, "op {id}: {end} != {expected}");
        }

        // In flight, an operation also carries its own latency.
        for (_, flight) in sched.in_flight.iter() {
            for op in flight {
                let k = seen.iter().position(|(id, _)| *id == op.id).unwrap();
                let expected = planned[&op.id] + latency * (k + 1) as f64;
                assert!((op.planned_end - expected).abs() < 1e-6);
            }
        }

        // Everything still queued, and the next batch, moves by the total.
        let total = latency * dispatched as f64;
        for stage in Stage::ALL {
            for op in sched.queues().iter(stage) {
                assert!((op.planned_end - (planned[&op.id] + total)).abs() < 1e-6);
            }
        }
        assert!((sched.next_end - (next_end + total)).abs() < 1e-6);
        assert!(sched.queues().is_ordered());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_completion_is_fatal() {
        let (mut sched, tx) = scheduler(&GridConfig::scaffold("t"));
        tx.send(Completion {
            stage: Stage::Build,
            node_id: "nowhere".into(),
            cost: 1.0,
        })
        .unwrap();
        let err = sched.consume_ready().unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::UnknownCompletion { stage: Stage::Build, .. }
        ));
    }
}
