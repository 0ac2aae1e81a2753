//! Wires the scheduler to the in-process simulator.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;

use batch_core::{Clock, GridConfig, TargetModel, TargetState};
use batchgrid_planner::StagePlanner;
use batchgrid_pool::ResourcePool;
use batchgrid_scheduler::{Collaborators, PipelineScheduler};
use batchgrid_sim::{SimExecutor, SimModel, SimTarget, StaticNodes};

/// Load `path`, or fall back to the scaffold when no path is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<GridConfig> {
    match path {
        Some(path) => GridConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => {
            info!("no config given, using scaffold");
            Ok(GridConfig::scaffold("target"))
        }
    }
}

/// Starting state of the simulated target.
pub fn initial_state(config: &GridConfig) -> TargetState {
    let t = &config.target;
    let mut state = TargetState::baseline(t.baseline_level, t.baseline_instability);
    if let Some(level) = t.initial_level {
        state.level = level.clamp(0.0, t.baseline_level);
    }
    if let Some(instability) = t.initial_instability {
        state.instability = instability.max(t.baseline_instability);
    }
    state
}

pub fn model(config: &GridConfig) -> Arc<dyn TargetModel> {
    Arc::new(SimModel::new(config.model.clone()))
}

pub fn planner(config: &GridConfig) -> StagePlanner {
    StagePlanner::new(
        config.planner.clone(),
        config.scheduler.spacer_ms,
        model(config),
    )
}

pub fn pool(config: &GridConfig) -> ResourcePool {
    ResourcePool::new(&config.nodes, config.pool.clone())
}

/// A scheduler driving a simulated target and executor.
pub struct Simulation {
    pub scheduler: PipelineScheduler,
    pub target: SimTarget,
}

pub fn assemble(config: &GridConfig) -> Simulation {
    let clock = Clock::start();
    let model = model(config);
    let target = SimTarget::new(config.target.id.clone(), initial_state(config));
    let nodes = StaticNodes::new(config.nodes.clone());
    let (tx, rx) = mpsc::unbounded_channel();
    let executor = SimExecutor::new(Arc::clone(&model), target.clone(), clock, tx);

    let pool = ResourcePool::from_source(&nodes, config.pool.clone());
    let planner = StagePlanner::new(config.planner.clone(), config.scheduler.spacer_ms, model);
    info!(
        target = %config.target.id,
        nodes = pool.len(),
        capacity = pool.total(),
        "simulation assembled"
    );

    let scheduler = PipelineScheduler::new(
        config.scheduler.clone(),
        planner,
        pool,
        Collaborators {
            target: Arc::new(target.clone()),
            nodes: Arc::new(nodes),
            executor: Arc::new(executor),
            completions: rx,
            clock,
        },
    );
    Simulation { scheduler, target }
}
