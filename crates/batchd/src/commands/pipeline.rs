//! `batchd plan`, `prep` and `run`.

use std::path::Path;

use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use batch_core::TargetProbe;

use crate::sim;

/// Print the best plan against the configured pool with the target at
/// baseline.
pub fn plan(config: Option<&Path>) -> anyhow::Result<()> {
    let config = sim::load_config(config)?;
    let planner = sim::planner(&config);
    let pool = sim::pool(&config);
    let state = sim::initial_state(&config).at_baseline();

    let plan = planner.plan(&state, &pool)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

pub async fn prep(config: Option<&Path>) -> anyhow::Result<()> {
    let config = sim::load_config(config)?;
    let mut simulation = sim::assemble(&config);

    let report = simulation.scheduler.prepare(&config.prep).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn run(
    config: Option<&Path>,
    batches: Option<u64>,
    skip_prep: bool,
) -> anyhow::Result<()> {
    let mut config = sim::load_config(config)?;
    if batches.is_some() {
        config.scheduler.max_batches = batches;
    }
    let mut simulation = sim::assemble(&config);

    let prep = if skip_prep {
        None
    } else {
        Some(simulation.scheduler.prepare(&config.prep).await?)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!(error = %e, "failed to install Ctrl-C handler"),
        }
    });

    let summary = simulation.scheduler.run(shutdown_rx).await?;
    let output = json!({
        "prep": prep,
        "summary": summary,
        "plan": simulation.scheduler.plan(),
        "final_state": simulation.target.observe(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
