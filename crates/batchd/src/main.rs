//! batchd — the batchgrid daemon.
//!
//! Assembles the planner, pool and pipeline scheduler around the simulated
//! collaborators described by a `batchgrid.toml`:
//!
//! - `init` writes a scaffold config
//! - `plan` prints the best batch plan for the configured pool
//! - `prep` brings the simulated target to baseline
//! - `run` preps, then runs the pipeline until the batch limit or Ctrl-C
//!
//! Results are printed to stdout as JSON; logs go to stderr.
//!
//! # Usage
//!
//! ```text
//! batchd init --output batchgrid.toml
//! batchd run --config batchgrid.toml --batches 100
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod sim;

const DEFAULT_FILTER: &str = "info,batchd=debug,batchgrid=debug";

#[derive(Parser)]
#[command(name = "batchd", about = "batchgrid daemon", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a scaffold batchgrid.toml.
    Init {
        #[arg(short, long, default_value = "batchgrid.toml")]
        output: PathBuf,

        /// Target identifier to put in the scaffold.
        #[arg(long, default_value = "target")]
        target: String,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the highest-throughput batch plan.
    Plan {
        /// Config file. The scaffold is used when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Bring the simulated target back to baseline.
    Prep {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Prep, then run the batch pipeline.
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Stop admitting after this many batches. Overrides the config.
        #[arg(long)]
        batches: Option<u64>,

        /// Start batching without prepping the target first.
        #[arg(long)]
        skip_prep: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Command::Init {
            output,
            target,
            force,
        } => commands::init::write_scaffold(&output, &target, force),
        Command::Plan { config } => commands::pipeline::plan(config.as_deref()),
        Command::Prep { config } => commands::pipeline::prep(config.as_deref()).await,
        Command::Run {
            config,
            batches,
            skip_prep,
        } => commands::pipeline::run(config.as_deref(), batches, skip_prep).await,
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
