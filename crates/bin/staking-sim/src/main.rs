//! staking-sim: replays a YAML scenario against the staking engine
//!
//! ```text
//! staking-sim run --config scenario.yaml [--blocks N]
//! staking-sim export --config scenario.yaml > genesis.yaml
//! ```
//!
//! Every block advances height and time, applies the actions scheduled for
//! that height, runs the end-of-block reconciliation and checks all
//! invariants. A broken invariant stops the run with a non-zero exit code.

mod config;
mod sim;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use sim::Simulation;

#[derive(Parser, Debug)]
#[command(name = "staking-sim")]
#[command(about = "Block-by-block staking scenario driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: Level,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scenario and report every block
    Run(RunArgs),
    /// Run the scenario and print the final state as genesis YAML
    Export(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Scenario file
    #[arg(long, short)]
    config: PathBuf,

    /// Override the number of blocks to simulate
    #[arg(long)]
    blocks: Option<u64>,
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG overrides --log-level; stdout is reserved for export
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.to_string()));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli.command) {
        if sim::is_fatal(&e) {
            error!(error = %e, "staking state corrupted, aborting");
        } else {
            error!(error = %e, "simulation failed");
        }
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    let (args, export) = match command {
        Command::Run(args) => (args, false),
        Command::Export(args) => (args, true),
    };

    let config = Config::load(&args.config)?;
    let blocks = args.blocks.unwrap_or(config.chain.blocks);
    info!(
        config = %args.config.display(),
        blocks,
        validators = config.validators.len(),
        actions = config.actions.len(),
        "starting simulation"
    );

    let mut sim = Simulation::new(&config)?;
    sim.run(blocks)?;

    if export {
        let genesis = sim.export()?;
        print!("{}", serde_yaml::to_string(&genesis)?);
    }
    Ok(())
}
