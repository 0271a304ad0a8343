//! scene_switcherd - occupancy-driven scene switcher daemon
//!
//! This daemon:
//! 1. Loads configuration (file from --config / SCENE_SWITCHER_CONFIG, env overrides)
//! 2. Registers and opens every configured feed
//! 3. Runs the control loop until Ctrl-C (or --ticks ticks)
//! 4. Closes every source and the output controller on the way out

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use scene_switcher::{ControlLoop, ShutdownSignal, SwitcherConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (TOML if it ends in .toml, JSON otherwise).
    #[arg(long, env = "SCENE_SWITCHER_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many ticks.
    #[arg(long)]
    ticks: Option<u64>,
    /// Decide but never touch the real output (in-memory controller).
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SwitcherConfig::load_from(path)?,
        None => SwitcherConfig::load()?,
    };
    if args.dry_run {
        log::info!("dry run: decisions go to the in-memory controller");
        config.controller.kind = "memory".to_string();
    }

    let mut control = ControlLoop::from_config(&config)?;

    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    ctrlc::set_handler(move || handler_signal.request())
        .context("error setting Ctrl-C handler")?;

    let stats = control.run(&shutdown, args.ticks);
    log::info!(
        "scene_switcherd exiting: {} ticks, {} decisions, {} switches",
        stats.ticks,
        stats.decisions,
        stats.switches
    );
    Ok(())
}
