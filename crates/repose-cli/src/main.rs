use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use repose_core::WaitSignal;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod input;

#[derive(Parser)]
#[command(name = "repose")]
#[command(about = "Live pose editor for a running game process")]
struct Args {
    /// Target process executable name (e.g. game_dx11.exe)
    #[arg(short, long)]
    process: String,

    /// Skeleton layout map for the target game build
    #[arg(short, long, default_value = "skeleton.json")]
    map: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor live bone transforms until interrupted
    Watch,

    /// Capture the current pose to a snapshot file
    Capture {
        #[arg(short, long, default_value = "pose.json")]
        out: PathBuf,

        #[arg(long)]
        no_positions: bool,
        #[arg(long)]
        no_rotations: bool,
        #[arg(long)]
        no_scales: bool,

        /// Capture only these bones (comma separated)
        #[arg(long, value_delimiter = ',')]
        bones: Option<Vec<String>>,
    },

    /// Apply a saved pose snapshot to the live skeleton
    Apply {
        #[arg(short = 'f', long)]
        pose: PathBuf,

        #[arg(long)]
        no_positions: bool,
        #[arg(long)]
        no_rotations: bool,
        #[arg(long)]
        no_scales: bool,

        /// Apply only these bones (comma separated)
        #[arg(long, value_delimiter = ',')]
        bones: Option<Vec<String>>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("repose=info".parse()?))
        .init();

    let args = Args::parse();

    // One signal interrupts everything: the sync loop cadence, apply
    // yields, and the attach wait.
    let signal = Arc::new(WaitSignal::new());
    let ctrlc_signal = Arc::clone(&signal);
    ctrlc::set_handler(move || {
        info!("received shutdown signal, stopping...");
        ctrlc_signal.trigger();
    })?;

    let _keyboard = input::spawn_keyboard_monitor(Arc::clone(&signal));

    info!("Repose {}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Watch => commands::watch::run(&args.process, &args.map, &signal),
        Command::Capture {
            out,
            no_positions,
            no_rotations,
            no_scales,
            bones,
        } => commands::capture::run(
            &args.process,
            &args.map,
            &signal,
            &out,
            commands::ChannelFlags {
                positions: !no_positions,
                rotations: !no_rotations,
                scales: !no_scales,
            },
            bones,
        ),
        Command::Apply {
            pose,
            no_positions,
            no_rotations,
            no_scales,
            bones,
        } => commands::apply::run(
            &args.process,
            &args.map,
            &signal,
            &pose,
            commands::ChannelFlags {
                positions: !no_positions,
                rotations: !no_rotations,
                scales: !no_scales,
            },
            bones,
        ),
    }
}
