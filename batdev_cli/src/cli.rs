//! CLI argument definitions and shared statics.

use batdev_core::SessionMode;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "batdev", version, about = "NiMH charger/analyzer")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/batdev_config.toml")]
    pub config: PathBuf,

    /// Optional calibration CSV (strict header: channel,raw,value)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Print records and results as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Options shared by the session commands.
#[derive(clap::Args, Debug, Clone, Copy)]
pub struct RunOpts {
    /// Run the simulated bench in lockstep instead of real time
    #[arg(long, action = ArgAction::SetTrue)]
    pub fast: bool,
    /// Abort a --fast run after this many ticks (default: derived from the session ceilings)
    #[arg(long, value_name = "TICKS", requires = "fast")]
    pub max_ticks: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Charge the cell (constant current, dip detection, optional CV taper)
    Charge {
        #[command(flatten)]
        run: RunOpts,
    },
    /// Discharge the cell through the load resistors and measure capacity
    Discharge {
        #[command(flatten)]
        run: RunOpts,
    },
    /// Classify the inserted cell and exit
    Identify {
        #[command(flatten)]
        run: RunOpts,
    },
    /// Quick health check: config, calibration, one read of every channel
    SelfCheck,
}

impl Commands {
    pub fn session(&self) -> Option<(SessionMode, RunOpts)> {
        match self {
            Commands::Charge { run } => Some((SessionMode::Charge, *run)),
            Commands::Discharge { run } => Some((SessionMode::Discharge, *run)),
            Commands::Identify { run } => Some((SessionMode::Identify, *run)),
            Commands::SelfCheck => None,
        }
    }
}
