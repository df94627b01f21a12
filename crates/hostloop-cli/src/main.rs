//! hostloop host binary
//!
//! Drives a hostloop event loop: demo subcommands that exercise timers,
//! round-robin scheduling and the cross-thread gateway, plus an interactive
//! console that talks to the loop from its own thread.
//!
//! The process exits with the loop's exit code.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use hostloop_core::LoopConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hostloop")]
#[command(about = "Event loop host for embedded script engines", long_about = None)]
#[command(version)]
struct Cli {
    /// Loop configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "hostloop_core=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Color output: auto, always, never
    #[arg(long, global = true, default_value = "auto")]
    color: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a repeating and a one-shot timer and report when they fire
    Timers {
        /// Period of the repeating timer
        #[arg(long, default_value_t = 50)]
        interval_ms: u64,
        /// When the one-shot timer cancels the interval and exits
        #[arg(long, default_value_t = 250)]
        duration_ms: u64,
    },

    /// Step a set of tasks round-robin and report the re-posts it took
    RoundRobin {
        /// Number of tasks in the set
        #[arg(long, default_value_t = 4)]
        tasks: usize,
        /// Steps each task needs to finish
        #[arg(long, default_value_t = 250)]
        steps: usize,
    },

    /// Submit work from foreign threads and report round-trip latency
    Gateway {
        /// Number of submitting threads
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Submissions per thread
        #[arg(long, default_value_t = 100)]
        submissions: usize,
    },

    /// Interactive console; commands run on the loop thread
    Console,
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let config = match &cli.config {
        Some(path) => LoopConfig::load(path)?,
        None => LoopConfig::default(),
    };
    let color = output::resolve_color_choice(Some(&cli.color));

    let code = match cli.command {
        Commands::Timers {
            interval_ms,
            duration_ms,
        } => commands::timers::execute(config, color, interval_ms, duration_ms)?,
        Commands::RoundRobin { tasks, steps } => commands::round_robin::execute(config, color, tasks, steps)?,
        Commands::Gateway {
            threads,
            submissions,
        } => commands::gateway::execute(config, color, threads, submissions)?,
        Commands::Console => commands::console::execute(config, color)?,
    };

    std::process::exit(code);
}
