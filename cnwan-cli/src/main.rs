//! cnwan — keep a service registry in step with cluster workloads.
//!
//! # Usage
//!
//! ```text
//! cnwan extract <workload.yaml> [--json]
//! cnwan sync <workload.yaml> [--json]
//! cnwan remove <workload.yaml>
//! cnwan show [--json]
//! ```
//!
//! Global flags: `--config <settings.yaml>`, `--verbose`.

mod commands;
mod settings;
mod workload;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    extract::ExtractArgs, remove::RemoveArgs, show::ShowArgs, sync::SyncArgs, CommandEnv,
};
use settings::Settings;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "cnwan",
    version,
    about = "Reflect cluster workloads into a service registry without touching foreign entries",
    long_about = None,
)]
struct Cli {
    /// Settings file (defaults to ~/.cnwan/settings.yaml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log reconciliation steps at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the registry records a workload file maps to.
    Extract(ExtractArgs),

    /// Create or update the workload's records in the registry.
    Sync(SyncArgs),

    /// Delete the workload's endpoints and service, if owned.
    Remove(RemoveArgs),

    /// List everything in the local registry store.
    Show(ShowArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
    let settings = Settings::load_at(&home, cli.config.as_deref())?;
    tracing::debug!(
        owner = %settings.ownership(),
        store = %settings.store_root(&home).display(),
        "settings loaded"
    );
    let env = CommandEnv { home, settings };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Extract(args) => args.run(),
            Commands::Sync(args) => args.run(&env).await,
            Commands::Remove(args) => args.run(&env).await,
            Commands::Show(args) => args.run(&env).await,
        }
    })
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
