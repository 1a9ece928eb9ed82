//! resguard - runs a resource manager with periodic snapshots.
//!
//! Loads the config, restores the previous state file when one exists,
//! autosaves while running and writes a final snapshot on Ctrl-C.

use clap::Parser;
use resguard_core::kernel::ResourceManager;
use resguard_core::Config;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "resguard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deadlock-avoiding resource allocator")]
struct Cli {
    /// JSON config file (defaults are used when it does not exist)
    #[arg(long, value_name = "PATH", env = "RESGUARD_CONFIG", default_value = "resguard.json")]
    config: PathBuf,

    /// Keep the totals recorded in the state file instead of the configured ones
    #[arg(long)]
    no_reset_resources: bool,

    /// Re-grant the allocations recorded in the state file
    #[arg(long)]
    keep_allocations: bool,

    /// Override the state file location
    #[arg(long, value_name = "PATH")]
    state_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if cli.no_reset_resources {
        config.startup.reset_resources = false;
    }
    if cli.keep_allocations {
        config.startup.reset_allocations = false;
    }
    if let Some(path) = cli.state_file {
        config.persistence.state_file = path;
    }

    resguard_core::observability::init_tracing_with(&config.observability);

    let manager = Arc::new(ResourceManager::from_config(&config)?);

    if config.persistence.state_file.exists() {
        let report = manager.load_state()?;
        if !report.is_clean() {
            tracing::warn!(issues = report.issues.len(), "state_restored_with_issues");
        }
    } else {
        tracing::info!(
            path = %config.persistence.state_file.display(),
            "no_previous_state"
        );
    }

    manager.start_autosave()?;
    tracing::info!(
        resources = ?manager.initial_resources(),
        policy = ?config.safety,
        "resguard_started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown_requested");

    let manager_for_shutdown = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || manager_for_shutdown.shutdown()).await??;

    Ok(())
}
