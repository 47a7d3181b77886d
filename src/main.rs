//! registry-core - unified CLI entrypoint.
//!
//! Usage:
//!   registry-core start --config config/registry.toml
//!   registry-core config validate --config config/registry.toml
//!   registry-core config show [--config config/registry.toml] [--format json]

use anyhow::Result;
use clap::Parser;
use registry_core::cli::commands::{run_config, run_start};
use registry_core::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.map(PathBuf::from);

    match cli.command {
        Commands::Start(args) => run_start(config_path.as_deref(), args, cli.log_level).await,
        Commands::Config(args) => run_config(args),
    }
}
