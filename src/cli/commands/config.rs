//! Config command implementation.

use crate::core::config::Config;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/registry.toml")]
        config: PathBuf,
    },
    /// Print configuration with defaults.
    Show {
        /// Config file path; defaults only when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config),
        ConfigCommand::Show { config, format } => {
            println!("{}", render_config(config.as_deref(), &format)?);
            Ok(())
        }
    }
}

fn validate_config(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {}", path.display());
    }
    let config = Config::from_file(path)?;
    println!("✓ Config file is valid");
    println!(
        "  lease {} ms, eviction delay {} ms, threshold {}",
        config.registry.lease_duration_ms,
        config.eviction.eviction_delay_ms,
        config.eviction.renewal_percent_threshold
    );
    if !config.response_cache.use_read_only_cache {
        println!("  ⚠ Warning: read-only cache tier disabled");
    }
    Ok(())
}

/// Render the effective configuration.
pub fn render_config(path: Option<&Path>, format: &str) -> Result<String> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    match format {
        "json" => Ok(serde_json::to_string_pretty(&config)?),
        "toml" => config.to_toml(),
        other => anyhow::bail!("unknown format: {} (expected toml or json)", other),
    }
}
