//! Command-line interface.
//!
//! Unified CLI for registry operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// registry-core - service registry with self-preservation and response caching.
#[derive(Parser, Debug)]
#[command(name = "registry-core")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the registry.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}
