//! Start command implementation.

use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start the registry.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Override the self-preservation threshold (0, 1].
    #[arg(long)]
    pub renewal_percent_threshold: Option<f64>,

    /// Serve every read from the read-write cache tier.
    #[arg(long)]
    pub disable_read_only_cache: bool,
}

impl StartArgs {
    fn overrides(&self, log_level: Option<String>) -> ConfigOverrides {
        ConfigOverrides {
            log_level,
            renewal_percent_threshold: self.renewal_percent_threshold,
            use_read_only_cache: self.disable_read_only_cache.then_some(false),
        }
    }
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Load the configuration, falling back to defaults when no file is given.
pub fn load_config(
    config_path: Option<&Path>,
    args: &StartArgs,
    log_level: Option<String>,
) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_overrides(&args.overrides(log_level));
    config.validate().context("invalid configuration after overrides")?;
    Ok(config)
}

/// Run the start command.
pub async fn run_start(
    config_path: Option<&Path>,
    args: StartArgs,
    log_level: Option<String>,
) -> Result<()> {
    let config = load_config(config_path, &args, log_level)?;
    init_tracing(&config.telemetry.log_level);

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
