//! Configuration parsing and validation.
//!
//! The registry is configured from a TOML file with CLI overrides. Every
//! section is optional; omitted fields take the defaults below.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level registry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registry store configuration.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Eviction queue and self-preservation configuration.
    #[serde(default)]
    pub eviction: EvictionConfig,

    /// Response cache configuration.
    #[serde(default)]
    pub response_cache: ResponseCacheConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Registry store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Lease duration granted on registration and renewal.
    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,

    /// Period of the lease expiry scan.
    #[serde(default = "default_lease_expiry_scan_ms")]
    pub lease_expiry_scan_ms: u64,

    /// How long a change stays in the recently-changed queue.
    #[serde(default = "default_delta_retention_ms")]
    pub delta_retention_ms: u64,

    /// Period of the recently-changed queue purge.
    #[serde(default = "default_delta_retention_scan_ms")]
    pub delta_retention_scan_ms: u64,

    /// Buffered notifications per change stream subscriber.
    #[serde(default = "default_change_stream_capacity")]
    pub change_stream_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lease_duration_ms: default_lease_duration_ms(),
            lease_expiry_scan_ms: default_lease_expiry_scan_ms(),
            delta_retention_ms: default_delta_retention_ms(),
            delta_retention_scan_ms: default_delta_retention_scan_ms(),
            change_stream_capacity: default_change_stream_capacity(),
        }
    }
}

/// Eviction queue and self-preservation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Fraction of the expected registry size that must stay registered.
    #[serde(default = "default_renewal_percent_threshold")]
    pub renewal_percent_threshold: f64,

    /// Minimum time an item spends in the queue before it may be evicted.
    #[serde(default = "default_eviction_delay_ms")]
    pub eviction_delay_ms: u64,

    /// Period of the background drain.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// Attempts per item before it is dropped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            renewal_percent_threshold: default_renewal_percent_threshold(),
            eviction_delay_ms: default_eviction_delay_ms(),
            drain_interval_ms: default_drain_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
    /// Serve reads from the read-only tier first.
    #[serde(default = "default_use_read_only_cache")]
    pub use_read_only_cache: bool,

    /// Period of the read-only tier refresh.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// Read-write tier entry lifetime after generation.
    #[serde(default = "default_auto_expiration_ms")]
    pub auto_expiration_ms: u64,

    /// Read-write tier capacity.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            use_read_only_cache: default_use_read_only_cache(),
            update_interval_ms: default_update_interval_ms(),
            auto_expiration_ms: default_auto_expiration_ms(),
            max_entries: default_max_entries(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_lease_duration_ms() -> u64 {
    90_000
}

fn default_lease_expiry_scan_ms() -> u64 {
    60_000
}

fn default_delta_retention_ms() -> u64 {
    180_000
}

fn default_delta_retention_scan_ms() -> u64 {
    30_000
}

fn default_change_stream_capacity() -> usize {
    1024
}

fn default_renewal_percent_threshold() -> f64 {
    0.85
}

fn default_eviction_delay_ms() -> u64 {
    30_000
}

fn default_drain_interval_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    2
}

fn default_use_read_only_cache() -> bool {
    true
}

fn default_update_interval_ms() -> u64 {
    30_000
}

fn default_auto_expiration_ms() -> u64 {
    180_000
}

fn default_max_entries() -> usize {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration, defaults included, as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render config")
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(threshold) = overrides.renewal_percent_threshold {
            self.eviction.renewal_percent_threshold = threshold;
        }
        if let Some(use_read_only) = overrides.use_read_only_cache {
            self.response_cache.use_read_only_cache = use_read_only;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_registry()?;
        self.validate_eviction()?;
        self.validate_response_cache()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_registry(&self) -> Result<()> {
        let registry = &self.registry;
        if registry.lease_duration_ms == 0 {
            anyhow::bail!("registry.lease_duration_ms must be > 0");
        }
        if registry.lease_expiry_scan_ms == 0 {
            anyhow::bail!("registry.lease_expiry_scan_ms must be > 0");
        }
        if registry.delta_retention_scan_ms == 0 {
            anyhow::bail!("registry.delta_retention_scan_ms must be > 0");
        }
        if registry.change_stream_capacity == 0 {
            anyhow::bail!("registry.change_stream_capacity must be > 0");
        }
        Ok(())
    }

    fn validate_eviction(&self) -> Result<()> {
        let threshold = self.eviction.renewal_percent_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            anyhow::bail!(
                "eviction.renewal_percent_threshold must be in (0, 1], got: {}",
                threshold
            );
        }
        if self.eviction.drain_interval_ms == 0 {
            anyhow::bail!("eviction.drain_interval_ms must be > 0");
        }
        if self.eviction.max_attempts == 0 {
            anyhow::bail!("eviction.max_attempts must be > 0");
        }
        Ok(())
    }

    fn validate_response_cache(&self) -> Result<()> {
        let cache = &self.response_cache;
        if cache.update_interval_ms == 0 {
            anyhow::bail!("response_cache.update_interval_ms must be > 0");
        }
        if cache.auto_expiration_ms == 0 {
            anyhow::bail!("response_cache.auto_expiration_ms must be > 0");
        }
        if cache.max_entries == 0 {
            anyhow::bail!("response_cache.max_entries must be > 0");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override the self-preservation threshold.
    pub renewal_percent_threshold: Option<f64>,
    /// Override use of the read-only cache tier.
    pub use_read_only_cache: Option<bool>,
}
