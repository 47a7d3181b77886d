//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use registry_core::core::config::Config;
use registry_core::core::time::ManualClock;
use registry_core::model::{InstanceRecord, InstanceStatus, Source};
use registry_core::observability::RegistryMetrics;
use registry_core::ServiceRegistry;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    write_config("")
}

/// Create a configuration with custom settings.
pub fn create_config_with_settings(
    threshold: f64,
    eviction_delay_ms: u64,
    log_level: &str,
) -> NamedTempFile {
    let config_content = format!(
        r#"
[eviction]
renewal_percent_threshold = {}
eviction_delay_ms = {}

[telemetry]
log_level = "{}"
"#,
        threshold, eviction_delay_ms, log_level
    );
    write_config(&config_content)
}

/// Write arbitrary TOML to a temp file.
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Configuration with no eviction delay, for tests that drain immediately.
pub fn immediate_eviction_config() -> Config {
    let mut config = Config::default();
    config.eviction.eviction_delay_ms = 0;
    config
}

/// A registry on a manual clock starting at 1_000 ms.
pub fn registry_with(config: Config) -> (Arc<ManualClock>, ServiceRegistry) {
    let clock = ManualClock::shared(1_000);
    let registry = ServiceRegistry::new(config, clock.clone(), Arc::new(RegistryMetrics::new()));
    (clock, registry)
}

/// A registry with default configuration and no eviction delay.
pub fn registry() -> (Arc<ManualClock>, ServiceRegistry) {
    registry_with(immediate_eviction_config())
}

/// An UP record.
pub fn record(id: &str, app: &str) -> InstanceRecord {
    InstanceRecord::builder(id, app)
        .host_name(format!("{id}.example.com"))
        .port(8080)
        .build()
}

/// A record with a given status and dirty timestamp.
pub fn record_with(id: &str, app: &str, status: InstanceStatus, dirty: u64) -> InstanceRecord {
    InstanceRecord::builder(id, app)
        .status(status)
        .last_dirty_timestamp(dirty)
        .build()
}

/// The local source used for an instance's own registration stream.
pub fn local(app: &str) -> Source {
    Source::local(app, "conn-1")
}

/// A replicated source from a peer.
pub fn peer(name: &str) -> Source {
    Source::replicated(name, format!("{name}-conn"))
}

/// Register `count` local instances `i0..i{count}` of application `app`.
pub fn register_many(registry: &ServiceRegistry, app: &str, count: usize) {
    for i in 0..count {
        let id = format!("{app}-i{i}");
        registry.register(record(&id, app), local(app));
    }
}
