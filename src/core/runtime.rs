//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: registry store → eviction drain → response cache → maintenance tasks
//! - Shutdown order: maintenance tasks → eviction drain → registry store → response cache

use crate::core::config::Config;
use crate::core::time::{SharedClock, SystemClock};
use crate::ops::observability::RegistryMetrics;
use crate::registry::ServiceRegistry;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component is degraded but functional.
    Degraded,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Registry store health.
    pub registry: ComponentHealth,
    /// Eviction drain health; degraded while self-preserving.
    pub eviction: ComponentHealth,
    /// Response cache health.
    pub response_cache: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            registry: ComponentHealth::Starting,
            eviction: ComponentHealth::Starting,
            response_cache: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.registry, self.eviction, self.response_cache),
            (
                ComponentHealth::Healthy,
                ComponentHealth::Healthy | ComponentHealth::Degraded,
                ComponentHealth::Healthy
            )
        )
    }

    /// Check if the runtime is alive (not failed).
    pub fn is_alive(&self) -> bool {
        !matches!(
            (self.registry, self.eviction, self.response_cache),
            (ComponentHealth::Failed, _, _)
                | (_, ComponentHealth::Failed, _)
                | (_, _, ComponentHealth::Failed)
        )
    }
}

/// Registry runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Time source shared by every component.
    clock: SharedClock,

    /// Metrics shared by every component.
    metrics: Arc<RegistryMetrics>,

    /// The assembled registry (once started).
    registry: Option<Arc<ServiceRegistry>>,

    /// Runtime health status.
    health: RuntimeHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,

    /// Background task handles.
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Create a runtime driven by an explicit clock.
    pub fn with_clock(config: Config, clock: SharedClock) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            clock,
            metrics: Arc::new(RegistryMetrics::new()),
            registry: None,
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the registry (if started).
    pub fn registry(&self) -> Option<&Arc<ServiceRegistry>> {
        self.registry.as_ref()
    }

    /// Get the shared metrics.
    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }

    /// Get the current health status, refreshing the eviction state.
    pub fn health(&mut self) -> &RuntimeHealth {
        if let Some(registry) = &self.registry {
            if self.health.eviction == ComponentHealth::Healthy && registry.is_self_preserving() {
                self.health.eviction = ComponentHealth::Degraded;
            } else if self.health.eviction == ComponentHealth::Degraded
                && !registry.is_self_preserving()
            {
                self.health.eviction = ComponentHealth::Healthy;
            }
        }
        &self.health
    }

    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// Check if the runtime is alive.
    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Initialize and start all runtime components.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            lease_duration_ms = self.config.registry.lease_duration_ms,
            renewal_percent_threshold = self.config.eviction.renewal_percent_threshold,
            use_read_only_cache = self.config.response_cache.use_read_only_cache,
            "starting registry runtime"
        );

        let registry = self.init_registry();
        self.start_background(&registry);
        self.registry = Some(registry);

        self.running.store(true, Ordering::Release);
        tracing::info!("registry runtime started");

        Ok(())
    }

    /// Build the store, eviction controller and response cache.
    fn init_registry(&mut self) -> Arc<ServiceRegistry> {
        tracing::debug!("initializing registry");

        let registry = Arc::new(ServiceRegistry::new(
            (*self.config).clone(),
            self.clock.clone(),
            self.metrics.clone(),
        ));
        self.health.registry = ComponentHealth::Healthy;
        self.health.response_cache = ComponentHealth::Healthy;

        tracing::info!("registry initialized");
        registry
    }

    /// Spawn the eviction drain and the periodic maintenance tasks.
    fn start_background(&mut self, registry: &Arc<ServiceRegistry>) {
        tracing::debug!("starting background tasks");

        self.tasks = registry.spawn_background(self.shutdown_rx.clone());
        self.health.eviction = ComponentHealth::Healthy;

        tracing::info!(tasks = self.tasks.len(), "background tasks started");
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for shutdown signal.
    pub async fn wait_for_shutdown(&mut self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Run the runtime until Ctrl-C or a shutdown request.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Stop all runtime components.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping registry runtime");
        self.running.store(false, Ordering::Release);

        // Signal shutdown to all tasks
        let _ = self.shutdown_tx.send(true);

        self.stop_background().await;
        self.stop_registry()?;

        tracing::debug!(metrics = %self.metrics.export(), "final metrics");
        tracing::info!("registry runtime stopped");
        Ok(())
    }

    async fn stop_background(&mut self) {
        tracing::debug!("stopping background tasks");
        self.health.eviction = ComponentHealth::Stopping;

        for handle in self.tasks.drain(..) {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "background task panicked");
                }
                Err(_) => {
                    tracing::warn!("background task stop timed out");
                }
            }
        }

        self.health.eviction = ComponentHealth::Stopped;
    }

    fn stop_registry(&mut self) -> Result<()> {
        tracing::debug!("stopping registry");
        self.health.registry = ComponentHealth::Stopping;
        self.health.response_cache = ComponentHealth::Stopping;

        if let Some(registry) = self.registry.take() {
            registry.shutdown().context("registry shutdown failed")?;
        }

        self.health.registry = ComponentHealth::Stopped;
        self.health.response_cache = ComponentHealth::Stopped;
        Ok(())
    }

    /// Start the runtime for tests (without signal handling).
    pub async fn start_for_tests(&mut self) -> Result<()> {
        self.start().await
    }

    /// Stop the runtime for tests.
    pub async fn shutdown_for_tests(&mut self) -> Result<()> {
        self.stop().await
    }
}
