//! registry-core - multi-source service registry with self-preservation.
//!
//! Instances register from local clients and are replicated from peers. Every
//! instance id may hold one copy per logical source; an [`registry::InstanceHolder`]
//! reconciles them into the single view clients see. Expired and disconnected
//! copies go through a delay queue whose drain stops when the registry has
//! shrunk too far below what it expects (self-preservation). Polling clients
//! read pre-rendered payloads from a two-tier response cache that registry
//! mutations invalidate.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        local clients        │        peer replication           │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │ register / renew / cancel
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ServiceRegistry                          │
//! │   RegistryStore (holders, leases, overrides, view table)        │
//! └─────────────────────────────────────────────────────────────────┘
//!            │ evict                             │ invalidate
//! ┌──────────────────────────────┐  ┌──────────────────────────────┐
//! │  EvictionController          │  │  ResponseCache               │
//! │  delay queue │ quota         │  │  read-only │ read-write      │
//! └──────────────────────────────┘  └──────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Main runtime orchestration
//! - [`core::time`] - Injectable clocks
//! - [`core::error`] - Error types
//!
//! ## Model
//! - [`model::source`] - Source tags and logical sources
//! - [`model::instance`] - Instance records and deltas
//! - [`model::application`] - Application grouping and hash codes
//! - [`model::notification`] - Change notifications
//!
//! ## Registry
//! - [`registry::holder`] - Multi-source reconciliation
//! - [`registry::store`] - Serialized mutations and published views
//! - [`registry::registration`] - Duplicate-registration suppression
//! - [`registry::service`] - The assembled registry
//!
//! ## Eviction
//! - [`eviction::queue`] - Delay queue
//! - [`eviction::strategy`] - Quota computation
//! - [`eviction::controller`] - Self-preservation drain
//!
//! ## Cache
//! - [`cache::key`] - Cache keys
//! - [`cache::response`] - Two-tier response cache
//!
//! ## Operations
//! - [`ops::observability`] - Metrics and health
//!
//! # Key Invariants
//!
//! - A Local copy always wins over Replicated copies of the same instance.
//! - Re-applying an accepted update emits no notification.
//! - The eviction drain never removes copies while
//!   `actual < threshold × expected`.
//! - A cache read after a mutation returns content generated after it.

// Core infrastructure
pub mod core;

// Data model
pub mod model;

// Registry store and facade
pub mod registry;

// Eviction and self-preservation
pub mod eviction;

// Response cache
pub mod cache;

// Operations and observability
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime, time};
pub use cache::{CacheKey, ResponseCache};
pub use eviction::EvictionController;
pub use model::{ChangeNotification, InstanceRecord, InstanceStatus, Origin, Source};
pub use ops::observability;
pub use registry::{RegistryStore, ServiceRegistry};
