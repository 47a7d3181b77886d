//! Eviction with self-preservation.
//!
//! - [`queue`] - Delay queue of pending evictions
//! - [`strategy`] - Quota computation
//! - [`controller`] - Expected-size tracking and the quota-gated drain

pub mod controller;
pub mod queue;
pub mod strategy;

pub use controller::{DrainReport, EvictionController, EvictionTarget};
pub use queue::{EvictionItem, EvictionQueue, EvictionReason};
pub use strategy::{EvictionStrategy, PercentageDropStrategy};
