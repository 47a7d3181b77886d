//! Service registry.
//!
//! - [`holder`] - Per-instance reconciliation of competing sources
//! - [`store`] - Serialized mutations, published views, subscriptions
//! - [`index`] - Read-side view table and secondary indexes
//! - [`interest`] - Standing interest subscriptions
//! - [`lease`] - Copy leases
//! - [`recent`] - Recently changed queue and activity rings
//! - [`registration`] - Duplicate-registration suppression
//! - [`service`] - Facade wiring store, eviction and cache

pub mod holder;
pub mod index;
pub mod interest;
pub mod lease;
pub mod recent;
pub mod registration;
pub mod service;
pub mod store;

pub use holder::{InstanceHolder, StoredCopy};
pub use index::{PublishedView, ViewTable};
pub use interest::{Interest, InterestStream};
pub use lease::{Lease, LeaseKey, LeaseTable};
pub use registration::{RegistrationHandle, RegistrationProcessor};
pub use service::ServiceRegistry;
pub use store::{InvalidationListener, MutationOutcome, RegistryStore};
