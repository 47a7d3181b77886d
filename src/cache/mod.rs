//! Versioned response cache.
//!
//! - [`key`] - Cache key identity
//! - [`value`] - Generated payloads with gzip form
//! - [`codec`] - Snapshot rendering
//! - [`response`] - The two-tier cache itself

pub mod codec;
pub mod key;
pub mod response;
pub mod value;

pub use codec::{JsonCodec, PayloadCodec};
pub use key::{ApiVersion, CacheKey, Encoding, EntityType, ALL_APPS, ALL_APPS_DELTA};
pub use response::{ResponseCache, SnapshotSource};
pub use value::CacheValue;
