//! Operations and observability.
//!
//! - [`observability`] - Metrics registry and registry health

pub mod observability;
