//! Core runtime infrastructure.
//!
//! This module contains the essential components for running the registry:
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Main runtime orchestration
//! - [`time`] - Injectable clocks
//! - [`error`] - Error types and classification

pub mod config;
pub mod error;
pub mod runtime;
pub mod time;
