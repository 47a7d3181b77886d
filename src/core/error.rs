//! Error types for the registry core.
//!
//! Most registry outcomes are not errors: a missing instance is `false`/`None`,
//! a stale write is a no-op and self-preservation is observable state. The
//! variants below cover the remaining failure paths.

use crate::cache::key::Encoding;
use thiserror::Error;

/// Common registry error conditions.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry or cache has been shut down.
    #[error("{component} is shut down")]
    ShutDown { component: &'static str },

    /// Eviction of a copy failed and may be retried.
    #[error("eviction of {instance_id} from {source_tag} failed: {message}")]
    EvictionFailed {
        instance_id: String,
        source_tag: String,
        message: String,
    },

    /// The payload codec does not support the requested encoding.
    #[error("unsupported encoding: {encoding}")]
    UnsupportedEncoding { encoding: Encoding },

    /// Payload serialization failed.
    #[error("payload encoding failed: {message}")]
    Encoding { message: String },

    /// Compression of a cached payload failed.
    #[error("payload compression failed: {message}")]
    Compression { message: String },

    /// Invalid request.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RegistryError {
    /// Create a ShutDown error for the named component.
    pub fn shut_down(component: &'static str) -> Self {
        Self::ShutDown { component }
    }

    /// Create an EvictionFailed error.
    pub fn eviction_failed(
        instance_id: impl Into<String>,
        source_tag: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::EvictionFailed {
            instance_id: instance_id.into(),
            source_tag: source_tag.into(),
            message: message.into(),
        }
    }

    /// Create an Encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Create an InvalidRequest error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Check if this error indicates the operation should be retried.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::EvictionFailed { .. } | Self::Internal { .. })
    }

    /// Check if this error is terminal for the component that raised it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ShutDown { .. })
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::encoding(err.to_string())
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
