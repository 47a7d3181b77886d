//! Sources of instance records.
//!
//! A [`Source`] tags every copy of an instance record with where it came from:
//! its origin (a direct client registration or a replicated peer copy), a
//! logical name, and the id of the connection that delivered it. Two sources
//! match *logically* when origin and name agree, and *exactly* when the
//! connection id agrees too.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Where a copy of an instance record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Registered directly with this node by the instance itself.
    Local,
    /// Replicated from a peer registry node.
    Replicated,
}

impl Origin {
    /// Stable lowercase label, used in metric names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Replicated => "replicated",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "Local"),
            Self::Replicated => write!(f, "Replicated"),
        }
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable origin tag of a record copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    origin: Origin,
    name: String,
    id: String,
}

impl Source {
    /// Create a source with an explicit connection id.
    pub fn new(origin: Origin, name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            origin,
            name: name.into(),
            id: id.into(),
        }
    }

    /// Local source for a client connection.
    pub fn local(name: impl Into<String>, connection: impl Into<String>) -> Self {
        Self::new(Origin::Local, name, connection)
    }

    /// Replicated source for a peer connection.
    pub fn replicated(peer: impl Into<String>, connection: impl Into<String>) -> Self {
        Self::new(Origin::Replicated, peer, connection)
    }

    /// Source with a process-unique connection id.
    pub fn with_generated_id(origin: Origin, name: impl Into<String>) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        Self::new(origin, name, format!("conn-{id}"))
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }

    /// The logical part of this source (origin and name).
    pub fn logical(&self) -> LogicalSource {
        LogicalSource {
            origin: self.origin,
            name: self.name.clone(),
        }
    }

    /// Logical match: same origin and name, any connection.
    pub fn matches(&self, other: &Source) -> bool {
        self.origin == other.origin && self.name == other.name
    }

    /// Exact match: same origin, name and connection.
    pub fn matches_exactly(&self, other: &Source) -> bool {
        self == other
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.origin, self.name, self.id)
    }
}

/// Origin and name of a source, without the connection id.
///
/// Keys the copies held for an instance: one copy per logical source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalSource {
    pub origin: Origin,
    pub name: String,
}

impl LogicalSource {
    pub fn new(origin: Origin, name: impl Into<String>) -> Self {
        Self {
            origin,
            name: name.into(),
        }
    }

    /// Check whether a source belongs to this logical source.
    pub fn contains(&self, source: &Source) -> bool {
        self.origin == source.origin() && self.name == source.name()
    }
}

impl fmt::Display for LogicalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.name)
    }
}
