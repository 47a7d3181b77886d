//! Change notifications published by the registry.

use crate::model::instance::{Delta, InstanceRecord};
use crate::model::source::Source;
use std::sync::Arc;

/// Kind of a [`ChangeNotification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

/// A change to the reconciled view of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotification {
    /// The instance became visible.
    Add {
        record: Arc<InstanceRecord>,
        source: Source,
    },
    /// The visible record changed; `deltas` may be empty when only the
    /// owning source changed.
    Modify {
        record: Arc<InstanceRecord>,
        source: Source,
        deltas: Vec<Delta>,
    },
    /// The instance is no longer visible.
    Delete {
        record: Arc<InstanceRecord>,
        source: Source,
    },
}

impl ChangeNotification {
    pub fn add(record: Arc<InstanceRecord>, source: Source) -> Self {
        Self::Add { record, source }
    }

    pub fn modify(record: Arc<InstanceRecord>, source: Source, deltas: Vec<Delta>) -> Self {
        Self::Modify {
            record,
            source,
            deltas,
        }
    }

    pub fn delete(record: Arc<InstanceRecord>, source: Source) -> Self {
        Self::Delete { record, source }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Add { .. } => ChangeKind::Add,
            Self::Modify { .. } => ChangeKind::Modify,
            Self::Delete { .. } => ChangeKind::Delete,
        }
    }

    pub fn record(&self) -> &Arc<InstanceRecord> {
        match self {
            Self::Add { record, .. } | Self::Modify { record, .. } | Self::Delete { record, .. } => {
                record
            }
        }
    }

    pub fn source(&self) -> &Source {
        match self {
            Self::Add { source, .. } | Self::Modify { source, .. } | Self::Delete { source, .. } => {
                source
            }
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.record().id
    }

    /// Field deltas of a Modify; empty for Add and Delete.
    pub fn deltas(&self) -> &[Delta] {
        match self {
            Self::Modify { deltas, .. } => deltas,
            _ => &[],
        }
    }
}
