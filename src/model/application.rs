//! Application views assembled from instance records.

use crate::model::instance::{InstanceRecord, InstanceStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// All instances registered under one application name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    pub instances: Vec<Arc<InstanceRecord>>,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instances: Vec::new(),
        }
    }

    pub fn add_instance(&mut self, record: Arc<InstanceRecord>) {
        self.instances.push(record);
    }

    pub fn instance(&self, id: &str) -> Option<&Arc<InstanceRecord>> {
        self.instances.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// A set of applications as served to polling clients.
///
/// `version` is only meaningful for delta payloads; `apps_hash_code` lets a
/// client that applied a delta verify it converged on the full registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applications {
    pub version: u64,
    pub apps_hash_code: String,
    pub applications: Vec<Application>,
}

impl Applications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group records by application name, ordered by name then instance id.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Arc<InstanceRecord>>,
    {
        let mut grouped: BTreeMap<String, Vec<Arc<InstanceRecord>>> = BTreeMap::new();
        for record in records {
            grouped.entry(record.app_name.clone()).or_default().push(record);
        }
        let applications = grouped
            .into_iter()
            .map(|(name, mut instances)| {
                instances.sort_by(|a, b| a.id.cmp(&b.id));
                Application { name, instances }
            })
            .collect();
        let mut apps = Self {
            version: 0,
            apps_hash_code: String::new(),
            applications,
        };
        apps.apps_hash_code = apps.reconcile_hash_code();
        apps
    }

    pub fn add_application(&mut self, app: Application) {
        self.applications.push(app);
    }

    pub fn application(&self, name: &str) -> Option<&Application> {
        self.applications.iter().find(|app| app.name == name)
    }

    pub fn instance_count(&self) -> usize {
        self.applications.iter().map(Application::len).sum()
    }

    /// Status histogram of every instance, `STATUS_count_` per status in
    /// status-name order, e.g. `DOWN_1_UP_2_`.
    pub fn reconcile_hash_code(&self) -> String {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for app in &self.applications {
            for instance in &app.instances {
                *counts.entry(instance.status.as_str()).or_default() += 1;
            }
        }
        hash_code_from_counts(&counts)
    }
}

pub(crate) fn hash_code_from_counts(counts: &BTreeMap<&'static str, usize>) -> String {
    let mut hash = String::new();
    for (status, count) in counts {
        hash.push_str(status);
        hash.push('_');
        hash.push_str(&count.to_string());
        hash.push('_');
    }
    hash
}

/// Count of records per status, keyed by status name.
pub(crate) fn status_counts<'a, I>(records: I) -> BTreeMap<&'static str, usize>
where
    I: IntoIterator<Item = &'a InstanceRecord>,
{
    let mut counts = BTreeMap::new();
    for record in records {
        let status: InstanceStatus = record.status;
        *counts.entry(status.as_str()).or_default() += 1;
    }
    counts
}
