//! Instance records and field-level deltas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Health status of a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Up,
    Down,
    Starting,
    OutOfService,
    Unknown,
}

impl InstanceStatus {
    pub const ALL: [InstanceStatus; 5] = [
        Self::Up,
        Self::Down,
        Self::Starting,
        Self::OutOfService,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Starting => "STARTING",
            Self::OutOfService => "OUT_OF_SERVICE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl Default for InstanceStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown instance status: {s}"))
    }
}

/// Kind of change a record represents in a delta payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Added,
    Modified,
    Deleted,
}

/// A registered service instance.
///
/// Records are immutable once shared: every write produces a new record and
/// the registry holds them behind `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub app_name: String,
    pub host_name: String,
    pub ip_addr: String,
    pub port: Option<u16>,
    pub secure_port: Option<u16>,
    pub status: InstanceStatus,
    pub overridden_status: InstanceStatus,
    /// Comma-separated VIP list.
    pub vip_address: Option<String>,
    /// Comma-separated secure VIP list.
    pub secure_vip_address: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Last time the instance data changed at its origin.
    pub last_dirty_timestamp: u64,
    /// Last time the registry accepted a write for this record.
    pub last_updated_timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<ActionType>,
}

impl InstanceRecord {
    /// Start building a record.
    pub fn builder(id: impl Into<String>, app_name: impl Into<String>) -> InstanceRecordBuilder {
        InstanceRecordBuilder::new(id, app_name)
    }

    /// VIP names this instance serves, split on commas.
    pub fn vip_addresses(&self) -> impl Iterator<Item = &str> {
        split_addresses(self.vip_address.as_deref())
    }

    /// Secure VIP names this instance serves, split on commas.
    pub fn secure_vip_addresses(&self) -> impl Iterator<Item = &str> {
        split_addresses(self.secure_vip_address.as_deref())
    }

    /// Copy of this record with a new status.
    pub fn with_status(&self, status: InstanceStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Field-level deltas that turn `older` into `self`.
    ///
    /// Registry bookkeeping (`last_updated_timestamp`, `action_type`) is not
    /// compared.
    pub fn diff_older(&self, older: &InstanceRecord) -> Vec<Delta> {
        let mut deltas = Vec::new();
        if self.app_name != older.app_name {
            deltas.push(Delta::AppName(self.app_name.clone()));
        }
        if self.host_name != older.host_name {
            deltas.push(Delta::HostName(self.host_name.clone()));
        }
        if self.ip_addr != older.ip_addr {
            deltas.push(Delta::IpAddr(self.ip_addr.clone()));
        }
        if self.port != older.port {
            deltas.push(Delta::Port(self.port));
        }
        if self.secure_port != older.secure_port {
            deltas.push(Delta::SecurePort(self.secure_port));
        }
        if self.status != older.status {
            deltas.push(Delta::Status(self.status));
        }
        if self.overridden_status != older.overridden_status {
            deltas.push(Delta::OverriddenStatus(self.overridden_status));
        }
        if self.vip_address != older.vip_address {
            deltas.push(Delta::VipAddress(self.vip_address.clone()));
        }
        if self.secure_vip_address != older.secure_vip_address {
            deltas.push(Delta::SecureVipAddress(self.secure_vip_address.clone()));
        }
        if self.metadata != older.metadata {
            deltas.push(Delta::Metadata(self.metadata.clone()));
        }
        if self.last_dirty_timestamp != older.last_dirty_timestamp {
            deltas.push(Delta::LastDirtyTimestamp(self.last_dirty_timestamp));
        }
        deltas
    }
}

pub(crate) fn split_addresses(list: Option<&str>) -> impl Iterator<Item = &str> {
    list.unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

/// One changed field with its new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum Delta {
    AppName(String),
    HostName(String),
    IpAddr(String),
    Port(Option<u16>),
    SecurePort(Option<u16>),
    Status(InstanceStatus),
    OverriddenStatus(InstanceStatus),
    VipAddress(Option<String>),
    SecureVipAddress(Option<String>),
    Metadata(BTreeMap<String, String>),
    LastDirtyTimestamp(u64),
}

impl Delta {
    /// Name of the changed field.
    pub fn field(&self) -> &'static str {
        match self {
            Self::AppName(_) => "app_name",
            Self::HostName(_) => "host_name",
            Self::IpAddr(_) => "ip_addr",
            Self::Port(_) => "port",
            Self::SecurePort(_) => "secure_port",
            Self::Status(_) => "status",
            Self::OverriddenStatus(_) => "overridden_status",
            Self::VipAddress(_) => "vip_address",
            Self::SecureVipAddress(_) => "secure_vip_address",
            Self::Metadata(_) => "metadata",
            Self::LastDirtyTimestamp(_) => "last_dirty_timestamp",
        }
    }
}

/// Builder for [`InstanceRecord`].
#[derive(Debug, Clone)]
pub struct InstanceRecordBuilder {
    record: InstanceRecord,
}

impl InstanceRecordBuilder {
    fn new(id: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            record: InstanceRecord {
                id: id.into(),
                app_name: app_name.into(),
                host_name: String::new(),
                ip_addr: String::new(),
                port: None,
                secure_port: None,
                status: InstanceStatus::Up,
                overridden_status: InstanceStatus::Unknown,
                vip_address: None,
                secure_vip_address: None,
                metadata: BTreeMap::new(),
                last_dirty_timestamp: 0,
                last_updated_timestamp: 0,
                action_type: None,
            },
        }
    }

    pub fn host_name(mut self, host_name: impl Into<String>) -> Self {
        self.record.host_name = host_name.into();
        self
    }

    pub fn ip_addr(mut self, ip_addr: impl Into<String>) -> Self {
        self.record.ip_addr = ip_addr.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.record.port = Some(port);
        self
    }

    pub fn secure_port(mut self, port: u16) -> Self {
        self.record.secure_port = Some(port);
        self
    }

    pub fn status(mut self, status: InstanceStatus) -> Self {
        self.record.status = status;
        self
    }

    pub fn vip_address(mut self, vip: impl Into<String>) -> Self {
        self.record.vip_address = Some(vip.into());
        self
    }

    pub fn secure_vip_address(mut self, vip: impl Into<String>) -> Self {
        self.record.secure_vip_address = Some(vip.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.record.metadata.insert(key.into(), value.into());
        self
    }

    pub fn last_dirty_timestamp(mut self, ts: u64) -> Self {
        self.record.last_dirty_timestamp = ts;
        self
    }

    pub fn build(self) -> InstanceRecord {
        self.record
    }
}
