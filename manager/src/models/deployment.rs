//! Deployment models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag carried by the currently-in-effect deployment of a device group
pub const LATEST_TAG: &str = "reserved.latest";

/// Tag carried by deployments whose native configuration was removed
pub const INACTIVE_TAG: &str = "reserved.inactive";

/// Tag carried by deployments hidden from every listing
pub const DELETED_TAG: &str = "reserved.isDeleted";

/// Kind of package pushed by a deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageType {
    #[default]
    EdgeManifest,
    DeviceConfiguration,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::EdgeManifest => "EdgeManifest",
            PackageType::DeviceConfiguration => "DeviceConfiguration",
        }
    }
}

impl std::str::FromStr for PackageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EdgeManifest" => Ok(PackageType::EdgeManifest),
            "DeviceConfiguration" => Ok(PackageType::DeviceConfiguration),
            _ => Err(format!("Invalid package type: {}", s)),
        }
    }
}

/// Device configuration type with status tracking support
pub const FIRMWARE_CONFIG_TYPE: &str = "Firmware";

/// Per-device application status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    Unknown,
    Pending,
    Succeeded,
    Failed,
}

impl DeviceStatus {
    pub const ALL: [DeviceStatus; 4] = [
        DeviceStatus::Unknown,
        DeviceStatus::Pending,
        DeviceStatus::Succeeded,
        DeviceStatus::Failed,
    ];
}

/// Aggregate and per-device metrics of a deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetrics {
    /// Hub-reported system metrics (e.g. `appliedCount`, `targetedCount`)
    #[serde(default)]
    pub system_metrics: BTreeMap<String, i64>,

    /// Results of the configuration's custom metric queries
    #[serde(default)]
    pub custom_metrics: BTreeMap<String, i64>,

    /// Number of devices per status
    #[serde(default)]
    pub device_metrics: BTreeMap<DeviceStatus, u64>,

    /// Status of each device, omitted unless explicitly requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_statuses: Option<BTreeMap<String, DeviceStatus>>,
}

impl DeploymentMetrics {
    /// Recompute the aggregate counts from the per-device map
    pub fn recount(&mut self) {
        let statuses = self.device_statuses.get_or_insert_with(BTreeMap::new);
        self.device_metrics = count_by_status(statuses);
    }
}

/// Count devices in each status, every status present even when zero
pub fn count_by_status(statuses: &BTreeMap<String, DeviceStatus>) -> BTreeMap<DeviceStatus, u64> {
    let mut counts: BTreeMap<DeviceStatus, u64> =
        DeviceStatus::ALL.iter().map(|s| (*s, 0)).collect();
    for status in statuses.values() {
        *counts.entry(*status).or_insert(0) += 1;
    }
    counts
}

/// A named package + target query + priority bundle pushed to a device group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Assigned by the hub registry on create
    #[serde(default)]
    pub id: String,

    pub name: String,

    pub device_group_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_group_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_group_query: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_content: Option<String>,

    #[serde(default)]
    pub package_type: PackageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_type: Option<String>,

    /// Higher wins; ties go to the most recently created
    #[serde(default)]
    pub priority: i64,

    #[serde(default = "epoch")]
    pub created_date_time_utc: DateTime<Utc>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_metrics: Option<DeploymentMetrics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,

    /// Concurrency token of the stored record, never part of the stored value
    #[serde(skip)]
    pub etag: Option<String>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Deployment {
    /// Case-insensitive tag membership
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Add a tag unless already present
    pub fn add_tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.tags.push(tag.to_string());
        }
    }

    /// Remove every occurrence of a tag, returns whether anything was removed
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| !t.eq_ignore_ascii_case(tag));
        before != self.tags.len()
    }

    pub fn is_latest(&self) -> bool {
        self.has_tag(LATEST_TAG)
    }

    pub fn is_inactive(&self) -> bool {
        self.has_tag(INACTIVE_TAG)
    }

    pub fn is_deleted(&self) -> bool {
        self.has_tag(DELETED_TAG)
    }

    /// Stamp creation or modification auditing data
    pub fn stamp_audit(&mut self, actor_id: &str, now: DateTime<Utc>) {
        if self.etag.as_deref().map_or(true, str::is_empty) {
            self.created_by = Some(actor_id.to_string());
            self.created_at = Some(now);
        } else {
            self.modified_by = Some(actor_id.to_string());
            self.modified_at = Some(now);
        }
    }
}

/// Kind of audit event emitted by deployment operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    PackageUpload,
    PackageDelete,
    DeploymentCreate,
    DeploymentDelete,
}

/// Audit event describing a deployment operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEvent {
    pub event_type: EventType,
    pub deployment_id: String,
    pub tenant_id: String,
    pub actor_id: String,
    pub occurred_at: DateTime<Utc>,
}
