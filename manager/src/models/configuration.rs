//! Hub-native configuration models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::deployment::PackageType;

/// Label marking configurations created by this system
pub const MANAGED_LABEL: &str = "RMDeployment";
pub const NAME_LABEL: &str = "Name";
pub const DEVICE_GROUP_ID_LABEL: &str = "DeviceGroupId";
pub const DEVICE_GROUP_NAME_LABEL: &str = "DeviceGroupName";
pub const PACKAGE_NAME_LABEL: &str = "PackageName";
pub const PACKAGE_TYPE_LABEL: &str = "Type";
pub const CONFIG_TYPE_LABEL: &str = "ConfigType";

/// Content applied to targeted devices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_content: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules_content: Option<serde_json::Value>,
}

/// Metric queries and their last evaluated results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationMetrics {
    #[serde(default)]
    pub queries: BTreeMap<String, String>,

    #[serde(default)]
    pub results: BTreeMap<String, i64>,
}

/// A configuration object as held by the hub registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub priority: i64,

    #[serde(default)]
    pub target_condition: String,

    #[serde(default)]
    pub content: ConfigurationContent,

    #[serde(default)]
    pub metrics: ConfigurationMetrics,

    #[serde(default)]
    pub system_metrics: ConfigurationMetrics,

    #[serde(default = "epoch")]
    pub created_time_utc: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Configuration {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    fn is_managed(&self) -> bool {
        self.label(MANAGED_LABEL)
            .and_then(|v| v.trim().to_ascii_lowercase().parse::<bool>().ok())
            .unwrap_or(false)
    }

    /// Edge deployments carry modules content
    pub fn is_edge(&self) -> bool {
        self.content.modules_content.is_some()
    }
}

/// A configuration classified at the registry boundary
#[derive(Debug, Clone)]
pub enum HubConfiguration {
    /// Created by this system
    Managed(ManagedConfiguration),
    /// Created by someone else and never touched here
    Foreign(Configuration),
}

impl From<Configuration> for HubConfiguration {
    fn from(config: Configuration) -> Self {
        if config.is_managed() {
            HubConfiguration::Managed(ManagedConfiguration(config))
        } else {
            HubConfiguration::Foreign(config)
        }
    }
}

impl HubConfiguration {
    pub fn managed(self) -> Option<ManagedConfiguration> {
        match self {
            HubConfiguration::Managed(config) => Some(config),
            HubConfiguration::Foreign(_) => None,
        }
    }
}

/// A configuration known to carry the system marker label
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedConfiguration(Configuration);

impl ManagedConfiguration {
    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn inner(&self) -> &Configuration {
        &self.0
    }

    pub fn priority(&self) -> i64 {
        self.0.priority
    }

    pub fn created_time_utc(&self) -> DateTime<Utc> {
        self.0.created_time_utc
    }

    pub fn device_group_id(&self) -> &str {
        self.0.label(DEVICE_GROUP_ID_LABEL).unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.0.label(NAME_LABEL).unwrap_or_default()
    }

    pub fn package_type(&self) -> PackageType {
        if self.0.is_edge() {
            PackageType::EdgeManifest
        } else {
            PackageType::DeviceConfiguration
        }
    }

    pub fn config_type(&self) -> Option<&str> {
        self.0.label(CONFIG_TYPE_LABEL)
    }
}
