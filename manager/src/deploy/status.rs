//! Per-device deployment status

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, error};

use crate::clients::HubRegistry;
use crate::models::configuration::ManagedConfiguration;
use crate::models::deployment::{
    count_by_status, DeploymentMetrics, DeviceStatus, PackageType, FIRMWARE_CONFIG_TYPE,
};

/// Replaced by the configuration id before a status query runs
pub const DEPLOYMENT_ID_PLACEHOLDER: &str = "{deploymentId}";

/// Custom metric overriding the built-in succeeded query
pub const SUCCESS_QUERY_NAME: &str = "current";

/// Custom metric overriding the built-in failed query
pub const FAILED_QUERY_NAME: &str = "error";

const EDGE_APPLIED: &str = "SELECT deviceId FROM devices.modules WHERE moduleId = '$edgeAgent' \
    AND configurations.[[{deploymentId}]].status = 'Applied'";
const EDGE_SUCCEEDED: &str = "SELECT deviceId FROM devices.modules WHERE moduleId = '$edgeAgent' \
    AND configurations.[[{deploymentId}]].status = 'Applied' \
    AND properties.desired.$version = properties.reported.lastDesiredVersion \
    AND properties.reported.lastDesiredStatus.code = 200";
const EDGE_FAILED: &str = "SELECT deviceId FROM devices.modules WHERE moduleId = '$edgeAgent' \
    AND configurations.[[{deploymentId}]].status = 'Applied' \
    AND properties.desired.$version = properties.reported.lastDesiredVersion \
    AND properties.reported.lastDesiredStatus.code != 200";
const DEVICE_APPLIED: &str =
    "SELECT deviceId FROM devices WHERE configurations.[[{deploymentId}]].status = 'Applied'";
const FIRMWARE_SUCCEEDED: &str = "SELECT deviceId FROM devices \
    WHERE configurations.[[{deploymentId}]].status = 'Applied' \
    AND properties.reported.firmware.fwUpdateStatus = 'Current'";
const FIRMWARE_FAILED: &str = "SELECT deviceId FROM devices \
    WHERE configurations.[[{deploymentId}]].status = 'Applied' \
    AND properties.reported.firmware.fwUpdateStatus = 'Error'";

/// Hub queries used to classify the devices of a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusQueries {
    /// Success and failure are observable
    Tracked {
        applied: String,
        succeeded: String,
        failed: String,
    },
    /// Only application is observable, every applied device is `Unknown`
    AppliedOnly { applied: String },
}

/// Whether the outcome of a deployment can be observed per device
pub fn is_status_tracked(package_type: PackageType, config_type: Option<&str>) -> bool {
    match package_type {
        PackageType::EdgeManifest => true,
        PackageType::DeviceConfiguration => config_type == Some(FIRMWARE_CONFIG_TYPE),
    }
}

/// Built-in status queries, still containing the id placeholder
pub fn default_status_queries(package_type: PackageType, config_type: Option<&str>) -> StatusQueries {
    match package_type {
        PackageType::EdgeManifest => StatusQueries::Tracked {
            applied: EDGE_APPLIED.to_string(),
            succeeded: EDGE_SUCCEEDED.to_string(),
            failed: EDGE_FAILED.to_string(),
        },
        PackageType::DeviceConfiguration if is_status_tracked(package_type, config_type) => {
            StatusQueries::Tracked {
                applied: DEVICE_APPLIED.to_string(),
                succeeded: FIRMWARE_SUCCEEDED.to_string(),
                failed: FIRMWARE_FAILED.to_string(),
            }
        }
        PackageType::DeviceConfiguration => StatusQueries::AppliedOnly {
            applied: DEVICE_APPLIED.to_string(),
        },
    }
}

/// Status queries of a configuration, custom metrics first, with the id filled in
pub fn status_queries(managed: &ManagedConfiguration) -> StatusQueries {
    let id = managed.id();
    let bind = |q: &str| q.replace(DEPLOYMENT_ID_PLACEHOLDER, id);
    let custom = &managed.inner().metrics.queries;

    match default_status_queries(managed.package_type(), managed.config_type()) {
        StatusQueries::Tracked {
            applied,
            succeeded,
            failed,
        } => StatusQueries::Tracked {
            applied: bind(&applied),
            succeeded: bind(custom.get(SUCCESS_QUERY_NAME).unwrap_or(&succeeded)),
            failed: bind(custom.get(FAILED_QUERY_NAME).unwrap_or(&failed)),
        },
        StatusQueries::AppliedOnly { applied } => StatusQueries::AppliedOnly {
            applied: bind(&applied),
        },
    }
}

/// Classify applied devices; success wins over failure
pub fn classify(
    applied: &[String],
    succeeded: &HashSet<String>,
    failed: &HashSet<String>,
) -> BTreeMap<String, DeviceStatus> {
    applied
        .iter()
        .map(|device| {
            let status = if succeeded.contains(device) {
                DeviceStatus::Succeeded
            } else if failed.contains(device) {
                DeviceStatus::Failed
            } else {
                DeviceStatus::Pending
            };
            (device.clone(), status)
        })
        .collect()
}

async fn devices_in_query(hub: &dyn HubRegistry, query: &str) -> Vec<String> {
    match hub.query_devices(query).await {
        Ok(devices) => devices,
        Err(e) => {
            error!("Error getting status of devices in query {}: {}", query, e);
            Vec::new()
        }
    }
}

/// Live status of every device the configuration was applied to
pub async fn device_statuses(
    hub: &dyn HubRegistry,
    managed: &ManagedConfiguration,
) -> BTreeMap<String, DeviceStatus> {
    match status_queries(managed) {
        StatusQueries::AppliedOnly { applied } => devices_in_query(hub, &applied)
            .await
            .into_iter()
            .map(|device| (device, DeviceStatus::Unknown))
            .collect(),
        StatusQueries::Tracked {
            applied,
            succeeded,
            failed,
        } => {
            let (applied, succeeded, failed) = futures::join!(
                devices_in_query(hub, &applied),
                devices_in_query(hub, &succeeded),
                devices_in_query(hub, &failed),
            );
            debug!(
                "Deployment {}: {} applied, {} succeeded, {} failed",
                managed.id(),
                applied.len(),
                succeeded.len(),
                failed.len()
            );
            classify(
                &applied,
                &succeeded.into_iter().collect(),
                &failed.into_iter().collect(),
            )
        }
    }
}

/// Hub metrics of a configuration combined with live device statuses
pub async fn live_metrics(hub: &dyn HubRegistry, managed: &ManagedConfiguration) -> DeploymentMetrics {
    let statuses = device_statuses(hub, managed).await;
    let config = managed.inner();
    DeploymentMetrics {
        system_metrics: config.system_metrics.results.clone(),
        custom_metrics: config.metrics.results.clone(),
        device_metrics: count_by_status(&statuses),
        device_statuses: Some(statuses),
    }
}
