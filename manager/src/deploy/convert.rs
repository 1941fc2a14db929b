//! Conversion between deployments and hub configurations

use serde_json::Value;

use crate::deploy::query::target_condition;
use crate::errors::ManagerError;
use crate::models::configuration::{
    Configuration, ConfigurationContent, ConfigurationMetrics, ManagedConfiguration,
    CONFIG_TYPE_LABEL, DEVICE_GROUP_ID_LABEL, DEVICE_GROUP_NAME_LABEL, MANAGED_LABEL, NAME_LABEL,
    PACKAGE_NAME_LABEL, PACKAGE_TYPE_LABEL,
};
use crate::models::deployment::{Deployment, DeploymentMetrics, PackageType};

fn find<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    root.get("content")
        .and_then(|c| c.get(key))
        .or_else(|| root.get(key))
}

/// Build the hub configuration submitted for a deployment
pub fn to_configuration(deployment: &Deployment) -> Result<Configuration, ManagerError> {
    let raw = deployment.package_content.as_deref().unwrap_or_default();
    let package: Value = serde_json::from_str(raw).map_err(|e| {
        ManagerError::ValidationError(format!("packageContent is not valid JSON: {}", e))
    })?;

    let content = match deployment.package_type {
        PackageType::EdgeManifest => ConfigurationContent {
            modules_content: Some(find(&package, "modulesContent").cloned().ok_or_else(|| {
                ManagerError::ValidationError(
                    "Edge manifest packageContent must contain modulesContent".to_string(),
                )
            })?),
            device_content: None,
        },
        PackageType::DeviceConfiguration => ConfigurationContent {
            device_content: Some(find(&package, "deviceContent").cloned().ok_or_else(|| {
                ManagerError::ValidationError(
                    "Device configuration packageContent must contain deviceContent".to_string(),
                )
            })?),
            modules_content: None,
        },
    };

    let queries = package
        .get("metrics")
        .and_then(|m| m.get("queries"))
        .and_then(Value::as_object)
        .map(|queries| {
            queries
                .iter()
                .filter_map(|(name, q)| q.as_str().map(|q| (name.clone(), q.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let mut config = Configuration {
        priority: deployment.priority,
        target_condition: target_condition(deployment)?,
        content,
        metrics: ConfigurationMetrics {
            queries,
            ..Default::default()
        },
        ..Default::default()
    };

    let labels = &mut config.labels;
    labels.insert(NAME_LABEL.to_string(), deployment.name.clone());
    labels.insert(DEVICE_GROUP_ID_LABEL.to_string(), deployment.device_group_id.clone());
    labels.insert(
        PACKAGE_TYPE_LABEL.to_string(),
        deployment.package_type.as_str().to_string(),
    );
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    if let Some(group_name) = &deployment.device_group_name {
        labels.insert(DEVICE_GROUP_NAME_LABEL.to_string(), group_name.clone());
    }
    if let Some(package_name) = &deployment.package_name {
        labels.insert(PACKAGE_NAME_LABEL.to_string(), package_name.clone());
    }
    if deployment.package_type == PackageType::DeviceConfiguration {
        if let Some(config_type) = &deployment.config_type {
            labels.insert(CONFIG_TYPE_LABEL.to_string(), config_type.clone());
        }
    }

    Ok(config)
}

/// Live view of a deployment as the hub knows it, without device statuses
pub fn from_configuration(managed: &ManagedConfiguration) -> Deployment {
    let config = managed.inner();
    let package_content = serde_json::to_string(&serde_json::json!({ "content": config.content })).ok();

    Deployment {
        id: config.id.clone(),
        name: managed.name().to_string(),
        device_group_id: managed.device_group_id().to_string(),
        device_group_name: config.label(DEVICE_GROUP_NAME_LABEL).map(str::to_string),
        device_group_query: Some(config.target_condition.clone()),
        package_name: config.label(PACKAGE_NAME_LABEL).map(str::to_string),
        package_content,
        package_type: managed.package_type(),
        config_type: managed.config_type().map(str::to_string),
        priority: config.priority,
        created_date_time_utc: config.created_time_utc,
        deployment_metrics: Some(DeploymentMetrics {
            system_metrics: config.system_metrics.results.clone(),
            custom_metrics: config.metrics.results.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}
