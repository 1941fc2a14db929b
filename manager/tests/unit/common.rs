//! Shared fixtures

use std::collections::BTreeMap;
use std::sync::Arc;

use iot_manager::clients::memory::{
    MemoryDeviceDirectory, MemoryEventLog, MemoryHubRegistry, MemoryKeyValueStore,
    MemoryPackageCatalog,
};
use iot_manager::deploy::store::DeploymentStore;
use iot_manager::deploy::status::{default_status_queries, StatusQueries, DEPLOYMENT_ID_PLACEHOLDER};
use iot_manager::models::deployment::{Deployment, PackageType};
use iot_manager::models::device::{Device, Twin};

pub const GROUP: &str = "group-1";

pub struct Harness {
    pub storage: Arc<MemoryKeyValueStore>,
    pub hub: Arc<MemoryHubRegistry>,
    pub devices: Arc<MemoryDeviceDirectory>,
    pub catalog: Arc<MemoryPackageCatalog>,
    pub events: Arc<MemoryEventLog>,
    pub store: Arc<DeploymentStore>,
}

impl Harness {
    pub fn new() -> Self {
        let storage = Arc::new(MemoryKeyValueStore::new());
        let hub = Arc::new(MemoryHubRegistry::new());
        let devices = Arc::new(MemoryDeviceDirectory::new());
        let catalog = Arc::new(MemoryPackageCatalog::new());
        let events = Arc::new(MemoryEventLog::new());
        let store = Arc::new(DeploymentStore::new(
            "tenant-1",
            storage.clone(),
            hub.clone(),
            devices.clone(),
            catalog.clone(),
            events.clone(),
        ));

        Self {
            storage,
            hub,
            devices,
            catalog,
            events,
            store,
        }
    }

    /// Register which devices the firmware status queries of a deployment return
    pub fn set_firmware_statuses(
        &self,
        deployment_id: &str,
        applied: &[&str],
        succeeded: &[&str],
        failed: &[&str],
    ) {
        let StatusQueries::Tracked {
            applied: applied_query,
            succeeded: succeeded_query,
            failed: failed_query,
        } = default_status_queries(PackageType::DeviceConfiguration, Some("Firmware"))
        else {
            panic!("firmware deployments are status tracked");
        };

        let bind = |q: &str| q.replace(DEPLOYMENT_ID_PLACEHOLDER, deployment_id);
        self.hub.set_query_result(&bind(&applied_query), applied);
        self.hub.set_query_result(&bind(&succeeded_query), succeeded);
        self.hub.set_query_result(&bind(&failed_query), failed);
    }

    /// Register which devices report a deployment of a status-untracked type as applied
    pub fn set_applied_devices(&self, deployment_id: &str, config_type: &str, applied: &[&str]) {
        let StatusQueries::AppliedOnly { applied: applied_query } =
            default_status_queries(PackageType::DeviceConfiguration, Some(config_type))
        else {
            panic!("{} deployments only track applied devices", config_type);
        };

        let bound = applied_query.replace(DEPLOYMENT_ID_PLACEHOLDER, deployment_id);
        self.hub.set_query_result(&bound, applied);
    }

    pub fn add_device(&self, id: &str, firmware_version: &str) {
        let mut reported = BTreeMap::new();
        reported.insert("firmwareVersion".to_string(), serde_json::json!(firmware_version));
        self.devices.upsert(Device {
            id: id.to_string(),
            twin: Some(Twin {
                device_id: id.to_string(),
                reported_properties: reported,
                ..Default::default()
            }),
        });
    }
}

pub fn firmware(name: &str, priority: i64) -> Deployment {
    Deployment {
        name: name.to_string(),
        device_group_id: GROUP.to_string(),
        device_group_query: Some("tags.site = 'north'".to_string()),
        package_content: Some(r#"{"content":{"deviceContent":{"properties.desired.firmware":{}}}}"#.to_string()),
        package_type: PackageType::DeviceConfiguration,
        config_type: Some("Firmware".to_string()),
        priority,
        ..Default::default()
    }
}

pub fn edge(name: &str, priority: i64) -> Deployment {
    Deployment {
        name: name.to_string(),
        device_group_id: GROUP.to_string(),
        device_ids: vec!["edge-1".to_string()],
        package_content: Some(r#"{"modulesContent":{"$edgeAgent":{}}}"#.to_string()),
        package_type: PackageType::EdgeManifest,
        priority,
        ..Default::default()
    }
}
