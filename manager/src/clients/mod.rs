//! Collaborator interfaces the manager depends on
//!
//! Each trait is the narrow contract a deployment or tenant operation needs
//! from an external service. [`memory`] provides in-process implementations
//! used by tests and by the local run mode.

pub mod memory;

use async_trait::async_trait;

use crate::errors::ManagerError;
use crate::models::configuration::{Configuration, HubConfiguration};
use crate::models::deployment::DeploymentEvent;
use crate::models::device::Device;
use crate::models::package::{DeviceGroup, Package};
use crate::models::tenant::{AnalyticsJob, HubDescription};

/// A value held by the key/value store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub key: String,
    pub data: String,
    pub etag: String,
}

/// Tenant-scoped key/value store with optimistic concurrency
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fails with `NotFound` if the key is absent
    async fn get(&self, collection: &str, key: &str) -> Result<StoredValue, ManagerError>;

    /// All values of a collection, oldest first
    async fn get_all(&self, collection: &str) -> Result<Vec<StoredValue>, ManagerError>;

    /// Insert under a store-assigned key
    async fn create(&self, collection: &str, data: &str) -> Result<StoredValue, ManagerError>;

    /// Insert or replace; with an etag the write fails with `Conflict` when stale
    async fn update(
        &self,
        collection: &str,
        key: &str,
        data: &str,
        etag: Option<&str>,
    ) -> Result<StoredValue, ManagerError>;

    /// Deleting an absent key succeeds
    async fn delete(&self, collection: &str, key: &str) -> Result<(), ManagerError>;
}

/// Per-tenant device hub configuration registry
#[async_trait]
pub trait HubRegistry: Send + Sync {
    /// Submit a configuration, returns it with the assigned id and creation time
    async fn add_configuration(&self, config: Configuration) -> Result<Configuration, ManagerError>;

    /// Fails with `NotFound` if absent
    async fn get_configuration(&self, id: &str) -> Result<HubConfiguration, ManagerError>;

    async fn list_configurations(&self, max: usize) -> Result<Vec<HubConfiguration>, ManagerError>;

    async fn remove_configuration(&self, id: &str) -> Result<(), ManagerError>;

    /// Device ids matched by a hub query
    async fn query_devices(&self, query: &str) -> Result<Vec<String>, ManagerError>;
}

/// Resolves device queries into device records
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn list_devices(&self, query: &str) -> Result<Vec<Device>, ManagerError>;
}

/// Package and device group lookups
#[async_trait]
pub trait PackageCatalog: Send + Sync {
    async fn get_package(&self, package_id: &str) -> Result<Package, ManagerError>;

    async fn get_device_group(&self, device_group_id: &str) -> Result<DeviceGroup, ManagerError>;
}

/// Sink for deployment audit events
#[async_trait]
pub trait DeploymentEventLog: Send + Sync {
    async fn log_event(&self, event: DeploymentEvent) -> Result<(), ManagerError>;
}

/// Control over long-running external resources of a tenant
///
/// Every lookup or delete of an absent resource fails with `NotFound`.
#[async_trait]
pub trait JobControl: Send + Sync {
    async fn get_job(&self, name: &str) -> Result<AnalyticsJob, ManagerError>;

    async fn stop_job(&self, name: &str) -> Result<(), ManagerError>;

    async fn delete_job(&self, name: &str) -> Result<(), ManagerError>;

    async fn get_hub(&self, name: &str) -> Result<HubDescription, ManagerError>;

    async fn delete_hub(&self, name: &str) -> Result<(), ManagerError>;

    async fn hub_connection_string(&self, hub_name: &str) -> Result<String, ManagerError>;

    async fn delete_provisioning_service(&self, name: &str) -> Result<(), ManagerError>;

    async fn deploy_template(&self, template: serde_json::Value) -> Result<(), ManagerError>;

    async fn ensure_blob_container(&self, name: &str) -> Result<(), ManagerError>;

    async fn add_consumer_group(
        &self,
        hub_name: &str,
        endpoint: &str,
        group_name: &str,
    ) -> Result<(), ManagerError>;
}
