//! Hub provisioning monitor
//!
//! Follows tenants whose hub is not deployed yet: requests the hub when it
//! does not exist, and once it reports `Active` publishes its connection
//! string, requests the provisioning service and marks the tenant deployed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::clients::{JobControl, KeyValueStore};
use crate::errors::ManagerError;
use crate::models::tenant::Tenant;
use crate::workers::reconciler::{save_tenant, TENANTS_COLLECTION};

/// Tenant-scoped application settings
pub const APP_CONFIG_COLLECTION: &str = "app-config";

/// Hub monitor worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Delay between two cycles
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

/// Settings key holding the hub connection string of a tenant
pub fn connection_string_key(tenant_id: &str) -> String {
    format!("tenant:{}:iotHubConnectionString", tenant_id)
}

/// Blob container receiving device file uploads
pub fn file_upload_container(tenant_id: &str) -> String {
    format!("{}-iot-file-upload", tenant_id)
}

pub fn hub_template(tenant: &Tenant) -> serde_json::Value {
    json!({
        "resourceType": "iotHub",
        "hubName": tenant.iot_hub_name,
        "tenantId": tenant.tenant_id,
    })
}

pub fn provisioning_service_template(tenant: &Tenant, connection_string: &str) -> serde_json::Value {
    json!({
        "resourceType": "provisioningService",
        "dpsName": tenant.dps_name,
        "tenantId": tenant.tenant_id,
        "iotHubConnectionString": connection_string,
    })
}

/// Progress of a tenant hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubProgress {
    /// Hub creation was requested
    Requested,
    /// Hub exists but is not active yet
    Waiting,
    /// Hub is active and the tenant is marked deployed
    Deployed,
}

pub struct HubMonitor {
    storage: Arc<dyn KeyValueStore>,
    jobs: Arc<dyn JobControl>,
}

impl HubMonitor {
    pub fn new(storage: Arc<dyn KeyValueStore>, jobs: Arc<dyn JobControl>) -> Self {
        Self { storage, jobs }
    }

    /// Check every tenant without a deployed hub, returns how many got deployed
    pub async fn run_cycle(&self) -> Result<usize, ManagerError> {
        let mut deployed = 0;
        for value in self.storage.get_all(TENANTS_COLLECTION).await? {
            let mut tenant: Tenant = match serde_json::from_str(&value.data) {
                Ok(tenant) => tenant,
                Err(e) => {
                    error!("Unreadable tenant record {}: {}", value.key, e);
                    continue;
                }
            };
            if tenant.iot_hub_deployed {
                continue;
            }
            tenant.etag = Some(value.etag);

            match self.check_tenant(&mut tenant).await {
                Ok(HubProgress::Deployed) => deployed += 1,
                Ok(progress) => debug!("Hub of tenant {}: {:?}", tenant.tenant_id, progress),
                Err(e) => error!("Failed to check hub of tenant {}: {}", tenant.tenant_id, e),
            }
        }
        Ok(deployed)
    }

    pub async fn check_tenant(&self, tenant: &mut Tenant) -> Result<HubProgress, ManagerError> {
        self.jobs
            .ensure_blob_container(&file_upload_container(&tenant.tenant_id))
            .await?;

        let hub = match self.jobs.get_hub(&tenant.iot_hub_name).await {
            Ok(hub) => hub,
            Err(e) if e.is_not_found() => {
                info!("Hub {} not found, requesting it", tenant.iot_hub_name);
                self.jobs.deploy_template(hub_template(tenant)).await?;
                return Ok(HubProgress::Requested);
            }
            Err(e) => return Err(e),
        };
        if !hub.is_active() {
            return Ok(HubProgress::Waiting);
        }

        let connection_string = self.jobs.hub_connection_string(&hub.name).await?;
        self.storage
            .update(
                APP_CONFIG_COLLECTION,
                &connection_string_key(&tenant.tenant_id),
                &connection_string,
                None,
            )
            .await?;
        self.jobs
            .deploy_template(provisioning_service_template(tenant, &connection_string))
            .await?;

        tenant.iot_hub_deployed = true;
        save_tenant(self.storage.as_ref(), tenant).await?;
        info!("Hub {} of tenant {} is deployed", hub.name, tenant.tenant_id);
        Ok(HubProgress::Deployed)
    }
}

/// Run the hub monitor worker
pub async fn run<S, F>(
    options: &Options,
    monitor: &HubMonitor,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Hub monitor worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Hub monitor worker shutting down...");
                return;
            }
            result = monitor.run_cycle() => {
                if let Err(e) = result {
                    warn!("Failed to list tenants: {}", e);
                }
            }
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Hub monitor worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
