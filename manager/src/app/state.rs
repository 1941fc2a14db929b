//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::clients::memory::{
    MemoryDeviceDirectory, MemoryEventLog, MemoryHubRegistry, MemoryJobControl,
    MemoryKeyValueStore, MemoryPackageCatalog,
};
use crate::clients::{
    DeploymentEventLog, DeviceDirectory, HubRegistry, JobControl, KeyValueStore, PackageCatalog,
};
use crate::deploy::store::DeploymentStore;
use crate::errors::ManagerError;
use crate::http::client::HttpClient;
use crate::workers::hub_monitor::HubMonitor;
use crate::workers::reconciler::TenantOperationReconciler;

/// Where a collaborator keeps its state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Lost when the process exits
    Memory,
    /// Held by a remote service
    Remote,
}

/// External services the manager talks to
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn KeyValueStore>,
    pub hub: Arc<dyn HubRegistry>,
    pub devices: Arc<dyn DeviceDirectory>,
    pub catalog: Arc<dyn PackageCatalog>,
    pub events: Arc<dyn DeploymentEventLog>,
    pub jobs: Arc<dyn JobControl>,

    pub storage_backing: Backing,
    pub hub_backing: Backing,
    pub jobs_backing: Backing,
}

impl Collaborators {
    /// Every collaborator in process memory
    pub fn in_memory() -> Self {
        Self {
            storage: Arc::new(MemoryKeyValueStore::new()),
            hub: Arc::new(MemoryHubRegistry::new()),
            devices: Arc::new(MemoryDeviceDirectory::new()),
            catalog: Arc::new(MemoryPackageCatalog::new()),
            events: Arc::new(MemoryEventLog::new()),
            jobs: Arc::new(MemoryJobControl::new()),
            storage_backing: Backing::Memory,
            hub_backing: Backing::Memory,
            jobs_backing: Backing::Memory,
        }
    }

    /// Refuse components that would act on remote records through in-memory services
    ///
    /// Remote storage needs a remote hub registry for the deployment API and
    /// remote job control for the reconciler and the hub monitor.
    pub fn check(&self, options: &AppOptions) -> Result<(), ManagerError> {
        if self.storage_backing == Backing::Memory {
            return Ok(());
        }

        if options.enable_server && self.hub_backing == Backing::Memory {
            return Err(ManagerError::ConfigError(
                "Remote storage requires a remote hub registry for the deployment API; \
                 set enable_server to false"
                    .to_string(),
            ));
        }
        if options.enable_reconciler && self.jobs_backing == Backing::Memory {
            return Err(ManagerError::ConfigError(
                "Remote storage requires remote job control for the tenant operation \
                 reconciler; set enable_reconciler to false"
                    .to_string(),
            ));
        }
        if options.enable_hub_monitor && self.jobs_backing == Backing::Memory {
            return Err(ManagerError::ConfigError(
                "Remote storage requires remote job control for the hub monitor; \
                 set enable_hub_monitor to false"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Main application state
pub struct AppState {
    /// Tenant served by this process
    pub tenant_id: String,

    /// Deployment store
    pub deployments: Arc<DeploymentStore>,

    /// Tenant operation reconciler
    pub reconciler: Arc<TenantOperationReconciler>,

    /// Hub provisioning monitor
    pub hub_monitor: Arc<HubMonitor>,
}

impl AppState {
    /// Initialize application state from the options
    ///
    /// The key/value store goes through the storage adapter when one is
    /// configured; the remaining collaborators always run in memory, so the
    /// components that need them must be disabled in that mode.
    pub fn init(options: &AppOptions) -> Result<Self, ManagerError> {
        info!("Initializing application state...");

        let mut collaborators = Collaborators::in_memory();
        match &options.storage_adapter {
            Some(adapter) => {
                info!("Using storage adapter at {}", adapter.base_url);
                collaborators.storage = Arc::new(HttpClient::new(adapter)?);
                collaborators.storage_backing = Backing::Remote;
            }
            None => info!("No storage adapter configured, running on local storage"),
        }
        collaborators.check(options)?;

        Ok(Self::with_collaborators(&options.tenant_id, collaborators))
    }

    pub fn with_collaborators(tenant_id: &str, clients: Collaborators) -> Self {
        let deployments = DeploymentStore::new(
            tenant_id,
            clients.storage.clone(),
            clients.hub,
            clients.devices,
            clients.catalog,
            clients.events,
        );

        Self {
            tenant_id: tenant_id.to_string(),
            deployments: Arc::new(deployments),
            reconciler: Arc::new(TenantOperationReconciler::new(
                clients.storage.clone(),
                clients.jobs.clone(),
            )),
            hub_monitor: Arc::new(HubMonitor::new(clients.storage, clients.jobs)),
        }
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        info!("Shutting down application state...");
        Ok(())
    }
}
