//! Deployment store
//!
//! Keeps the hub registry (live configurations) and the key/value store
//! (durable deployment history) consistent while deployments are created,
//! superseded, deactivated, reactivated and deleted. The hub is authoritative
//! for what is live; the stored records carry tags, audit data and the
//! device-status snapshots taken when a deployment stops being the latest.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::clients::{
    DeploymentEventLog, DeviceDirectory, HubRegistry, KeyValueStore, PackageCatalog, StoredValue,
};
use crate::deploy::convert::{from_configuration, to_configuration};
use crate::deploy::lifecycle::{self, DeploymentState, LifecycleEvent};
use crate::deploy::query::{device_id_list_query, translate_group_query};
use crate::deploy::ranking::{elect, supersedes};
use crate::deploy::status::live_metrics;
use crate::errors::ManagerError;
use crate::models::configuration::{HubConfiguration, ManagedConfiguration};
use crate::models::deployment::{
    Deployment, DeploymentEvent, DeploymentMetrics, EventType, PackageType, LATEST_TAG,
};
use crate::models::device::{Device, Twin};

/// Collection holding one record per deployment, keyed by deployment id
pub const DEPLOYMENTS_COLLECTION: &str = "deployments";

/// Upper bound on configurations the hub lists in one call
pub const MAX_DEPLOYMENTS: usize = 100;

/// Collection holding the device twin snapshots of one deployment
pub fn device_properties_collection(deployment_id: &str) -> String {
    format!("deploymentdevices-{}", deployment_id)
}

/// Reject incomplete requests before any external call
pub fn validate(deployment: &Deployment) -> Result<(), ManagerError> {
    let blank = |value: Option<&str>| value.map_or(true, |v| v.trim().is_empty());

    if deployment.device_group_id.trim().is_empty() {
        return Err(ManagerError::ValidationError(
            "deviceGroupId must be provided".to_string(),
        ));
    }
    if blank(deployment.device_group_query.as_deref()) && deployment.device_ids.is_empty() {
        return Err(ManagerError::ValidationError(
            "deviceGroupQuery or deviceIds must be provided".to_string(),
        ));
    }
    if deployment.name.trim().is_empty() {
        return Err(ManagerError::ValidationError("name must be provided".to_string()));
    }
    if blank(deployment.package_content.as_deref()) {
        return Err(ManagerError::ValidationError(
            "packageContent must be provided".to_string(),
        ));
    }
    if deployment.package_type == PackageType::DeviceConfiguration
        && blank(deployment.config_type.as_deref())
    {
        return Err(ManagerError::ValidationError(
            "configType must be provided for device configurations".to_string(),
        ));
    }
    if deployment.priority < 0 {
        return Err(ManagerError::ValidationError(format!(
            "The priority provided should be 0 or greater, got {}",
            deployment.priority
        )));
    }
    Ok(())
}

fn parse_deployment(value: StoredValue) -> Result<Deployment, ManagerError> {
    let mut deployment: Deployment = serde_json::from_str(&value.data)?;
    deployment.id = value.key;
    deployment.etag = Some(value.etag);
    Ok(deployment)
}

/// Priority-reconciliation engine over the hub registry and the key/value store
pub struct DeploymentStore {
    tenant_id: String,
    storage: Arc<dyn KeyValueStore>,
    hub: Arc<dyn HubRegistry>,
    devices: Arc<dyn DeviceDirectory>,
    catalog: Arc<dyn PackageCatalog>,
    events: Arc<dyn DeploymentEventLog>,

    /// Serializes supersession and election within a device group
    group_locks: GroupLocks,
}

type GroupLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds one device group's lock; the map entry goes away with its last user
struct GroupGuard<'a> {
    locks: &'a GroupLocks,
    device_group_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for GroupGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let unused = locks
            .get(&self.device_group_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if unused {
            locks.remove(&self.device_group_id);
        }
    }
}

impl DeploymentStore {
    pub fn new(
        tenant_id: &str,
        storage: Arc<dyn KeyValueStore>,
        hub: Arc<dyn HubRegistry>,
        devices: Arc<dyn DeviceDirectory>,
        catalog: Arc<dyn PackageCatalog>,
        events: Arc<dyn DeploymentEventLog>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            storage,
            hub,
            devices,
            catalog,
            events,
            group_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    async fn lock_group(&self, device_group_id: &str) -> GroupGuard<'_> {
        let lock = {
            let mut locks = self.group_locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(device_group_id.to_string()).or_default().clone()
        };
        GroupGuard {
            locks: &self.group_locks,
            device_group_id: device_group_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    // =================================== CREATE ==================================== //

    /// Create a deployment and settle which deployment of its group is latest
    pub async fn create(&self, mut deployment: Deployment, actor_id: &str) -> Result<Deployment, ManagerError> {
        validate(&deployment)?;
        let config = to_configuration(&deployment)?;

        let _guard = self.lock_group(&deployment.device_group_id).await;

        let becomes_latest = self
            .reconcile_supersession(&deployment.device_group_id, deployment.priority)
            .await?;

        let created = self.hub.add_configuration(config).await.map_err(|e| match e {
            ManagerError::ExternalDependency(_) => e,
            other => ManagerError::ExternalDependency(format!(
                "Failed to submit configuration: {}",
                other
            )),
        })?;
        deployment.id = created.id.clone();
        deployment.created_date_time_utc = created.created_time_utc;

        if becomes_latest {
            deployment.add_tag(LATEST_TAG);
        } else {
            deployment.remove_tag(LATEST_TAG);
            deployment.deployment_metrics = match HubConfiguration::from(created).managed() {
                Some(managed) => Some(live_metrics(self.hub.as_ref(), &managed).await),
                None => Some(DeploymentMetrics::default()),
            };
        }

        self.persist(&mut deployment, actor_id).await?;
        info!(
            "Created deployment {} in device group {} (priority {}, latest: {})",
            deployment.id, deployment.device_group_id, deployment.priority, becomes_latest
        );

        self.log_event(EventType::DeploymentCreate, &deployment.id, actor_id).await;
        Ok(deployment)
    }

    /// Decide whether a newcomer of the given priority becomes latest
    ///
    /// When it does, the current latest of the group is demoted first: its
    /// live device statuses are frozen into its stored record together with
    /// the twins of its devices.
    pub async fn reconcile_supersession(
        &self,
        device_group_id: &str,
        new_priority: i64,
    ) -> Result<bool, ManagerError> {
        let live = self.list_managed().await?;
        let Some(top) = elect(live, device_group_id) else {
            debug!("Device group {} has no live deployment", device_group_id);
            return Ok(true);
        };

        if !supersedes(new_priority, top.priority()) {
            debug!(
                "Priority {} does not supersede deployment {} (priority {})",
                new_priority,
                top.id(),
                top.priority()
            );
            return Ok(false);
        }

        self.demote(&top).await?;
        Ok(true)
    }

    async fn demote(&self, top: &ManagedConfiguration) -> Result<(), ManagerError> {
        let mut current = match self.load(top.id()).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => {
                warn!("Superseded deployment {} has no stored record", top.id());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let metrics = live_metrics(self.hub.as_ref(), top).await;
        let twins = self.device_twins(&metrics).await?;
        current.deployment_metrics = Some(metrics);

        if let Err(e) = lifecycle::apply(&mut current, LifecycleEvent::Demote) {
            warn!("Deployment {}: {}", current.id, e);
        }
        self.write(&mut current).await?;
        self.store_twins(&current.id, &twins).await?;

        info!("Deployment {} is no longer latest", current.id);
        Ok(())
    }

    // ==================================== READ ===================================== //

    /// Fetch one deployment, live from the hub or from stored history
    pub async fn get(
        &self,
        id: &str,
        include_device_status: bool,
        is_latest: bool,
    ) -> Result<Deployment, ManagerError> {
        if id.trim().is_empty() {
            return Err(ManagerError::ValidationError("deployment id must be provided".to_string()));
        }

        if is_latest {
            let managed = self.get_managed(id).await?;
            let mut metrics = live_metrics(self.hub.as_ref(), &managed).await;
            if !include_device_status {
                metrics.device_statuses = None;
            }

            let mut deployment = from_configuration(&managed);
            deployment.deployment_metrics = Some(metrics);
            deployment.tags = vec![LATEST_TAG.to_string()];
            return Ok(deployment);
        }

        let mut deployment = self.load(id).await?;
        deployment.package_content = None;
        if let Some(metrics) = deployment.deployment_metrics.as_mut() {
            metrics.recount();
            if !include_device_status {
                metrics.device_statuses = None;
            }
        }
        Ok(deployment)
    }

    /// Live deployments created by this system, newest first
    pub async fn list(&self) -> Result<Vec<Deployment>, ManagerError> {
        let mut live = self.list_managed().await?;
        live.sort_by(|a, b| b.created_time_utc().cmp(&a.created_time_utc()));
        Ok(live.iter().map(from_configuration).collect())
    }

    /// Stored deployments not marked deleted, newest first
    ///
    /// Records tagged latest carry the metrics the hub currently reports.
    pub async fn list_from_storage(&self) -> Result<Vec<Deployment>, ManagerError> {
        let mut deployments: Vec<Deployment> = self
            .storage
            .get_all(DEPLOYMENTS_COLLECTION)
            .await?
            .into_iter()
            .filter_map(|value| {
                let key = value.key.clone();
                parse_deployment(value)
                    .map_err(|e| warn!("Skipping unreadable deployment record {}: {}", key, e))
                    .ok()
            })
            .filter(|d| !d.is_deleted())
            .collect();
        deployments.sort_by(|a, b| b.created_date_time_utc.cmp(&a.created_date_time_utc));

        if deployments.iter().any(Deployment::is_latest) {
            let live: HashMap<String, ManagedConfiguration> = self
                .list_managed()
                .await?
                .into_iter()
                .map(|managed| (managed.id().to_string(), managed))
                .collect();

            for deployment in deployments.iter_mut().filter(|d| d.is_latest()) {
                if let Some(managed) = live.get(&deployment.id) {
                    let mut metrics = live_metrics(self.hub.as_ref(), managed).await;
                    metrics.device_statuses = None;
                    deployment.deployment_metrics = Some(metrics);
                }
            }
        }

        Ok(deployments)
    }

    /// Devices matching a query, with historical twins unless reading live
    pub async fn get_device_list(
        &self,
        deployment_id: &str,
        query: &str,
        is_latest: bool,
    ) -> Result<Vec<Device>, ManagerError> {
        let query = translate_group_query(query)?;
        let mut devices = self.devices.list_devices(&query).await?;
        if is_latest {
            return Ok(devices);
        }

        let mut snapshots: HashMap<String, Twin> = HashMap::new();
        for value in self
            .storage
            .get_all(&device_properties_collection(deployment_id))
            .await?
        {
            let mut twin: Twin = serde_json::from_str(&value.data)?;
            twin.etag = Some(value.etag);
            snapshots.insert(twin.device_id.clone(), twin);
        }

        if !snapshots.is_empty() {
            for device in devices.iter_mut() {
                device.twin = snapshots.get(&device.id).cloned();
            }
        }
        Ok(devices)
    }

    // =================================== DELETE ==================================== //

    /// Take a deployment off the hub, keeping (or hiding) its history
    pub async fn delete(&self, id: &str, actor_id: &str, is_delete: bool) -> Result<(), ManagerError> {
        if id.trim().is_empty() {
            return Err(ManagerError::ValidationError("deployment id must be provided".to_string()));
        }

        let device_group_id = self.load(id).await?.device_group_id;
        let _guard = self.lock_group(&device_group_id).await;

        let mut existing = self.load(id).await?;
        let state = DeploymentState::of(&existing);

        if state.is_live() {
            let was_latest = state == DeploymentState::Latest;
            let mut twins = Vec::new();

            if was_latest {
                match self.get_managed(id).await {
                    Ok(managed) => {
                        let metrics = live_metrics(self.hub.as_ref(), &managed).await;
                        twins = self.device_twins(&metrics).await?;
                        existing.deployment_metrics = Some(metrics);
                    }
                    Err(e) if e.is_not_found() => {
                        warn!("Latest deployment {} is already gone from the hub", id);
                    }
                    Err(e) => return Err(e),
                }
            }

            match self.hub.remove_configuration(id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!("Configuration {} was already removed from the hub", id);
                }
                Err(e) => return Err(e),
            }

            let event = if is_delete {
                LifecycleEvent::Delete
            } else {
                LifecycleEvent::Deactivate
            };
            lifecycle::apply(&mut existing, event).map_err(ManagerError::Internal)?;
            self.persist(&mut existing, actor_id).await?;
            self.store_twins(id, &twins).await?;
            info!("Deployment {} is now {:?}", id, DeploymentState::of(&existing));

            if was_latest {
                self.elect_latest(&existing.device_group_id).await?;
            }
        } else if state == DeploymentState::Inactive && is_delete {
            lifecycle::apply(&mut existing, LifecycleEvent::Delete).map_err(ManagerError::Internal)?;
            self.persist(&mut existing, actor_id).await?;
            info!("Inactive deployment {} marked deleted", id);
        } else {
            debug!("Deployment {} is {:?}, nothing to delete", id, state);
        }

        self.log_event(EventType::DeploymentDelete, id, actor_id).await;
        Ok(())
    }

    /// Tag the highest-ranked live deployment of a group as latest
    async fn elect_latest(&self, device_group_id: &str) -> Result<(), ManagerError> {
        let live = self.list_managed().await?;
        let Some(winner) = elect(live, device_group_id) else {
            debug!("Device group {} has no remaining live deployment", device_group_id);
            return Ok(());
        };

        let mut stored = match self.load(winner.id()).await {
            Ok(stored) => stored,
            Err(e) if e.is_not_found() => {
                warn!("Elected deployment {} has no stored record", winner.id());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if stored.is_latest() {
            return Ok(());
        }
        match lifecycle::apply(&mut stored, LifecycleEvent::Promote) {
            Ok(_) => {
                self.write(&mut stored).await?;
                info!("Deployment {} elected latest of device group {}", stored.id, device_group_id);
            }
            Err(e) => warn!("Deployment {}: {}", stored.id, e),
        }
        Ok(())
    }

    // ================================= REACTIVATE ================================== //

    /// Re-create the hub configuration of an inactive deployment
    ///
    /// The re-created deployment gets a new id and competes for latest like
    /// any new deployment. The historical record loses its inactive tag.
    pub async fn reactivate(&self, id: &str, actor_id: &str) -> Result<Deployment, ManagerError> {
        let stored = self.load(id).await?;
        match DeploymentState::of(&stored) {
            DeploymentState::Inactive => {}
            DeploymentState::Deleted => {
                return Err(ManagerError::NotFound(format!("Deployment {} was deleted", id)));
            }
            state => {
                return Err(ManagerError::ValidationError(format!(
                    "Deployment {} is {:?}, only inactive deployments can be reactivated",
                    id, state
                )));
            }
        }

        let payload = self.resolve_payload(&stored).await?;
        let created = self.create(payload, actor_id).await?;

        let mut original = self.load(id).await?;
        lifecycle::apply(&mut original, LifecycleEvent::Reactivate).map_err(ManagerError::Internal)?;
        self.persist(&mut original, actor_id).await?;

        info!("Deployment {} reactivated as {}", id, created.id);
        Ok(created)
    }

    /// Fresh creation request from a stored record, filling in referenced content
    async fn resolve_payload(&self, stored: &Deployment) -> Result<Deployment, ManagerError> {
        let mut payload = Deployment {
            id: String::new(),
            tags: Vec::new(),
            deployment_metrics: None,
            created_by: None,
            created_at: None,
            modified_by: None,
            modified_at: None,
            etag: None,
            ..stored.clone()
        };

        let has_content = payload
            .package_content
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        if !has_content {
            if let Some(package_id) = payload.package_id.as_deref().filter(|p| !p.trim().is_empty()) {
                let package = self.catalog.get_package(package_id).await?;
                debug!("Resolved content of deployment {} from package {}", stored.id, package.id);
                payload.package_content = Some(package.content);
            }
        }

        let has_query = payload
            .device_group_query
            .as_deref()
            .is_some_and(|q| !q.trim().is_empty());
        if !has_query && payload.device_ids.is_empty() && !payload.device_group_id.trim().is_empty() {
            let group = self.catalog.get_device_group(&payload.device_group_id).await?;
            payload.device_group_query = Some(serde_json::to_string(&group.conditions)?);
        }

        Ok(payload)
    }

    // ================================== HELPERS ==================================== //

    async fn get_managed(&self, id: &str) -> Result<ManagedConfiguration, ManagerError> {
        match self.hub.get_configuration(id).await? {
            HubConfiguration::Managed(managed) => Ok(managed),
            HubConfiguration::Foreign(_) => Err(ManagerError::NotSupported(format!(
                "Deployment with id {} was created externally and therefore not supported",
                id
            ))),
        }
    }

    /// Live configurations created by this system
    async fn list_managed(&self) -> Result<Vec<ManagedConfiguration>, ManagerError> {
        Ok(self
            .hub
            .list_configurations(MAX_DEPLOYMENTS)
            .await?
            .into_iter()
            .filter_map(HubConfiguration::managed)
            .collect())
    }

    async fn load(&self, id: &str) -> Result<Deployment, ManagerError> {
        let value = self.storage.get(DEPLOYMENTS_COLLECTION, id).await?;
        parse_deployment(value)
    }

    /// Stamp auditing data and write the record
    async fn persist(&self, deployment: &mut Deployment, actor_id: &str) -> Result<(), ManagerError> {
        deployment.stamp_audit(actor_id, Utc::now());
        self.write(deployment).await
    }

    /// Conditional write when the record carries an etag, insert otherwise
    async fn write(&self, deployment: &mut Deployment) -> Result<(), ManagerError> {
        let data = serde_json::to_string(deployment)?;
        let etag = deployment.etag.as_deref().filter(|e| !e.is_empty());
        let stored = self
            .storage
            .update(DEPLOYMENTS_COLLECTION, &deployment.id, &data, etag)
            .await?;
        deployment.etag = Some(stored.etag);
        Ok(())
    }

    async fn device_twins(&self, metrics: &DeploymentMetrics) -> Result<Vec<Twin>, ManagerError> {
        let device_ids: Vec<&String> = metrics
            .device_statuses
            .as_ref()
            .map(|statuses| statuses.keys().collect())
            .unwrap_or_default();
        if device_ids.is_empty() {
            return Ok(Vec::new());
        }

        let devices = self
            .devices
            .list_devices(&device_id_list_query(&device_ids))
            .await?;
        Ok(devices.into_iter().filter_map(|d| d.twin).collect())
    }

    async fn store_twins(&self, deployment_id: &str, twins: &[Twin]) -> Result<(), ManagerError> {
        let collection = device_properties_collection(deployment_id);
        for twin in twins {
            let data = serde_json::to_string(twin)?;
            self.storage.create(&collection, &data).await?;
        }
        if !twins.is_empty() {
            debug!("Stored {} device twins for deployment {}", twins.len(), deployment_id);
        }
        Ok(())
    }

    async fn log_event(&self, event_type: EventType, deployment_id: &str, actor_id: &str) {
        let event = DeploymentEvent {
            event_type,
            deployment_id: deployment_id.to_string(),
            tenant_id: self.tenant_id.clone(),
            actor_id: actor_id.to_string(),
            occurred_at: Utc::now(),
        };
        if let Err(e) = self.events.log_event(event).await {
            warn!("Failed to log {:?} event for deployment {}: {}", event_type, deployment_id, e);
        }
    }
}
