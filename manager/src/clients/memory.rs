//! In-memory collaborators

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::clients::{
    DeploymentEventLog, DeviceDirectory, HubRegistry, JobControl, KeyValueStore, PackageCatalog,
    StoredValue,
};
use crate::deploy::query::parse_device_id_list;
use crate::errors::ManagerError;
use crate::models::configuration::{Configuration, HubConfiguration};
use crate::models::deployment::DeploymentEvent;
use crate::models::device::Device;
use crate::models::package::{DeviceGroup, Package};
use crate::models::tenant::{AnalyticsJob, HubDescription, JobState};
use crate::utils::generate_uuid;

// ================================ KEY/VALUE STORE ================================== //

#[derive(Debug, Clone)]
struct StoredObject {
    data: String,
    version: u64,
    seq: u64,
}

/// In-memory key/value store with numeric etags
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    collections: RwLock<HashMap<String, HashMap<String, StoredObject>>>,
    seq: AtomicU64,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values in a collection
    pub fn len(&self, collection: &str) -> usize {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        collections.get(collection).map_or(0, HashMap::len)
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }
}

fn etag_of(version: u64) -> String {
    format!("\"{}\"", version)
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, collection: &str, key: &str) -> Result<StoredValue, ManagerError> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        collections
            .get(collection)
            .and_then(|c| c.get(key))
            .map(|obj| StoredValue {
                key: key.to_string(),
                data: obj.data.clone(),
                etag: etag_of(obj.version),
            })
            .ok_or_else(|| ManagerError::NotFound(format!("{}/{}", collection, key)))
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<StoredValue>, ManagerError> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let Some(objects) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<_> = objects.iter().collect();
        entries.sort_by_key(|(_, obj)| obj.seq);
        Ok(entries
            .into_iter()
            .map(|(key, obj)| StoredValue {
                key: key.clone(),
                data: obj.data.clone(),
                etag: etag_of(obj.version),
            })
            .collect())
    }

    async fn create(&self, collection: &str, data: &str) -> Result<StoredValue, ManagerError> {
        let key = generate_uuid();
        let seq = self.next_seq();
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        collections.entry(collection.to_string()).or_default().insert(
            key.clone(),
            StoredObject {
                data: data.to_string(),
                version: 1,
                seq,
            },
        );

        Ok(StoredValue {
            key,
            data: data.to_string(),
            etag: etag_of(1),
        })
    }

    async fn update(
        &self,
        collection: &str,
        key: &str,
        data: &str,
        etag: Option<&str>,
    ) -> Result<StoredValue, ManagerError> {
        let seq = self.next_seq();
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let objects = collections.entry(collection.to_string()).or_default();
        let current = objects.get(key);

        if let Some(expected) = etag.filter(|e| !e.is_empty()) {
            match current {
                Some(obj) if etag_of(obj.version) == expected => {}
                Some(obj) => {
                    return Err(ManagerError::Conflict(format!(
                        "{}/{} has etag {}, expected {}",
                        collection,
                        key,
                        etag_of(obj.version),
                        expected
                    )));
                }
                None => {
                    return Err(ManagerError::Conflict(format!(
                        "{}/{} no longer exists",
                        collection, key
                    )));
                }
            }
        }

        let (version, seq) = current.map_or((1, seq), |obj| (obj.version + 1, obj.seq));
        objects.insert(
            key.to_string(),
            StoredObject {
                data: data.to_string(),
                version,
                seq,
            },
        );

        Ok(StoredValue {
            key: key.to_string(),
            data: data.to_string(),
            etag: etag_of(version),
        })
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), ManagerError> {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        if let Some(objects) = collections.get_mut(collection) {
            objects.remove(key);
        }
        Ok(())
    }
}

// ================================== HUB REGISTRY =================================== //

#[derive(Debug, Default)]
struct HubState {
    configurations: Vec<Configuration>,
    query_results: HashMap<String, Vec<String>>,
    last_created: Option<DateTime<Utc>>,
    next_id: u64,
}

/// In-memory configuration registry
///
/// Query results are registered up front; unregistered queries match nothing.
#[derive(Debug, Default)]
pub struct MemoryHubRegistry {
    state: RwLock<HubState>,
    unavailable: AtomicBool,
}

impl MemoryHubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as an unreachable dependency
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Register the device ids a query evaluates to
    pub fn set_query_result(&self, query: &str, device_ids: &[&str]) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.query_results.insert(
            query.to_string(),
            device_ids.iter().map(|d| d.to_string()).collect(),
        );
    }

    /// Insert a configuration as-is, bypassing id assignment
    pub fn insert_raw(&self, config: Configuration) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.configurations.push(config);
    }

    pub fn contains(&self, id: &str) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.configurations.iter().any(|c| c.id == id)
    }

    fn check_available(&self) -> Result<(), ManagerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ManagerError::ExternalDependency(
                "hub registry unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl HubRegistry for MemoryHubRegistry {
    async fn add_configuration(&self, mut config: Configuration) -> Result<Configuration, ManagerError> {
        self.check_available()?;
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        // Creation times are strictly increasing so recency ties never occur
        let mut created = Utc::now();
        if let Some(last) = state.last_created {
            if created <= last {
                created = last + Duration::milliseconds(1);
            }
        }
        state.last_created = Some(created);
        state.next_id += 1;

        config.id = format!("config-{}", state.next_id);
        config.created_time_utc = created;
        state.configurations.push(config.clone());
        Ok(config)
    }

    async fn get_configuration(&self, id: &str) -> Result<HubConfiguration, ManagerError> {
        self.check_available()?;
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .configurations
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .map(HubConfiguration::from)
            .ok_or_else(|| ManagerError::NotFound(format!("configuration {}", id)))
    }

    async fn list_configurations(&self, max: usize) -> Result<Vec<HubConfiguration>, ManagerError> {
        self.check_available()?;
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .configurations
            .iter()
            .take(max)
            .cloned()
            .map(HubConfiguration::from)
            .collect())
    }

    async fn remove_configuration(&self, id: &str) -> Result<(), ManagerError> {
        self.check_available()?;
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let before = state.configurations.len();
        state.configurations.retain(|c| c.id != id);
        if state.configurations.len() == before {
            return Err(ManagerError::NotFound(format!("configuration {}", id)));
        }
        Ok(())
    }

    async fn query_devices(&self, query: &str) -> Result<Vec<String>, ManagerError> {
        self.check_available()?;
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.query_results.get(query).cloned().unwrap_or_default())
    }
}

// ================================ DEVICE DIRECTORY ================================= //

/// In-memory device directory
///
/// `deviceId IN [...]` queries are evaluated against the known devices;
/// other queries return their registered result, or every device.
#[derive(Debug, Default)]
pub struct MemoryDeviceDirectory {
    devices: RwLock<BTreeMap<String, Device>>,
    query_results: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, device: Device) {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        devices.insert(device.id.clone(), device);
    }

    pub fn set_query_result(&self, query: &str, device_ids: &[&str]) {
        let mut results = self.query_results.write().unwrap_or_else(|e| e.into_inner());
        results.insert(
            query.to_string(),
            device_ids.iter().map(|d| d.to_string()).collect(),
        );
    }
}

#[async_trait]
impl DeviceDirectory for MemoryDeviceDirectory {
    async fn list_devices(&self, query: &str) -> Result<Vec<Device>, ManagerError> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());

        let ids = match parse_device_id_list(query) {
            Some(ids) => Some(ids),
            None => {
                let results = self.query_results.read().unwrap_or_else(|e| e.into_inner());
                results.get(query).cloned()
            }
        };

        Ok(match ids {
            Some(ids) => ids.iter().filter_map(|id| devices.get(id).cloned()).collect(),
            None => devices.values().cloned().collect(),
        })
    }
}

// ================================= PACKAGE CATALOG ================================= //

#[derive(Debug, Default)]
pub struct MemoryPackageCatalog {
    packages: RwLock<HashMap<String, Package>>,
    device_groups: RwLock<HashMap<String, DeviceGroup>>,
}

impl MemoryPackageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_package(&self, package: Package) {
        let mut packages = self.packages.write().unwrap_or_else(|e| e.into_inner());
        packages.insert(package.id.clone(), package);
    }

    pub fn add_device_group(&self, group: DeviceGroup) {
        let mut groups = self.device_groups.write().unwrap_or_else(|e| e.into_inner());
        groups.insert(group.id.clone(), group);
    }
}

#[async_trait]
impl PackageCatalog for MemoryPackageCatalog {
    async fn get_package(&self, package_id: &str) -> Result<Package, ManagerError> {
        let packages = self.packages.read().unwrap_or_else(|e| e.into_inner());
        packages
            .get(package_id)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(format!("package {}", package_id)))
    }

    async fn get_device_group(&self, device_group_id: &str) -> Result<DeviceGroup, ManagerError> {
        let groups = self.device_groups.read().unwrap_or_else(|e| e.into_inner());
        groups
            .get(device_group_id)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(format!("device group {}", device_group_id)))
    }
}

// =================================== EVENT LOG ===================================== //

#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: RwLock<Vec<DeploymentEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DeploymentEvent> {
        self.events.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl DeploymentEventLog for MemoryEventLog {
    async fn log_event(&self, event: DeploymentEvent) -> Result<(), ManagerError> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        events.push(event);
        Ok(())
    }
}

// =================================== JOB CONTROL =================================== //

#[derive(Debug, Default)]
struct JobControlState {
    jobs: HashMap<String, JobState>,
    hubs: HashMap<String, String>,
    provisioning_services: BTreeSet<String>,
    containers: BTreeSet<String>,
    consumer_groups: BTreeSet<(String, String, String)>,
    templates: Vec<serde_json::Value>,
}

/// In-memory job control
///
/// Stopping a job moves it to `Stopping`; deleting removes it. Templates are
/// recorded but never materialize resources on their own.
#[derive(Debug, Default)]
pub struct MemoryJobControl {
    state: RwLock<JobControlState>,
}

impl MemoryJobControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_job(&self, name: &str, job_state: JobState) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.jobs.insert(name.to_string(), job_state);
    }

    pub fn job_state(&self, name: &str) -> Option<JobState> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.jobs.get(name).copied()
    }

    pub fn set_hub(&self, name: &str, hub_state: &str) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.hubs.insert(name.to_string(), hub_state.to_string());
    }

    pub fn has_hub(&self, name: &str) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.hubs.contains_key(name)
    }

    pub fn add_provisioning_service(&self, name: &str) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.provisioning_services.insert(name.to_string());
    }

    pub fn has_provisioning_service(&self, name: &str) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.provisioning_services.contains(name)
    }

    pub fn has_container(&self, name: &str) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.containers.contains(name)
    }

    pub fn has_consumer_group(&self, hub_name: &str, endpoint: &str, group_name: &str) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.consumer_groups.contains(&(
            hub_name.to_string(),
            endpoint.to_string(),
            group_name.to_string(),
        ))
    }

    pub fn templates(&self) -> Vec<serde_json::Value> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.templates.clone()
    }
}

#[async_trait]
impl JobControl for MemoryJobControl {
    async fn get_job(&self, name: &str) -> Result<AnalyticsJob, ManagerError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .jobs
            .get(name)
            .map(|job_state| AnalyticsJob {
                name: name.to_string(),
                state: *job_state,
            })
            .ok_or_else(|| ManagerError::NotFound(format!("analytics job {}", name)))
    }

    async fn stop_job(&self, name: &str) -> Result<(), ManagerError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match state.jobs.get_mut(name) {
            Some(job_state) => {
                *job_state = JobState::Stopping;
                Ok(())
            }
            None => Err(ManagerError::NotFound(format!("analytics job {}", name))),
        }
    }

    async fn delete_job(&self, name: &str) -> Result<(), ManagerError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state
            .jobs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ManagerError::NotFound(format!("analytics job {}", name)))
    }

    async fn get_hub(&self, name: &str) -> Result<HubDescription, ManagerError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .hubs
            .get(name)
            .map(|hub_state| HubDescription {
                name: name.to_string(),
                state: hub_state.clone(),
            })
            .ok_or_else(|| ManagerError::NotFound(format!("hub {}", name)))
    }

    async fn delete_hub(&self, name: &str) -> Result<(), ManagerError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state
            .hubs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ManagerError::NotFound(format!("hub {}", name)))
    }

    async fn hub_connection_string(&self, hub_name: &str) -> Result<String, ManagerError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if !state.hubs.contains_key(hub_name) {
            return Err(ManagerError::NotFound(format!("hub {}", hub_name)));
        }
        Ok(format!(
            "HostName={}.local;SharedAccessKeyName=iothubowner;SharedAccessKey=local",
            hub_name
        ))
    }

    async fn delete_provisioning_service(&self, name: &str) -> Result<(), ManagerError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.provisioning_services.remove(name) {
            Ok(())
        } else {
            Err(ManagerError::NotFound(format!("provisioning service {}", name)))
        }
    }

    async fn deploy_template(&self, template: serde_json::Value) -> Result<(), ManagerError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.templates.push(template);
        Ok(())
    }

    async fn ensure_blob_container(&self, name: &str) -> Result<(), ManagerError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.containers.insert(name.to_string());
        Ok(())
    }

    async fn add_consumer_group(
        &self,
        hub_name: &str,
        endpoint: &str,
        group_name: &str,
    ) -> Result<(), ManagerError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.consumer_groups.insert((
            hub_name.to_string(),
            endpoint.to_string(),
            group_name.to_string(),
        ));
        Ok(())
    }
}
