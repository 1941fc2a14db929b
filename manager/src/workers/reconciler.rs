//! Tenant operation reconciler
//!
//! Drives queued tenant operations against job control until the external
//! resource reaches the state the operation asks for. A row leaves the queue
//! only once that state is observed; anything else is retried on the next
//! cycle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::clients::{JobControl, KeyValueStore};
use crate::errors::ManagerError;
use crate::models::tenant::{JobState, Tenant, TenantOperation, TenantOperationRecord};

/// Queue of pending operations, keyed `<tenantId>.<OperationType>`
pub const TENANT_OPERATIONS_COLLECTION: &str = "tenantOperations";

/// Tenant records, keyed by tenant id
pub const TENANTS_COLLECTION: &str = "tenants";

/// Hub endpoint the analytics job reads from
pub const EVENTS_ENDPOINT: &str = "events";

/// Consumer group reserved for the analytics job
pub const ANALYTICS_CONSUMER_GROUP: &str = "sajobconsumergroup";

/// Reconciler worker options
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

/// Result of one pass over a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Terminal state reached, the row is removed
    Completed,
    /// Work requested or still in flight, the row stays queued
    Pending,
}

pub async fn load_tenant(storage: &dyn KeyValueStore, tenant_id: &str) -> Result<Tenant, ManagerError> {
    let value = storage.get(TENANTS_COLLECTION, tenant_id).await?;
    let mut tenant: Tenant = serde_json::from_str(&value.data)?;
    tenant.etag = Some(value.etag);
    Ok(tenant)
}

pub async fn save_tenant(storage: &dyn KeyValueStore, tenant: &mut Tenant) -> Result<(), ManagerError> {
    let data = serde_json::to_string(tenant)?;
    let etag = tenant.etag.as_deref().filter(|e| !e.is_empty());
    let stored = storage
        .update(TENANTS_COLLECTION, &tenant.tenant_id, &data, etag)
        .await?;
    tenant.etag = Some(stored.etag);
    Ok(())
}

/// Deployment template creating the analytics job of a tenant
pub fn analytics_job_template(job_name: &str, tenant: &Tenant) -> serde_json::Value {
    json!({
        "resourceType": "analyticsJob",
        "jobName": job_name,
        "tenantId": tenant.tenant_id,
        "input": {
            "iotHubName": tenant.iot_hub_name,
            "endpoint": EVENTS_ENDPOINT,
            "consumerGroup": ANALYTICS_CONSUMER_GROUP,
        },
    })
}

/// Treat an absent resource as the goal already reached
fn completed_if_absent(result: Result<Outcome, ManagerError>) -> Result<Outcome, ManagerError> {
    match result {
        Err(e) if e.is_not_found() => Ok(Outcome::Completed),
        other => other,
    }
}

pub struct TenantOperationReconciler {
    storage: Arc<dyn KeyValueStore>,
    jobs: Arc<dyn JobControl>,
}

impl TenantOperationReconciler {
    pub fn new(storage: Arc<dyn KeyValueStore>, jobs: Arc<dyn JobControl>) -> Self {
        Self { storage, jobs }
    }

    /// Queue an operation, replacing any outstanding one of the same type
    pub async fn enqueue(&self, tenant_id: &str, operation: &TenantOperation) -> Result<(), ManagerError> {
        let record = TenantOperationRecord::new(tenant_id, operation);
        let data = serde_json::to_string(&record)?;
        self.storage
            .update(TENANT_OPERATIONS_COLLECTION, &record.key(), &data, None)
            .await?;
        info!("Queued {} of {} for tenant {}", record.operation_type.as_str(), record.resource_name, tenant_id);
        Ok(())
    }

    /// Process every queued row once, in order
    ///
    /// Returns the number of rows that completed. A failing row is logged
    /// and left for the next cycle without affecting the others.
    pub async fn run_cycle(&self) -> Result<usize, ManagerError> {
        let rows = self.storage.get_all(TENANT_OPERATIONS_COLLECTION).await?;
        debug!("Reconciling {} tenant operations", rows.len());

        let mut completed = 0;
        for row in rows {
            let record: TenantOperationRecord = match serde_json::from_str(&row.data) {
                Ok(record) => record,
                Err(e) => {
                    error!("Unreadable tenant operation {}: {}", row.key, e);
                    continue;
                }
            };

            match self.process(&record).await {
                Ok(Outcome::Completed) => {
                    match self.storage.delete(TENANT_OPERATIONS_COLLECTION, &row.key).await {
                        Ok(()) => {
                            info!("Tenant operation {} completed", row.key);
                            completed += 1;
                        }
                        Err(e) => error!("Failed to remove tenant operation {}: {}", row.key, e),
                    }
                }
                Ok(Outcome::Pending) => debug!("Tenant operation {} still pending", row.key),
                Err(e) => error!("Tenant operation {} failed: {}", row.key, e),
            }
        }

        Ok(completed)
    }

    /// Advance one operation, never removing its row
    pub async fn process(&self, record: &TenantOperationRecord) -> Result<Outcome, ManagerError> {
        match record.operation() {
            TenantOperation::HubDeletion { hub_name } => {
                info!("Deleting hub {} of tenant {}", hub_name, record.tenant_id);
                completed_if_absent(self.jobs.delete_hub(&hub_name).await.map(|_| Outcome::Completed))
            }
            TenantOperation::ProvisioningServiceDeletion { dps_name } => {
                // Deletion is confirmed once the service is reported absent
                info!("Deleting provisioning service {} of tenant {}", dps_name, record.tenant_id);
                completed_if_absent(
                    self.jobs
                        .delete_provisioning_service(&dps_name)
                        .await
                        .map(|_| Outcome::Pending),
                )
            }
            TenantOperation::AnalyticsJobDeletion { job_name } => {
                completed_if_absent(self.delete_analytics_job(&job_name).await)
            }
            TenantOperation::AnalyticsJobCreation { job_name } => {
                self.create_analytics_job(&record.tenant_id, &job_name).await
            }
        }
    }

    async fn delete_analytics_job(&self, job_name: &str) -> Result<Outcome, ManagerError> {
        let job = self.jobs.get_job(job_name).await?;
        debug!("Analytics job {} is {:?}", job_name, job.state);

        match job.state {
            JobState::Starting | JobState::Running => {
                info!("Stopping analytics job {}", job_name);
                self.jobs.stop_job(job_name).await?;
            }
            JobState::Stopping => {}
            _ => {
                info!("Deleting analytics job {}", job_name);
                self.jobs.delete_job(job_name).await?;
            }
        }
        Ok(Outcome::Pending)
    }

    async fn create_analytics_job(&self, tenant_id: &str, job_name: &str) -> Result<Outcome, ManagerError> {
        self.jobs.ensure_blob_container(tenant_id).await?;

        let mut tenant = load_tenant(self.storage.as_ref(), tenant_id).await?;
        self.jobs
            .add_consumer_group(&tenant.iot_hub_name, EVENTS_ENDPOINT, ANALYTICS_CONSUMER_GROUP)
            .await?;

        match self.jobs.get_job(job_name).await {
            Ok(_) => {
                tenant.sa_job_name = Some(job_name.to_string());
                save_tenant(self.storage.as_ref(), &mut tenant).await?;
                info!("Analytics job {} linked to tenant {}", job_name, tenant_id);
                Ok(Outcome::Completed)
            }
            Err(e) if e.is_not_found() => {
                info!("Analytics job {} does not exist, creating it", job_name);
                self.jobs
                    .deploy_template(analytics_job_template(job_name, &tenant))
                    .await?;
                Ok(Outcome::Pending)
            }
            Err(e) => Err(e),
        }
    }
}

/// Run the reconciler worker
pub async fn run<S, F>(
    options: &Options,
    reconciler: &TenantOperationReconciler,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Reconciler worker starting...");

    loop {
        // In-flight calls are abandoned when shutdown wins the race
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Reconciler worker shutting down...");
                return;
            }
            result = reconciler.run_cycle() => {
                if let Err(e) = result {
                    warn!("Failed to list tenant operations: {}", e);
                }
            }
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Reconciler worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
