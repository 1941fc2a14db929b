//! Tenant operation reconciler scenarios

use std::sync::Arc;
use std::time::Duration;

use tokio_test::assert_ok;

use iot_manager::clients::memory::{MemoryJobControl, MemoryKeyValueStore};
use iot_manager::clients::KeyValueStore;
use iot_manager::models::tenant::{JobState, Tenant, TenantOperation};
use iot_manager::workers::reconciler::{
    self, load_tenant, save_tenant, Options, TenantOperationReconciler, ANALYTICS_CONSUMER_GROUP,
    EVENTS_ENDPOINT, TENANT_OPERATIONS_COLLECTION,
};

struct Fixture {
    storage: Arc<MemoryKeyValueStore>,
    jobs: Arc<MemoryJobControl>,
    reconciler: TenantOperationReconciler,
}

fn fixture() -> Fixture {
    let storage = Arc::new(MemoryKeyValueStore::new());
    let jobs = Arc::new(MemoryJobControl::new());
    let reconciler = TenantOperationReconciler::new(storage.clone(), jobs.clone());
    Fixture {
        storage,
        jobs,
        reconciler,
    }
}

fn queued(f: &Fixture) -> usize {
    f.storage.len(TENANT_OPERATIONS_COLLECTION)
}

#[tokio::test]
async fn test_hub_deletion_completes() {
    let f = fixture();
    f.jobs.set_hub("hub-t1", "Active");
    f.reconciler
        .enqueue("t1", &TenantOperation::HubDeletion { hub_name: "hub-t1".to_string() })
        .await
        .unwrap();

    assert_eq!(f.reconciler.run_cycle().await.unwrap(), 1);
    assert!(!f.jobs.has_hub("hub-t1"));
    assert_eq!(queued(&f), 0);
}

#[tokio::test]
async fn test_deleting_absent_resources_completes() {
    let f = fixture();
    f.reconciler
        .enqueue("t1", &TenantOperation::HubDeletion { hub_name: "gone".to_string() })
        .await
        .unwrap();
    f.reconciler
        .enqueue("t1", &TenantOperation::AnalyticsJobDeletion { job_name: "gone".to_string() })
        .await
        .unwrap();
    f.reconciler
        .enqueue(
            "t1",
            &TenantOperation::ProvisioningServiceDeletion { dps_name: "gone".to_string() },
        )
        .await
        .unwrap();

    assert_eq!(f.reconciler.run_cycle().await.unwrap(), 3);
    assert_eq!(queued(&f), 0);
}

#[tokio::test]
async fn test_provisioning_service_deletion_confirmed_next_cycle() {
    let f = fixture();
    f.jobs.add_provisioning_service("dps-t1");
    f.reconciler
        .enqueue(
            "t1",
            &TenantOperation::ProvisioningServiceDeletion { dps_name: "dps-t1".to_string() },
        )
        .await
        .unwrap();

    assert_eq!(assert_ok!(f.reconciler.run_cycle().await), 0);
    assert!(!f.jobs.has_provisioning_service("dps-t1"));
    assert_eq!(queued(&f), 1);

    assert_eq!(assert_ok!(f.reconciler.run_cycle().await), 1);
    assert_eq!(queued(&f), 0);
}

#[tokio::test]
async fn test_running_job_is_stopped_before_deletion() {
    let f = fixture();
    f.jobs.set_job("job-t1", JobState::Running);
    f.reconciler
        .enqueue("t1", &TenantOperation::AnalyticsJobDeletion { job_name: "job-t1".to_string() })
        .await
        .unwrap();

    assert_ok!(f.reconciler.run_cycle().await);
    assert_eq!(f.jobs.job_state("job-t1"), Some(JobState::Stopping));

    // Still stopping, nothing to do
    f.reconciler.run_cycle().await.unwrap();
    assert_eq!(f.jobs.job_state("job-t1"), Some(JobState::Stopping));
    assert_eq!(queued(&f), 1);

    f.jobs.set_job("job-t1", JobState::Stopped);
    f.reconciler.run_cycle().await.unwrap();
    assert_eq!(f.jobs.job_state("job-t1"), None);
    assert_eq!(queued(&f), 1);

    assert_eq!(f.reconciler.run_cycle().await.unwrap(), 1);
    assert_eq!(queued(&f), 0);
}

#[tokio::test]
async fn test_job_creation_takes_two_cycles() {
    let f = fixture();
    let mut tenant = Tenant {
        tenant_id: "t1".to_string(),
        iot_hub_name: "hub-t1".to_string(),
        ..Default::default()
    };
    save_tenant(f.storage.as_ref(), &mut tenant).await.unwrap();
    f.reconciler
        .enqueue("t1", &TenantOperation::AnalyticsJobCreation { job_name: "job-t1".to_string() })
        .await
        .unwrap();

    assert_eq!(f.reconciler.run_cycle().await.unwrap(), 0);
    assert!(f.jobs.has_container("t1"));
    assert!(f.jobs.has_consumer_group("hub-t1", EVENTS_ENDPOINT, ANALYTICS_CONSUMER_GROUP));
    let templates = f.jobs.templates();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0]["jobName"], "job-t1");
    assert_eq!(queued(&f), 1);

    // The template materialized the job
    f.jobs.set_job("job-t1", JobState::Created);
    assert_eq!(f.reconciler.run_cycle().await.unwrap(), 1);
    assert_eq!(queued(&f), 0);

    let tenant = load_tenant(f.storage.as_ref(), "t1").await.unwrap();
    assert_eq!(tenant.sa_job_name.as_deref(), Some("job-t1"));
    assert_eq!(f.jobs.templates().len(), 1);
}

#[tokio::test]
async fn test_failing_row_does_not_block_others() {
    let f = fixture();
    f.jobs.set_hub("hub-t2", "Active");
    // No tenant record exists for t1, so its creation fails every cycle
    f.reconciler
        .enqueue("t1", &TenantOperation::AnalyticsJobCreation { job_name: "job-t1".to_string() })
        .await
        .unwrap();
    f.reconciler
        .enqueue("t2", &TenantOperation::HubDeletion { hub_name: "hub-t2".to_string() })
        .await
        .unwrap();

    assert_eq!(f.reconciler.run_cycle().await.unwrap(), 1);
    assert!(!f.jobs.has_hub("hub-t2"));

    let remaining = f.storage.get_all(TENANT_OPERATIONS_COLLECTION).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key, "t1.AnalyticsJobCreation");
}

#[tokio::test]
async fn test_enqueue_replaces_outstanding_operation() {
    let f = fixture();
    for name in ["old", "new"] {
        f.reconciler
            .enqueue("t1", &TenantOperation::HubDeletion { hub_name: name.to_string() })
            .await
            .unwrap();
    }

    let rows = f.storage.get_all(TENANT_OPERATIONS_COLLECTION).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].data.contains("new"));
}

#[tokio::test]
async fn test_worker_stops_on_shutdown() {
    let f = fixture();
    f.jobs.set_hub("hub-t1", "Active");
    f.reconciler
        .enqueue("t1", &TenantOperation::HubDeletion { hub_name: "hub-t1".to_string() })
        .await
        .unwrap();

    let options = Options {
        interval: Duration::from_millis(5),
    };
    tokio::time::timeout(
        Duration::from_secs(5),
        reconciler::run(
            &options,
            &f.reconciler,
            tokio::time::sleep,
            Box::pin(tokio::time::sleep(Duration::from_millis(50))),
        ),
    )
    .await
    .unwrap();

    assert!(!f.jobs.has_hub("hub-t1"));
    assert_eq!(queued(&f), 0);
}
