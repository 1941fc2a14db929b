//! Deployment store scenarios

use std::sync::Arc;

use async_trait::async_trait;
use iot_manager::clients::memory::MemoryKeyValueStore;
use iot_manager::clients::{KeyValueStore, StoredValue};
use iot_manager::deploy::store::{device_properties_collection, DeploymentStore, DEPLOYMENTS_COLLECTION};
use iot_manager::errors::ManagerError;
use iot_manager::models::configuration::{Configuration, DEVICE_GROUP_ID_LABEL};
use iot_manager::models::deployment::{
    Deployment, DeviceStatus, EventType, DELETED_TAG, INACTIVE_TAG, LATEST_TAG,
};
use iot_manager::models::package::{ConditionOperator, DeviceGroup, DeviceGroupCondition, Package};

use crate::common::{edge, firmware, Harness, GROUP};

#[tokio::test]
async fn test_first_deployment_becomes_latest() {
    let h = Harness::new();

    let created = h.store.create(firmware("v1", 1), "alice").await.unwrap();

    assert!(!created.id.is_empty());
    assert!(created.has_tag(LATEST_TAG));
    assert_eq!(created.created_by.as_deref(), Some("alice"));
    assert!(h.hub.contains(&created.id));

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::DeploymentCreate);
    assert_eq!(events[0].tenant_id, "tenant-1");
}

#[tokio::test]
async fn test_higher_priority_supersedes_latest() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 1), "alice").await.unwrap();
    let b = h.store.create(firmware("b", 2), "alice").await.unwrap();

    assert!(b.has_tag(LATEST_TAG));
    let a = h.store.get(&a.id, false, false).await.unwrap();
    assert!(!a.has_tag(LATEST_TAG));
    // Demoted deployments keep running on the hub
    assert!(h.hub.contains(&a.id));
}

#[tokio::test]
async fn test_equal_priority_newest_wins() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 5), "alice").await.unwrap();
    let b = h.store.create(firmware("b", 5), "alice").await.unwrap();

    assert!(b.has_tag(LATEST_TAG));
    assert!(!h.store.get(&a.id, false, false).await.unwrap().has_tag(LATEST_TAG));
}

#[tokio::test]
async fn test_lower_priority_does_not_supersede() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 3), "alice").await.unwrap();
    let c = h.store.create(firmware("c", 1), "alice").await.unwrap();

    assert!(!c.has_tag(LATEST_TAG));
    assert!(c.deployment_metrics.is_some());
    assert!(h.store.get(&a.id, false, false).await.unwrap().has_tag(LATEST_TAG));
}

#[tokio::test]
async fn test_supersession_check_is_idempotent() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 3), "alice").await.unwrap();
    let before = h.storage.get(DEPLOYMENTS_COLLECTION, &a.id).await.unwrap();

    assert!(!h.store.reconcile_supersession(GROUP, 2).await.unwrap());
    assert!(!h.store.reconcile_supersession(GROUP, 2).await.unwrap());

    let after = h.storage.get(DEPLOYMENTS_COLLECTION, &a.id).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_groups_rank_independently() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 9), "alice").await.unwrap();

    let mut other = firmware("other", 1);
    other.device_group_id = "group-2".to_string();
    let other = h.store.create(other, "alice").await.unwrap();

    assert!(other.has_tag(LATEST_TAG));
    assert!(h.store.get(&a.id, false, false).await.unwrap().has_tag(LATEST_TAG));
}

#[tokio::test]
async fn test_validation_runs_before_remote_calls() {
    let h = Harness::new();
    h.hub.set_unavailable(true);

    let mut missing_group = firmware("a", 1);
    missing_group.device_group_id = String::new();
    let result = h.store.create(missing_group, "alice").await;
    assert!(matches!(result, Err(ManagerError::ValidationError(_))));

    let result = h.store.create(firmware("a", -1), "alice").await;
    assert!(matches!(result, Err(ManagerError::ValidationError(_))));

    let mut no_config_type = firmware("a", 1);
    no_config_type.config_type = None;
    let result = h.store.create(no_config_type, "alice").await;
    assert!(matches!(result, Err(ManagerError::ValidationError(_))));

    let result = h.store.create(firmware("a", 1), "alice").await;
    assert!(matches!(result, Err(ManagerError::ExternalDependency(_))));
    assert_eq!(h.storage.len(DEPLOYMENTS_COLLECTION), 0);
}

#[tokio::test]
async fn test_foreign_configurations_are_not_supported() {
    let h = Harness::new();
    let mut foreign = Configuration {
        id: "external-1".to_string(),
        priority: 100,
        ..Default::default()
    };
    foreign
        .labels
        .insert(DEVICE_GROUP_ID_LABEL.to_string(), GROUP.to_string());
    h.hub.insert_raw(foreign);

    let result = h.store.get("external-1", false, true).await;
    assert!(matches!(result, Err(ManagerError::NotSupported(_))));

    // Foreign configurations never compete for the latest slot
    let created = h.store.create(firmware("a", 1), "alice").await.unwrap();
    assert!(created.has_tag(LATEST_TAG));
    assert!(h.store.list().await.unwrap().iter().all(|d| d.id != "external-1"));
}

#[tokio::test]
async fn test_firmware_statuses_are_classified() {
    let h = Harness::new();
    let created = h.store.create(firmware("a", 1), "alice").await.unwrap();
    h.set_firmware_statuses(&created.id, &["d1", "d2", "d3"], &["d1"], &["d1", "d2"]);

    let live = h.store.get(&created.id, true, true).await.unwrap();
    let metrics = live.deployment_metrics.unwrap();
    let statuses = metrics.device_statuses.unwrap();

    // Success wins over failure
    assert_eq!(statuses["d1"], DeviceStatus::Succeeded);
    assert_eq!(statuses["d2"], DeviceStatus::Failed);
    assert_eq!(statuses["d3"], DeviceStatus::Pending);
    assert_eq!(metrics.device_metrics[&DeviceStatus::Succeeded], 1);
    assert_eq!(metrics.device_metrics[&DeviceStatus::Unknown], 0);
    assert_eq!(live.tags, vec![LATEST_TAG.to_string()]);

    let without_statuses = h.store.get(&created.id, false, true).await.unwrap();
    assert!(without_statuses.deployment_metrics.unwrap().device_statuses.is_none());
}

#[tokio::test]
async fn test_stored_read_hides_package_content() {
    let h = Harness::new();
    let created = h.store.create(edge("a", 1), "alice").await.unwrap();

    let stored = h.store.get(&created.id, false, false).await.unwrap();
    assert!(stored.package_content.is_none());

    let result = h.store.get("", false, false).await;
    assert!(matches!(result, Err(ManagerError::ValidationError(_))));
}

#[tokio::test]
async fn test_superseded_deployment_keeps_snapshot() {
    let h = Harness::new();
    h.add_device("d1", "1.0");
    h.add_device("d2", "1.0");

    let a = h.store.create(firmware("a", 1), "alice").await.unwrap();
    h.set_firmware_statuses(&a.id, &["d1", "d2"], &["d1"], &["d2"]);
    h.store.create(firmware("b", 2), "alice").await.unwrap();

    assert_eq!(h.storage.len(&device_properties_collection(&a.id)), 2);

    // Later twin changes do not leak into the historical view
    h.add_device("d1", "2.0");
    let devices = h
        .store
        .get_device_list(&a.id, "deviceId IN ['d1','d2']", false)
        .await
        .unwrap();
    let d1 = devices.iter().find(|d| d.id == "d1").unwrap();
    assert_eq!(
        d1.twin.as_ref().unwrap().reported_properties["firmwareVersion"],
        "1.0"
    );

    let live = h
        .store
        .get_device_list(&a.id, "deviceId IN ['d1','d2']", true)
        .await
        .unwrap();
    let d1 = live.iter().find(|d| d.id == "d1").unwrap();
    assert_eq!(
        d1.twin.as_ref().unwrap().reported_properties["firmwareVersion"],
        "2.0"
    );

    let stored = h.store.get(&a.id, true, false).await.unwrap();
    let statuses = stored.deployment_metrics.unwrap().device_statuses.unwrap();
    assert_eq!(statuses["d2"], DeviceStatus::Failed);
}

#[tokio::test]
async fn test_deactivating_latest_elects_next() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 1), "alice").await.unwrap();
    let b = h.store.create(firmware("b", 2), "alice").await.unwrap();

    h.store.delete(&b.id, "bob", false).await.unwrap();

    assert!(!h.hub.contains(&b.id));
    let b = h.store.get(&b.id, false, false).await.unwrap();
    assert!(b.has_tag(INACTIVE_TAG));
    assert!(!b.has_tag(LATEST_TAG));
    assert_eq!(b.modified_by.as_deref(), Some("bob"));

    let a = h.store.get(&a.id, false, false).await.unwrap();
    assert!(a.has_tag(LATEST_TAG));

    // Inactive deployments stay in the history
    let history = h.store.list_from_storage().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, b.id);

    let events = h.events.events();
    assert_eq!(events.last().unwrap().event_type, EventType::DeploymentDelete);
}

#[tokio::test]
async fn test_delete_hides_deployment() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 1), "alice").await.unwrap();

    h.store.delete(&a.id, "bob", true).await.unwrap();

    assert!(h.store.list_from_storage().await.unwrap().is_empty());
    let stored = h.store.get(&a.id, false, false).await.unwrap();
    assert!(stored.has_tag(DELETED_TAG));
    assert!(stored.has_tag(INACTIVE_TAG));

    // Deleting again is a no-op
    h.store.delete(&a.id, "bob", true).await.unwrap();
    assert!(h.store.list_from_storage().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_inactive_deployment_can_be_deleted() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 1), "alice").await.unwrap();
    h.store.delete(&a.id, "bob", false).await.unwrap();
    h.store.delete(&a.id, "bob", true).await.unwrap();

    let stored = h.store.get(&a.id, false, false).await.unwrap();
    assert!(stored.has_tag(DELETED_TAG));
}

#[tokio::test]
async fn test_delete_unknown_deployment() {
    let h = Harness::new();
    let result = h.store.delete("missing", "bob", true).await;
    assert!(matches!(result, Err(ManagerError::NotFound(_))));
}

#[tokio::test]
async fn test_reactivate_round_trip() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 1), "alice").await.unwrap();
    let b = h.store.create(firmware("b", 2), "alice").await.unwrap();
    h.store.delete(&b.id, "bob", false).await.unwrap();

    let revived = h.store.reactivate(&b.id, "carol").await.unwrap();

    assert_ne!(revived.id, b.id);
    assert!(revived.has_tag(LATEST_TAG));
    assert!(h.hub.contains(&revived.id));
    assert!(!h.store.get(&a.id, false, false).await.unwrap().has_tag(LATEST_TAG));

    let original = h.store.get(&b.id, false, false).await.unwrap();
    assert!(!original.has_tag(INACTIVE_TAG));
}

#[tokio::test]
async fn test_reactivate_rejects_live_and_deleted() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 1), "alice").await.unwrap();

    let result = h.store.reactivate(&a.id, "carol").await;
    assert!(matches!(result, Err(ManagerError::ValidationError(_))));

    h.store.delete(&a.id, "bob", true).await.unwrap();
    let result = h.store.reactivate(&a.id, "carol").await;
    assert!(matches!(result, Err(ManagerError::NotFound(_))));
}

#[tokio::test]
async fn test_list_from_storage_skips_unreadable_records() {
    let h = Harness::new();
    h.store.create(firmware("a", 1), "alice").await.unwrap();
    h.storage
        .update(DEPLOYMENTS_COLLECTION, "broken", "not json", None)
        .await
        .unwrap();

    let history = h.store.list_from_storage().await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_list_is_newest_first() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 5), "alice").await.unwrap();
    let b = h.store.create(firmware("b", 1), "alice").await.unwrap();

    let live = h.store.list().await.unwrap();
    let ids: Vec<&str> = live.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec![b.id.as_str(), a.id.as_str()]);
}

#[tokio::test]
async fn test_deleting_latest_elects_newest_of_equal_priority() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 5), "alice").await.unwrap();
    let b = h.store.create(firmware("b", 10), "alice").await.unwrap();
    let c = h.store.create(firmware("c", 10), "alice").await.unwrap();
    assert!(c.has_tag(LATEST_TAG));

    h.store.delete(&c.id, "bob", true).await.unwrap();

    assert!(h.store.get(&b.id, false, false).await.unwrap().has_tag(LATEST_TAG));
    assert!(!h.store.get(&a.id, false, false).await.unwrap().has_tag(LATEST_TAG));
    assert!(h.hub.contains(&a.id));
    assert!(h.hub.contains(&b.id));
}

#[tokio::test]
async fn test_deleting_non_latest_leaves_other_records_untouched() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 10), "alice").await.unwrap();
    let b = h.store.create(firmware("b", 5), "alice").await.unwrap();
    let before = h.storage.get(DEPLOYMENTS_COLLECTION, &a.id).await.unwrap();

    h.store.delete(&b.id, "bob", false).await.unwrap();

    let after = h.storage.get(DEPLOYMENTS_COLLECTION, &a.id).await.unwrap();
    assert_eq!(after.etag, before.etag);
    assert_eq!(after.data, before.data);
    assert!(h.store.get(&b.id, false, false).await.unwrap().has_tag(INACTIVE_TAG));
}

#[tokio::test]
async fn test_untracked_config_type_reports_unknown() {
    let h = Harness::new();
    let settings = Deployment {
        config_type: Some("Settings".to_string()),
        ..firmware("settings", 1)
    };
    let created = h.store.create(settings, "alice").await.unwrap();
    h.set_applied_devices(&created.id, "Settings", &["d1", "d2"]);

    let live = h.store.get(&created.id, true, true).await.unwrap();
    let metrics = live.deployment_metrics.unwrap();
    let statuses = metrics.device_statuses.unwrap();

    assert_eq!(statuses.len(), 2);
    assert!(statuses.values().all(|s| *s == DeviceStatus::Unknown));
    assert_eq!(metrics.device_metrics[&DeviceStatus::Unknown], 2);
    assert_eq!(metrics.device_metrics[&DeviceStatus::Succeeded], 0);
}

#[tokio::test]
async fn test_list_from_storage_reports_live_counts_for_latest() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 1), "alice").await.unwrap();
    h.set_firmware_statuses(&a.id, &["d1", "d2"], &["d1"], &[]);

    let history = h.store.list_from_storage().await.unwrap();
    let metrics = history[0].deployment_metrics.as_ref().unwrap();

    assert_eq!(metrics.device_metrics.len(), 4);
    assert_eq!(metrics.device_metrics[&DeviceStatus::Succeeded], 1);
    assert_eq!(metrics.device_metrics[&DeviceStatus::Pending], 1);
    assert!(metrics.device_statuses.is_none());
}

/// Stores an inactive deployment that only references its package and device group
async fn store_reference_only(h: &Harness, id: &str) {
    let record = Deployment {
        package_id: Some("pkg-1".to_string()),
        package_content: None,
        device_group_query: None,
        device_ids: Vec::new(),
        tags: vec![INACTIVE_TAG.to_string()],
        ..firmware("from catalog", 3)
    };
    h.storage
        .update(DEPLOYMENTS_COLLECTION, id, &serde_json::to_string(&record).unwrap(), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reactivate_resolves_package_and_group_from_catalog() {
    let h = Harness::new();
    store_reference_only(&h, "old-1").await;
    h.catalog.add_package(Package {
        id: "pkg-1".to_string(),
        name: "firmware 2.0".to_string(),
        config_type: Some("Firmware".to_string()),
        content: r#"{"content":{"deviceContent":{"properties.desired.firmware":{}}}}"#.to_string(),
        ..Default::default()
    });
    h.catalog.add_device_group(DeviceGroup {
        id: GROUP.to_string(),
        display_name: "North".to_string(),
        conditions: vec![DeviceGroupCondition {
            key: "tags.site".to_string(),
            operator: ConditionOperator::EQ,
            value: serde_json::json!("north"),
        }],
    });

    let revived = h.store.reactivate("old-1", "carol").await.unwrap();

    assert!(h.hub.contains(&revived.id));
    assert!(revived.has_tag(LATEST_TAG));
    let live = h.store.get(&revived.id, false, true).await.unwrap();
    assert_eq!(live.device_group_query.as_deref(), Some("tags.site = 'north'"));
    assert!(!h.store.get("old-1", false, false).await.unwrap().has_tag(INACTIVE_TAG));
}

#[tokio::test]
async fn test_reactivate_with_missing_package() {
    let h = Harness::new();
    store_reference_only(&h, "old-1").await;

    let result = h.store.reactivate("old-1", "carol").await;

    assert!(matches!(result, Err(ManagerError::NotFound(_))));
    assert!(h.store.list().await.unwrap().is_empty());
    assert!(h.store.get("old-1", false, false).await.unwrap().has_tag(INACTIVE_TAG));
}

/// Rewrites every deployment record right after it is read, so the reader's etag is stale
struct ConcurrentWriter {
    inner: Arc<MemoryKeyValueStore>,
}

#[async_trait]
impl KeyValueStore for ConcurrentWriter {
    async fn get(&self, collection: &str, key: &str) -> Result<StoredValue, ManagerError> {
        let value = self.inner.get(collection, key).await?;
        if collection == DEPLOYMENTS_COLLECTION {
            self.inner.update(collection, key, &value.data, None).await?;
        }
        Ok(value)
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<StoredValue>, ManagerError> {
        self.inner.get_all(collection).await
    }

    async fn create(&self, collection: &str, data: &str) -> Result<StoredValue, ManagerError> {
        self.inner.create(collection, data).await
    }

    async fn update(
        &self,
        collection: &str,
        key: &str,
        data: &str,
        etag: Option<&str>,
    ) -> Result<StoredValue, ManagerError> {
        self.inner.update(collection, key, data, etag).await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), ManagerError> {
        self.inner.delete(collection, key).await
    }
}

#[tokio::test]
async fn test_concurrent_write_surfaces_conflict() {
    let h = Harness::new();
    let a = h.store.create(firmware("a", 1), "alice").await.unwrap();

    let racing = DeploymentStore::new(
        "tenant-1",
        Arc::new(ConcurrentWriter { inner: h.storage.clone() }),
        h.hub.clone(),
        h.devices.clone(),
        h.catalog.clone(),
        h.events.clone(),
    );
    let result = racing.delete(&a.id, "bob", false).await;

    assert!(matches!(result, Err(ManagerError::Conflict(_))));
    let stored = h.store.get(&a.id, false, false).await.unwrap();
    assert!(!stored.has_tag(INACTIVE_TAG));
}
