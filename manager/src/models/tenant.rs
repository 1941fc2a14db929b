//! Tenant and tenant operation models

use serde::{Deserialize, Serialize};

/// Operation type, doubles as the row key of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TenantOperationType {
    HubDeletion,
    ProvisioningServiceDeletion,
    AnalyticsJobDeletion,
    AnalyticsJobCreation,
}

impl TenantOperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantOperationType::HubDeletion => "HubDeletion",
            TenantOperationType::ProvisioningServiceDeletion => "ProvisioningServiceDeletion",
            TenantOperationType::AnalyticsJobDeletion => "AnalyticsJobDeletion",
            TenantOperationType::AnalyticsJobCreation => "AnalyticsJobCreation",
        }
    }
}

/// Stored form of a queued tenant operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantOperationRecord {
    pub tenant_id: String,
    pub operation_type: TenantOperationType,
    #[serde(default)]
    pub resource_name: String,
}

impl TenantOperationRecord {
    pub fn new(tenant_id: &str, operation: &TenantOperation) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            operation_type: operation.operation_type(),
            resource_name: operation.resource_name().to_string(),
        }
    }

    /// Queue key: at most one outstanding operation per tenant and type
    pub fn key(&self) -> String {
        operation_key(&self.tenant_id, self.operation_type)
    }

    pub fn operation(&self) -> TenantOperation {
        let name = self.resource_name.clone();
        match self.operation_type {
            TenantOperationType::HubDeletion => TenantOperation::HubDeletion { hub_name: name },
            TenantOperationType::ProvisioningServiceDeletion => {
                TenantOperation::ProvisioningServiceDeletion { dps_name: name }
            }
            TenantOperationType::AnalyticsJobDeletion => {
                TenantOperation::AnalyticsJobDeletion { job_name: name }
            }
            TenantOperationType::AnalyticsJobCreation => {
                TenantOperation::AnalyticsJobCreation { job_name: name }
            }
        }
    }
}

pub fn operation_key(tenant_id: &str, operation_type: TenantOperationType) -> String {
    format!("{}.{}", tenant_id, operation_type.as_str())
}

/// A unit of work against a tenant's external resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantOperation {
    HubDeletion { hub_name: String },
    ProvisioningServiceDeletion { dps_name: String },
    AnalyticsJobDeletion { job_name: String },
    AnalyticsJobCreation { job_name: String },
}

impl TenantOperation {
    pub fn operation_type(&self) -> TenantOperationType {
        match self {
            TenantOperation::HubDeletion { .. } => TenantOperationType::HubDeletion,
            TenantOperation::ProvisioningServiceDeletion { .. } => {
                TenantOperationType::ProvisioningServiceDeletion
            }
            TenantOperation::AnalyticsJobDeletion { .. } => TenantOperationType::AnalyticsJobDeletion,
            TenantOperation::AnalyticsJobCreation { .. } => TenantOperationType::AnalyticsJobCreation,
        }
    }

    pub fn resource_name(&self) -> &str {
        match self {
            TenantOperation::HubDeletion { hub_name } => hub_name,
            TenantOperation::ProvisioningServiceDeletion { dps_name } => dps_name,
            TenantOperation::AnalyticsJobDeletion { job_name }
            | TenantOperation::AnalyticsJobCreation { job_name } => job_name,
        }
    }
}

/// Tenant record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub tenant_id: String,

    #[serde(default)]
    pub iot_hub_name: String,

    #[serde(default)]
    pub dps_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sa_job_name: Option<String>,

    #[serde(default)]
    pub iot_hub_deployed: bool,

    #[serde(skip)]
    pub etag: Option<String>,
}

/// Run state of an analytics job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Deleting,
    Failed,
    Degraded,
    Restarting,
    Scaling,
    #[serde(other)]
    Unknown,
}

/// Analytics job as described by job control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsJob {
    pub name: String,
    pub state: JobState,
}

/// Provisioning state of a tenant hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubDescription {
    pub name: String,
    pub state: String,
}

impl HubDescription {
    pub fn is_active(&self) -> bool {
        self.state == "Active"
    }
}
