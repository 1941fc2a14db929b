//! Package and device group models

use serde::{Deserialize, Serialize};

use crate::models::deployment::PackageType;

/// An uploaded deployment package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub package_type: PackageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_type: Option<String>,
    pub content: String,
}

/// Comparison operator of a device group condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    EQ,
    NE,
    LT,
    GT,
    LE,
    GE,
    IN,
}

/// Single filter clause of a device group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceGroupCondition {
    #[serde(rename = "Key")]
    pub key: String,

    #[serde(rename = "Operator")]
    pub operator: ConditionOperator,

    #[serde(rename = "Value")]
    pub value: serde_json::Value,
}

/// A saved device filter used to target deployments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceGroup {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub conditions: Vec<DeviceGroupCondition>,
}
