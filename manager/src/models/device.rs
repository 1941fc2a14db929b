//! Device and twin models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Point-in-time device twin snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Twin {
    pub device_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub desired_properties: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub reported_properties: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub is_edge_device: bool,

    #[serde(skip)]
    pub etag: Option<String>,
}

/// A device as resolved by the device directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twin: Option<Twin>,
}
