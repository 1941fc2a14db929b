//! Device query translation
//!
//! Device groups are stored as a JSON array of `{Key, Operator, Value}`
//! conditions. The hub only understands its own query language, so every
//! target handed to the registry or the device directory goes through here.

use crate::errors::ManagerError;
use crate::models::deployment::Deployment;
use crate::models::package::{ConditionOperator, DeviceGroupCondition};

impl ConditionOperator {
    fn as_query_str(&self) -> &'static str {
        match self {
            ConditionOperator::EQ => "=",
            ConditionOperator::NE => "!=",
            ConditionOperator::LT => "<",
            ConditionOperator::GT => ">",
            ConditionOperator::LE => "<=",
            ConditionOperator::GE => ">=",
            ConditionOperator::IN => "IN",
        }
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "\\'"))
}

fn format_value(value: &serde_json::Value) -> Result<String, ManagerError> {
    match value {
        serde_json::Value::String(s) => Ok(quote(s)),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Array(items) => {
            let items = items
                .iter()
                .map(format_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("[{}]", items.join(", ")))
        }
        other => Err(ManagerError::ValidationError(format!(
            "Unsupported condition value: {}",
            other
        ))),
    }
}

/// Translate device group conditions into a hub query
pub fn conditions_to_query(conditions: &[DeviceGroupCondition]) -> Result<String, ManagerError> {
    let clauses = conditions
        .iter()
        .map(|c| {
            if c.key.trim().is_empty() {
                return Err(ManagerError::ValidationError(
                    "Condition key must not be empty".to_string(),
                ));
            }
            if c.operator == ConditionOperator::IN && !c.value.is_array() {
                return Err(ManagerError::ValidationError(format!(
                    "IN condition on {} requires a list value",
                    c.key
                )));
            }
            Ok(format!(
                "{} {} {}",
                c.key,
                c.operator.as_query_str(),
                format_value(&c.value)?
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(clauses.join(" AND "))
}

/// Translate a stored device group query, JSON conditions or a raw hub query
pub fn translate_group_query(query: &str) -> Result<String, ManagerError> {
    let trimmed = query.trim();
    if !trimmed.starts_with('[') {
        return Ok(trimmed.to_string());
    }

    let conditions: Vec<DeviceGroupCondition> = serde_json::from_str(trimmed).map_err(|e| {
        ManagerError::ValidationError(format!("Invalid device group conditions: {}", e))
    })?;
    conditions_to_query(&conditions)
}

/// Query matching an explicit list of devices
pub fn device_id_list_query<S: AsRef<str>>(device_ids: &[S]) -> String {
    let ids: Vec<String> = device_ids.iter().map(|id| quote(id.as_ref())).collect();
    format!("deviceId IN [{}]", ids.join(","))
}

/// Inverse of [`device_id_list_query`]
pub fn parse_device_id_list(query: &str) -> Option<Vec<String>> {
    let rest = query.trim().strip_prefix("deviceId IN [")?;
    let body = rest.strip_suffix(']')?;
    if body.trim().is_empty() {
        return Some(Vec::new());
    }

    body.split(',')
        .map(|item| {
            let item = item.trim();
            item.strip_prefix('\'')
                .and_then(|i| i.strip_suffix('\''))
                .map(|i| i.replace("\\'", "'"))
        })
        .collect()
}

/// Target condition of the hub configuration backing a deployment
pub fn target_condition(deployment: &Deployment) -> Result<String, ManagerError> {
    match deployment.device_group_query.as_deref() {
        Some(query) if !query.trim().is_empty() => translate_group_query(query),
        _ if !deployment.device_ids.is_empty() => Ok(device_id_list_query(&deployment.device_ids)),
        _ => Err(ManagerError::ValidationError(
            "deviceGroupQuery or deviceIds must be provided".to_string(),
        )),
    }
}
