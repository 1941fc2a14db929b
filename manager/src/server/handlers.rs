//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::ManagerError;
use crate::models::deployment::Deployment;
use crate::models::device::Device;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Header identifying the user behind a request
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Actor recorded when the caller does not identify itself
pub const DEFAULT_ACTOR: &str = "system";

/// Error body returned by every failing handler
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ManagerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ManagerError::ValidationError(_) | ManagerError::NotSupported(_) => StatusCode::BAD_REQUEST,
            ManagerError::NotFound(_) => StatusCode::NOT_FOUND,
            ManagerError::Conflict(_) => StatusCode::CONFLICT,
            ManagerError::ExternalDependency(_) | ManagerError::HttpError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

fn actor_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_ACTOR)
        .to_string()
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "iot-manager".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Deployment list response
#[derive(Debug, Serialize)]
pub struct DeploymentsResponse {
    pub items: Vec<Deployment>,
    pub total: usize,
}

impl From<Vec<Deployment>> for DeploymentsResponse {
    fn from(items: Vec<Deployment>) -> Self {
        let total = items.len();
        Self { items, total }
    }
}

/// Stored deployment history
pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<DeploymentsResponse>, ManagerError> {
    let deployments = state.deployments.list_from_storage().await?;
    Ok(Json(deployments.into()))
}

/// Deployments currently configured on the hub
pub async fn list_live_deployments_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<DeploymentsResponse>, ManagerError> {
    let deployments = state.deployments.list().await?;
    Ok(Json(deployments.into()))
}

pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(deployment): Json<Deployment>,
) -> Result<(StatusCode, Json<Deployment>), ManagerError> {
    let created = state
        .deployments
        .create(deployment, &actor_id(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDeploymentParams {
    #[serde(default)]
    pub include_device_status: bool,

    #[serde(default)]
    pub is_latest: bool,
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Query(params): Query<GetDeploymentParams>,
) -> Result<Json<Deployment>, ManagerError> {
    let deployment = state
        .deployments
        .get(&id, params.include_device_status, params.is_latest)
        .await?;
    Ok(Json(deployment))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDeploymentParams {
    #[serde(default)]
    pub is_delete: bool,
}

pub async fn delete_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Query(params): Query<DeleteDeploymentParams>,
    headers: HeaderMap,
) -> Result<StatusCode, ManagerError> {
    state
        .deployments
        .delete(&id, &actor_id(&headers), params.is_delete)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reactivate_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Deployment>), ManagerError> {
    let deployment = state
        .deployments
        .reactivate(&id, &actor_id(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(deployment)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListParams {
    #[serde(default)]
    pub query: String,

    #[serde(default)]
    pub is_latest: bool,
}

pub async fn deployment_devices_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Query(params): Query<DeviceListParams>,
) -> Result<Json<Vec<Device>>, ManagerError> {
    let devices = state
        .deployments
        .get_device_list(&id, &params.query, params.is_latest)
        .await?;
    Ok(Json(devices))
}
