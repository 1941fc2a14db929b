//! HTTP route tests

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::Router;
use http::{Method, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use iot_manager::server::handlers::USER_ID_HEADER;
use iot_manager::server::serve::router;
use iot_manager::server::state::ServerState;

use crate::common::{firmware, Harness};

fn app(h: &Harness) -> Router {
    router(Arc::new(ServerState::new(h.store.clone())))
}

async fn call(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header(USER_ID_HEADER, "alice");
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let (status, body) = call(app(&h), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_create_and_list() {
    let h = Harness::new();
    let payload = serde_json::to_value(firmware("v1", 1)).unwrap();

    let (status, created) = call(app(&h), Method::POST, "/deployments", Some(payload)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["createdBy"], "alice");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, history) = call(app(&h), Method::GET, "/deployments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["total"], 1);

    let (status, live) = call(app(&h), Method::GET, "/deployments/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(live["items"][0]["id"], id.as_str());

    let uri = format!("/deployments/{}?isLatest=true&includeDeviceStatus=true", id);
    let (status, deployment) = call(app(&h), Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deployment["tags"][0], "reserved.latest");
}

#[tokio::test]
async fn test_invalid_create_is_bad_request() {
    let h = Harness::new();
    let mut deployment = firmware("v1", 1);
    deployment.name = String::new();
    let payload = serde_json::to_value(deployment).unwrap();

    let (status, body) = call(app(&h), Method::POST, "/deployments", Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("name"));
}

#[tokio::test]
async fn test_deactivate_and_reactivate() {
    let h = Harness::new();
    let created = h.store.create(firmware("v1", 1), "alice").await.unwrap();

    let uri = format!("/deployments/{}", created.id);
    let (status, _) = call(app(&h), Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let uri = format!("/deployments/{}/reactivate", created.id);
    let (status, revived) = call(app(&h), Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(revived["id"], created.id.as_str());
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let h = Harness::new();
    let (status, _) = call(app(&h), Method::GET, "/deployments/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(app(&h), Method::GET, "/deployments/missing?isLatest=true", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_device_list() {
    let h = Harness::new();
    h.add_device("d1", "1.0");
    let created = h.store.create(firmware("v1", 1), "alice").await.unwrap();

    let uri = format!(
        "/deployments/{}/devices?isLatest=true&query=deviceId%20IN%20%5B%27d1%27%5D",
        created.id
    );
    let (status, devices) = call(app(&h), Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(devices[0]["id"], "d1");
}
