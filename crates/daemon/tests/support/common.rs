#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

pub use tinyserved::state::Store;

use tinyserved::access_logs::AccessLogs;
use tinyserved::app_state::AppState;
use tinyserved::deploy::DeployEngine;
use tinyserved::generate::ListenerPorts;
use tinyserved::http::{admin_router, ui_router, webhook_router};
use tinyserved::paths::DataPaths;
use tinyserved::state::InMemoryStore;
use tinyserved::test_support::FakeCompose;

/// Everything a test needs to poke the daemon end to end.
pub struct TestApp {
    pub admin: Router,
    pub ui: Router,
    pub webhook: Router,
    pub store: Arc<InMemoryStore>,
    pub compose: Arc<FakeCompose>,
    pub state: AppState,
    _data_dir: TempDir,
}

pub fn setup_app() -> TestApp {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let paths = DataPaths::new(data_dir.path().join("data"));
    paths.ensure().expect("data dirs");

    let store = Arc::new(InMemoryStore::default());
    let compose = Arc::new(FakeCompose::healthy());
    let ports = ListenerPorts::default();
    let engine = Arc::new(
        DeployEngine::new(store.clone(), compose.clone(), paths.clone(), ports)
            .with_poll_interval(Duration::from_millis(5)),
    );

    let state = AppState {
        store: store.clone(),
        compose: compose.clone(),
        engine,
        paths,
        ports,
        access_logs: AccessLogs::default(),
    };

    TestApp {
        admin: admin_router(state.clone()),
        ui: ui_router(state.clone(), None),
        webhook: webhook_router(state.clone()),
        store,
        compose,
        state,
        _data_dir: data_dir,
    }
}

pub async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.expect("request")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request")
}

pub fn put_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request")
}

pub fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

pub async fn body_string(resp: Response<Body>) -> String {
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    let raw = body_string(resp).await;
    serde_json::from_str(&raw).unwrap_or_else(|err| panic!("invalid JSON body ({err}): {raw}"))
}

pub async fn add_service(app: &Router, name: &str, hostnames: &[&str]) -> serde_json::Value {
    let resp = send(
        app,
        post_json(
            "/services",
            serde_json::json!({
                "name": name,
                "image": "nginx:latest",
                "internal_port": 80,
                "hostnames": hostnames,
            }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK, "add service {name}");
    body_json(resp).await
}
