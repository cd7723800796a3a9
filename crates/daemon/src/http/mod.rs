//! HTTP surface: three routers over one handler set.
//!
//! The admin router mounts everything; the UI router mounts the read-only
//! subset behind browser auth; the webhook router mounts only the deploy
//! hook. Method mismatches are 405s from the router itself.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::Router;
use chrono::Utc;

use crate::access_logs::LogBuffer;
use crate::app_state::AppState;
use crate::auth::browser_auth;
use crate::compose::ContainerStatus;
use crate::generate::sanitize_name;

use common::api::ContainerSummary;

pub mod deploys;
pub mod remote;
pub mod services;
pub mod system;
pub mod tokens;
pub mod webhook;

/// Full admin surface, bound to loopback.
pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(system::status))
        .route("/version", get(system::version))
        .route("/health", get(system::health))
        .route("/logs", get(system::logs))
        .route(
            "/me",
            get(system::me).route_layer(middleware::from_fn_with_state(
                state.clone(),
                browser_auth,
            )),
        )
        .route("/services", get(services::list).post(services::create))
        .route(
            "/services/{name}",
            put(services::update).delete(services::remove),
        )
        .route("/deploy", post(deploys::deploy))
        .route("/rollback", post(deploys::rollback))
        .route("/init", post(remote::init))
        .route("/init/token", get(remote::init_token))
        .route("/tokens", get(tokens::list).post(tokens::create))
        .route("/tokens/{id}", delete(tokens::revoke))
        .route("/remote/enable", post(remote::enable))
        .route("/remote/disable", post(remote::disable))
        .route("/webhook/deploy/{service}", post(webhook::deploy))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_access_log,
        ))
        .with_state(state)
}

/// Read-only UI surface, wrapped by browser auth; static assets are served
/// verbatim from the configured directory.
pub fn ui_router(state: AppState, static_dir: Option<std::path::PathBuf>) -> Router {
    let mut router = Router::new()
        .route("/status", get(system::status))
        .route("/services", get(services::list))
        .route("/me", get(system::me));

    if let Some(dir) = static_dir {
        router = router.fallback_service(tower_http::services::ServeDir::new(dir));
    }

    router
        .layer(middleware::from_fn_with_state(state.clone(), browser_auth))
        .layer(middleware::from_fn_with_state(state.clone(), ui_access_log))
        .with_state(state)
}

/// Webhook-only surface.
pub fn webhook_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/deploy/{service}", post(webhook::deploy))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            webhook_access_log,
        ))
        .with_state(state)
}

async fn record_access(logs: Arc<LogBuffer>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    logs.add(format!(
        "{} {method} {path} {}",
        Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        response.status().as_u16()
    ));
    response
}

async fn api_access_log(State(state): State<AppState>, req: Request, next: Next) -> Response {
    record_access(state.access_logs.api.clone(), req, next).await
}

async fn ui_access_log(State(state): State<AppState>, req: Request, next: Next) -> Response {
    record_access(state.access_logs.ui.clone(), req, next).await
}

async fn webhook_access_log(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    record_access(state.access_logs.webhook.clone(), req, next).await
}

/// Live container status keyed by lowercase compose service name. An absent
/// `current/` bundle yields an empty map; readers tolerate the transient
/// absence during a rollback.
pub(crate) async fn container_status_map(state: &AppState) -> HashMap<String, ContainerStatus> {
    let current = state.paths.current_dir();
    if !current.join("docker-compose.yml").is_file() {
        return HashMap::new();
    }
    match state.compose.ps_status(&current).await {
        Ok(containers) => containers
            .into_iter()
            .map(|c| (c.service.to_lowercase(), c))
            .collect(),
        Err(_) => HashMap::new(),
    }
}

pub(crate) fn summarize_container(status: Option<&ContainerStatus>) -> Option<ContainerSummary> {
    let status = status?;
    if status.service.is_empty() {
        return None;
    }
    Some(ContainerSummary {
        service: status.service.clone(),
        state: status.state.clone(),
        health: Some(status.health.clone()).filter(|h| !h.is_empty()),
    })
}

pub(crate) fn describe_status(status: &ContainerStatus) -> String {
    if !status.health.is_empty() {
        if status.health == "healthy" {
            return status.health.clone();
        }
        return format!("{} ({})", status.state, status.health);
    }
    status.state.clone()
}

pub(crate) fn sanitize_targets<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    names
        .filter(|name| !name.is_empty())
        .map(sanitize_name)
        .filter(|name| !name.is_empty())
        .collect()
}
