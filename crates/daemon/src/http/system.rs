//! Status, version, health, logs, and identity handlers.

use axum::body::Body;
use axum::extract::{Extension, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use common::api::{
    EndpointHealth, HealthResponse, StatusResponse, TunnelConfigSummary, VersionResponse,
};

use crate::app_state::AppState;
use crate::auth::BrowserUser;
use crate::compose::ContainerStatus;
use crate::error::{ApiResult, AppError};
use crate::generate::sanitize_name;
use crate::version;

use super::{container_status_map, summarize_container};

pub(crate) async fn status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let doc = state.store.load().await?;
    let status_map = container_status_map(&state).await;

    let tunnel_config = doc
        .settings
        .tunnel
        .tunnel_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map(|id| TunnelConfigSummary {
            id: id.to_string(),
            name: doc.settings.tunnel.tunnel_name.clone(),
            domain: doc.settings.default_domain.clone(),
        });

    Ok(Json(StatusResponse {
        status: "ok".to_string(),
        service_count: doc.services.len(),
        updated_at: doc.updated_at.to_rfc3339(),
        proxy: summarize_container(status_map.get("traefik")),
        tunnel: summarize_container(status_map.get("cloudflared")),
        tunnel_config,
        has_cloudflare_token: doc
            .settings
            .cloudflare_api_token
            .as_deref()
            .is_some_and(|t| !t.is_empty()),
    }))
}

pub(crate) async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: version::VERSION.to_string(),
        commit: version::COMMIT.to_string(),
        date: version::DATE.to_string(),
    })
}

fn endpoint_health(status: Option<&ContainerStatus>, label: &str) -> EndpointHealth {
    let Some(status) = status.filter(|s| !s.state.is_empty()) else {
        return EndpointHealth {
            running: false,
            state: String::new(),
            health: None,
            error: Some(format!("{label} container not found")),
        };
    };
    let running = status.state == "running";
    EndpointHealth {
        running,
        state: status.state.clone(),
        health: Some(status.health.clone()).filter(|h| !h.is_empty()),
        error: (!running).then(|| format!("{label} container not running: {}", status.state)),
    }
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status_map = container_status_map(&state).await;
    let proxy = endpoint_health(status_map.get("traefik"), "proxy");
    let tunnel = endpoint_health(status_map.get("cloudflared"), "tunnel");

    let healthy = proxy.running
        && tunnel.running
        && proxy.health.as_deref().is_none_or(|h| h == "healthy")
        && tunnel.health.as_deref().is_none_or(|h| h == "healthy");

    Json(HealthResponse {
        daemon: "ok".to_string(),
        proxy,
        tunnel,
        healthy,
        error: None,
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogsParams {
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    tail: Option<String>,
    #[serde(default)]
    follow: Option<String>,
}

pub(crate) async fn logs(
    State(state): State<AppState>,
    Query(params): Query<LogsParams>,
) -> ApiResult<Response> {
    let service = params
        .service
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::bad_request("service is required"))?;
    let tail = params
        .tail
        .as_deref()
        .and_then(|t| t.parse::<usize>().ok())
        .unwrap_or(200);
    let follow = params.follow.as_deref() == Some("1");

    // Named internal channels short-circuit to the in-memory rings.
    if let Some(buffer) = state.access_logs.get(service) {
        if follow {
            return Err(AppError::bad_request("follow not supported for access logs"));
        }
        let lines = buffer.lines(tail);
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        return Ok(plain_text(body));
    }

    let current = state.paths.current_dir();
    let target = sanitize_name(service);

    if follow {
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        let compose = state.compose.clone();
        tokio::spawn(async move {
            let _ = compose.logs_follow(&current, &target, tail, tx).await;
        });
        let stream = futures_stream(rx);
        let response = Response::builder()
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header("X-Content-Type-Options", "nosniff")
            .body(Body::from_stream(stream))
            .map_err(|err| AppError::internal(format!("build stream response: {err}")))?;
        return Ok(response);
    }

    let output = state
        .compose
        .logs(&current, &target, tail)
        .await
        .map_err(|err| AppError::upstream(format!("logs: {err}")))?;
    Ok(plain_text(output))
}

fn plain_text(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

fn futures_stream(
    rx: mpsc::Receiver<Bytes>,
) -> impl futures_util::Stream<Item = Result<Bytes, std::convert::Infallible>> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok(chunk), rx))
    })
}

pub(crate) async fn me(
    Extension(user): Extension<Option<BrowserUser>>,
) -> Json<serde_json::Value> {
    match user {
        Some(user) => Json(json!({
            "authenticated": true,
            "email": user.email,
            "name": user.name,
            "id": user.id,
            "provider": user.provider,
        })),
        None => Json(json!({ "authenticated": false })),
    }
}
