//! Token-authenticated webhook deploys.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use common::api::WebhookDeployResponse;

use crate::app_state::AppState;
use crate::auth::require_webhook_token;
use crate::error::{ApiResult, AppError};
use crate::generate::sanitize_name;
use crate::http::deploys::run_detached_deploy;

const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub(crate) struct WebhookParams {
    #[serde(default)]
    timeout: Option<String>,
}

pub(crate) async fn deploy(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(params): Query<WebhookParams>,
    headers: HeaderMap,
) -> ApiResult<Json<WebhookDeployResponse>> {
    let service = service.trim();
    if service.is_empty() {
        return Err(AppError::bad_request("service is required"));
    }

    let token = require_webhook_token(state.store.as_ref(), &headers).await?;

    let timeout = match params.timeout.as_deref().filter(|t| !t.is_empty()) {
        None => DEFAULT_WEBHOOK_TIMEOUT,
        Some(raw) => match raw.parse::<i64>() {
            Ok(seconds) if seconds > 0 => Duration::from_secs(seconds as u64),
            _ => return Err(AppError::bad_request("invalid timeout")),
        },
    };

    let doc = state.store.load().await?;
    let Some(svc) = doc.service_by_name(service) else {
        return Err(AppError::not_found("service not found"));
    };
    if !svc.enabled {
        return Err(AppError::bad_request("service disabled"));
    }
    let svc_name = svc.name.clone();
    info!(service = %svc_name, token = %token.name, "webhook deploy: start");

    let targets = vec![sanitize_name(&svc_name)];
    let time = run_detached_deploy(state, doc, targets, timeout)
        .await
        .map_err(|app| AppError {
            message: format!("deploy failed: {}", app.message),
            ..app
        })?;

    Ok(Json(WebhookDeployResponse {
        status: "deployed".to_string(),
        service: svc_name,
        time: time.to_rfc3339(),
    }))
}
