//! Deploy and rollback handlers.
//!
//! A deploy runs in its own task: once containers have been told to start,
//! a client disconnect must not abandon the bundle halfway, so the engine
//! always runs to promote-or-restore. Overlapping deploys are rejected with
//! 409 `deploy_in_progress`.

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use tracing::info;

use common::api::{DeployRequest, DeployResponse, RollbackResponse};

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::generate::sanitize_name;
use crate::state::State as StateDoc;

use super::sanitize_targets;

const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) async fn deploy(
    State(state): State<AppState>,
    body: Result<Json<DeployRequest>, JsonRejection>,
) -> ApiResult<Json<DeployResponse>> {
    // An absent or malformed body means "deploy everything with defaults".
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let timeout = match req.timeout_ms {
        Some(ms) if ms > 0 => Duration::from_millis(ms),
        _ => DEFAULT_HEALTH_TIMEOUT,
    };

    let targets = if req.services.is_empty() {
        sanitize_targets(req.service.as_deref().into_iter())
    } else {
        sanitize_targets(req.services.iter().map(String::as_str))
    };
    info!(?targets, ?timeout, "deploy: request received");

    let doc = state.store.load().await?;
    let time = run_detached_deploy(state, doc, targets, timeout).await?;

    Ok(Json(DeployResponse {
        status: "deployed".to_string(),
        time: time.to_rfc3339(),
    }))
}

/// Run the apply (and the follow-up `last_deploy` stamping) on a spawned
/// task so a dropped client connection cannot cancel it mid-flight.
pub(crate) async fn run_detached_deploy(
    state: AppState,
    doc: StateDoc,
    targets: Vec<String>,
    timeout: Duration,
) -> Result<DateTime<Utc>, AppError> {
    let handle = tokio::spawn(async move {
        let time = state.engine.apply(&doc, &targets, timeout).await?;

        let mut doc = state.store.load().await?;
        for svc in &mut doc.services {
            if targets.is_empty() || targets.contains(&sanitize_name(&svc.name)) {
                svc.last_deploy = Some(time);
            }
        }
        state.store.save(doc).await?;
        Ok::<_, AppError>(time)
    });

    handle
        .await
        .map_err(|err| AppError::internal(format!("deploy task failed: {err}")))?
}

pub(crate) async fn rollback(
    State(state): State<AppState>,
) -> ApiResult<Json<RollbackResponse>> {
    let handle = tokio::spawn(async move { state.engine.rollback().await });
    let from = handle
        .await
        .map_err(|err| AppError::internal(format!("rollback task failed: {err}")))??;
    info!(%from, "rollback: complete");
    Ok(Json(RollbackResponse {
        status: "rolled_back".to_string(),
        from,
    }))
}
