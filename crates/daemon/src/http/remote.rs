//! Tunnel init and remote-access handlers.

use axum::extract::State;
use axum::Json;
use serde_json::json;
use tracing::{info, warn};

use common::api::{InitRequest, InitResponse, RemoteEnableRequest, TunnelMode};

use crate::app_state::AppState;
use crate::cloudflare::{tunnel_cname_target, CloudflareClient};
use crate::error::{ApiResult, AppError};
use crate::paths::write_private_file;
use crate::validate;

pub(crate) async fn init(
    State(state): State<AppState>,
    Json(req): Json<InitRequest>,
) -> ApiResult<Json<InitResponse>> {
    if req.api_token.is_empty() {
        return Err(AppError::bad_request("api_token is required"));
    }

    let tunnel_name = match req.tunnel_name.filter(|n| !n.is_empty()) {
        Some(name) => name,
        None => {
            let host = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| "tinyserve".to_string());
            format!("tinyserve-{host}")
        }
    };

    state
        .compose
        .verify_daemon()
        .await
        .map_err(|err| AppError::upstream(format!("docker check failed: {err}")))?;

    let client = CloudflareClient::new(&req.api_token);

    let account_id = match req.account_id.filter(|id| !id.is_empty()) {
        Some(id) => id,
        None => client
            .account_id()
            .await
            .map_err(|err| AppError::bad_request(format!("get account ID: {err}")))?,
    };

    let existing = client
        .find_tunnel(&account_id, &tunnel_name)
        .await
        .map_err(|err| AppError::upstream(format!("find tunnel: {err}")))?;
    let created = existing.is_none();

    let (tunnel_id, creds) = match existing {
        Some(tunnel) => (tunnel.id, None),
        None => {
            let (tunnel, creds) = client
                .create_tunnel(&account_id, &tunnel_name)
                .await
                .map_err(|err| AppError::upstream(format!("create tunnel: {err}")))?;
            (tunnel.id, Some(creds))
        }
    };

    let token = client
        .tunnel_token(&account_id, &tunnel_id)
        .await
        .map_err(|err| AppError::upstream(format!("get tunnel token: {err}")))?;

    let mut creds_path = None;
    if let Some(creds) = creds {
        let path = state
            .paths
            .cloudflared_dir
            .join(format!("{tunnel_id}.json"));
        let raw = serde_json::to_vec_pretty(&creds)
            .map_err(|err| AppError::internal(format!("encode credentials: {err}")))?;
        write_private_file(&path, raw)
            .map_err(|err| AppError::internal(format!("write credentials: {err}")))?;
        creds_path = Some(path.to_string_lossy().into_owned());
    }

    let mut doc = state.store.load().await?;
    doc.settings.default_domain = req.domain.clone().filter(|d| !d.is_empty());
    doc.settings.tunnel.mode = TunnelMode::Token;
    doc.settings.tunnel.token = Some(token);
    doc.settings.tunnel.tunnel_id = Some(tunnel_id.clone());
    doc.settings.tunnel.tunnel_name = Some(tunnel_name.clone());
    doc.settings.tunnel.account_id = Some(account_id.clone());
    doc.settings.cloudflare_api_token = Some(req.api_token);
    if creds_path.is_some() {
        doc.settings.tunnel.credentials_file = creds_path;
    }
    state.store.save(doc).await?;

    Ok(Json(InitResponse {
        status: "initialized".to_string(),
        tunnel_id,
        tunnel_name,
        domain: req.domain,
        account_id,
        created,
    }))
}

pub(crate) async fn init_token(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let doc = state.store.load().await?;
    Ok(Json(json!({
        "cloudflare_api_token": doc.settings.cloudflare_api_token.unwrap_or_default(),
    })))
}

pub(crate) async fn enable(
    State(state): State<AppState>,
    Json(req): Json<RemoteEnableRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let ui_hostname = req
        .ui_hostname
        .as_deref()
        .or(req.hostname.as_deref())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string);
    let api_hostname = req
        .api_hostname
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string);

    if ui_hostname.is_none() && api_hostname.is_none() {
        return Err(AppError::bad_request(
            "ui_hostname or api_hostname is required",
        ));
    }
    if let Some(host) = ui_hostname.as_deref() {
        validate::hostname(host)?;
    }
    if let Some(host) = api_hostname.as_deref() {
        validate::hostname(host)?;
    }

    let mut doc = state.store.load().await?;
    doc.settings.remote.enabled = true;
    doc.settings.remote.ui_hostname = ui_hostname.clone();
    doc.settings.remote.api_hostname = api_hostname.clone();

    if req.cloudflare {
        info!(ui = ?ui_hostname, api = ?api_hostname, "remote enable: starting Cloudflare setup");
        let (token, tunnel_id) = match (
            doc.settings
                .cloudflare_api_token
                .as_deref()
                .filter(|t| !t.is_empty()),
            doc.settings
                .tunnel
                .tunnel_id
                .as_deref()
                .filter(|id| !id.is_empty()),
        ) {
            (Some(token), Some(tunnel_id)) => (token.to_string(), tunnel_id.to_string()),
            _ => {
                return Err(AppError::bad_request(
                    "cloudflare tunnel not initialized; run tinyserve init first",
                ))
            }
        };

        let client = CloudflareClient::new(token);
        let target = tunnel_cname_target(&tunnel_id);
        for host in [ui_hostname.as_deref(), api_hostname.as_deref()]
            .into_iter()
            .flatten()
        {
            let zone_id = client
                .find_zone_for_hostname(host)
                .await
                .map_err(|err| AppError::bad_request(format!("get zone ID: {err}")))?;
            info!(%host, %target, "remote enable: ensuring CNAME");
            client
                .ensure_cname(&zone_id, host, &target, true)
                .await
                .map_err(|err| AppError::upstream(format!("configure DNS: {err}")))?;
        }

        // Promote an infrastructure-only bundle so cloudflared picks up the
        // new ingress; skipped when the container daemon is unreachable, and
        // containers are left for the next deploy either way.
        match state.compose.verify_daemon().await {
            Ok(()) => {
                if let Err(err) = state.engine.promote_infra_only(&doc).await {
                    warn!(error = %err, "remote enable: infra promote failed");
                }
            }
            Err(err) => {
                info!(error = %err, "remote enable: skipping config generation, docker unavailable");
            }
        }
    }

    state.store.save(doc).await?;

    let mut resp = json!({ "status": "enabled" });
    if let Some(host) = ui_hostname {
        resp["ui_hostname"] = json!(host);
    }
    if let Some(host) = api_hostname {
        resp["api_hostname"] = json!(host);
    }
    if req.cloudflare {
        resp["cloudflare"] = json!("configured");
    }
    Ok(Json(resp))
}

pub(crate) async fn disable(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut doc = state.store.load().await?;
    doc.settings.remote.enabled = false;
    doc.settings.remote.ui_hostname = None;
    doc.settings.remote.api_hostname = None;
    state.store.save(doc).await?;
    Ok(Json(json!({ "status": "disabled" })))
}
