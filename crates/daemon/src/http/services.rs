//! Service catalog handlers.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use tracing::info;

use common::api::{Service, ServiceResources, ServiceSpec, SERVICE_TYPE_REGISTRY_IMAGE};

use crate::app_state::AppState;
use crate::cloudflare::{tunnel_cname_target, CloudflareClient};
use crate::error::{ApiResult, AppError};
use crate::generate::sanitize_name;
use crate::validate;

use super::{container_status_map, describe_status};

pub(crate) async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Service>>> {
    let doc = state.store.load().await?;
    let status_map = container_status_map(&state).await;

    let services = doc
        .services
        .into_iter()
        .map(|mut svc| {
            match status_map.get(&sanitize_name(&svc.name)) {
                Some(status) => svc.status = Some(describe_status(status)),
                None => {
                    if svc.status.as_deref().unwrap_or("").is_empty() {
                        svc.status = Some("unknown".to_string());
                    }
                }
            }
            svc
        })
        .collect();
    Ok(Json(services))
}

pub(crate) async fn create(
    State(state): State<AppState>,
    Json(spec): Json<ServiceSpec>,
) -> ApiResult<Json<Service>> {
    let image = spec.image.trim().to_string();
    if image.is_empty() {
        return Err(AppError::bad_request("image is required"));
    }

    let name = match spec.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => name_from_image(&image),
    };

    let mut doc = state.store.load().await?;

    // Synthesize a hostname when none was given and a default domain exists.
    let mut hostnames = spec.hostnames.clone();
    if hostnames.is_empty() {
        if let Some(domain) = doc
            .settings
            .default_domain
            .as_deref()
            .filter(|d| !d.is_empty())
        {
            let auto = format!("{}.{domain}", sanitize_name(&name));
            info!(hostname = %auto, "add service: auto-generated hostname");
            hostnames.push(auto);
        }
    }

    // Detect the port from the image when omitted.
    let internal_port = match spec.internal_port {
        Some(port) => port,
        None => {
            state.compose.pull_image(&image).await.map_err(|err| {
                AppError::bad_request(format!("failed to pull image for port detection: {err}"))
            })?;
            state
                .compose
                .inspect_image_port(&image)
                .await
                .map_err(|err| {
                    AppError::bad_request(format!("failed to detect port from image: {err}"))
                })?
                .unwrap_or(80)
        }
    };

    validate::service_name(&name)?;
    validate::image_name(&image)?;
    validate::port(u32::from(internal_port))?;
    for hostname in &hostnames {
        validate::hostname(hostname)?;
    }
    for (key, value) in &spec.env {
        validate::env_key(key)?;
        validate::env_value(value)?;
    }
    for volume in &spec.volumes {
        validate::volume_spec(volume)?;
    }
    if let Some(hc) = &spec.healthcheck {
        validate::healthcheck_command(&hc.command)?;
    }

    let svc = Service {
        id: spec
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("{}-{}", sanitize_name(&name), Utc::now().timestamp())),
        kind: spec
            .kind
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| SERVICE_TYPE_REGISTRY_IMAGE.to_string()),
        name,
        image,
        internal_port,
        hostnames,
        env: spec.env,
        volumes: spec.volumes,
        healthcheck: spec.healthcheck,
        resources: match spec.resources {
            Some(resources) if resources.memory_limit_mb > 0 => resources,
            _ => ServiceResources::default(),
        },
        enabled: spec.enabled.unwrap_or(true),
        last_deploy: None,
        status: None,
    };

    if spec.cloudflare && !svc.hostnames.is_empty() {
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
            (Some(token), Some(tunnel_id)) => (token, tunnel_id),
            _ => {
                return Err(AppError::bad_request(
                    "cloudflare tunnel not initialized; run tinyserve init first",
                ))
            }
        };

        let client = CloudflareClient::new(token);
        let target = tunnel_cname_target(tunnel_id);
        for hostname in &svc.hostnames {
            info!(%hostname, "add service: looking up Cloudflare zone");
            let zone_id = client
                .find_zone_for_hostname(hostname)
                .await
                .map_err(|err| {
                    AppError::bad_request(format!("get zone ID for {hostname}: {err}"))
                })?;
            info!(%hostname, %target, "add service: ensuring CNAME");
            client
                .ensure_cname(&zone_id, hostname, &target, true)
                .await
                .map_err(|err| {
                    AppError::upstream(format!("configure DNS for {hostname}: {err}"))
                })?;
        }
    }

    for existing in &doc.services {
        if existing.name.eq_ignore_ascii_case(&svc.name) {
            return Err(AppError::conflict("service name already exists"));
        }
        for existing_host in &existing.hostnames {
            for new_host in &svc.hostnames {
                if existing_host.eq_ignore_ascii_case(new_host) {
                    return Err(AppError::conflict(format!(
                        "hostname {new_host:?} already used by service {:?}",
                        existing.name
                    )));
                }
            }
        }
    }

    doc.services.push(svc.clone());
    state.store.save(doc).await?;
    Ok(Json(svc))
}

pub(crate) async fn update(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(spec): Json<ServiceSpec>,
) -> ApiResult<Json<Service>> {
    let mut doc = state.store.load().await?;
    let Some(idx) = doc
        .services
        .iter()
        .position(|svc| svc.name.eq_ignore_ascii_case(&name))
    else {
        return Err(AppError::not_found(format!("service {name:?} not found")));
    };

    let current = doc.services[idx].clone();
    let new_name = spec
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&current.name)
        .to_string();
    let image = match spec.image.trim() {
        "" => current.image.clone(),
        image => image.to_string(),
    };
    let internal_port = spec.internal_port.unwrap_or(current.internal_port);

    validate::service_name(&new_name)?;
    validate::image_name(&image)?;
    validate::port(u32::from(internal_port))?;
    for hostname in &spec.hostnames {
        validate::hostname(hostname)?;
    }
    for (key, value) in &spec.env {
        validate::env_key(key)?;
        validate::env_value(value)?;
    }
    for volume in &spec.volumes {
        validate::volume_spec(volume)?;
    }
    if let Some(hc) = &spec.healthcheck {
        validate::healthcheck_command(&hc.command)?;
    }

    for (i, existing) in doc.services.iter().enumerate() {
        if i == idx {
            continue;
        }
        if existing.name.eq_ignore_ascii_case(&new_name) {
            return Err(AppError::conflict("service name already exists"));
        }
        for existing_host in &existing.hostnames {
            for new_host in &spec.hostnames {
                if existing_host.eq_ignore_ascii_case(new_host) {
                    return Err(AppError::conflict(format!(
                        "hostname {new_host:?} already used by service {:?}",
                        existing.name
                    )));
                }
            }
        }
    }

    let updated = Service {
        id: current.id,
        name: new_name,
        kind: spec
            .kind
            .filter(|k| !k.is_empty())
            .unwrap_or(current.kind),
        image,
        internal_port,
        hostnames: spec.hostnames,
        env: spec.env,
        volumes: spec.volumes,
        healthcheck: spec.healthcheck,
        resources: match spec.resources {
            Some(resources) if resources.memory_limit_mb > 0 => resources,
            _ => current.resources,
        },
        enabled: spec.enabled.unwrap_or(current.enabled),
        last_deploy: current.last_deploy,
        status: None,
    };

    doc.services[idx] = updated.clone();
    state.store.save(doc).await?;
    Ok(Json(updated))
}

pub(crate) async fn remove(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if name.is_empty() {
        return Err(AppError::bad_request("service name required"));
    }

    let mut doc = state.store.load().await?;
    let before = doc.services.len();
    doc.services
        .retain(|svc| !svc.name.eq_ignore_ascii_case(&name));
    if doc.services.len() == before {
        return Err(AppError::not_found(format!("service {name:?} not found")));
    }

    state.store.save(doc).await?;
    Ok(Json(serde_json::json!({ "status": "removed", "name": name })))
}

/// Extract a service name from an image reference: the last path component
/// minus any tag or digest.
pub(crate) fn name_from_image(image: &str) -> String {
    let mut image = image;
    if let Some(idx) = image.rfind(':') {
        // Not a tag separator if a path component follows (registry:5000/img).
        if !image[idx..].contains('/') {
            image = &image[..idx];
        }
    }
    if let Some(idx) = image.rfind('@') {
        image = &image[..idx];
    }
    if let Some(idx) = image.rfind('/') {
        image = &image[idx + 1..];
    }
    sanitize_name(image)
}
