//! Request authentication: webhook bearer tokens and the browser-auth seam.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use common::api::BrowserAuthType;

use crate::app_state::AppState;
use crate::error::AppError;
use crate::state::{ApiToken, Store};
use crate::tokens;

/// Identity asserted by the upstream browser-auth proxy.
#[derive(Debug, Clone, Serialize)]
pub struct BrowserUser {
    /// Authenticated email address.
    pub email: String,
    /// Display name, when the proxy provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Provider-scoped user id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The provider that asserted the identity.
    pub provider: &'static str,
}

/// Authenticate a webhook request against the stored token hashes.
///
/// On success the matched token's `last_used` is stamped through the store;
/// a failed stamp is logged, never fatal. Every failure path returns 401
/// before any side effect.
pub async fn require_webhook_token(
    store: &dyn Store,
    headers: &HeaderMap,
) -> Result<ApiToken, AppError> {
    let state = store.load().await.map_err(AppError::from)?;
    if state.tokens.is_empty() {
        return Err(AppError::unauthorized("no tokens configured"));
    }

    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("authorization required"))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::unauthorized("invalid authorization header"))?;
    if !tokens::is_valid_token_format(token) {
        return Err(AppError::unauthorized("invalid token format"));
    }

    let matched = state
        .tokens
        .iter()
        .find(|stored| tokens::verify_token(token, &stored.hash))
        .cloned()
        .ok_or_else(|| AppError::unauthorized("invalid token"))?;

    let mut state = state;
    if let Some(stored) = state.tokens.iter_mut().find(|t| t.id == matched.id) {
        stored.last_used = Some(Utc::now());
    }
    if let Err(err) = store.save(state).await {
        warn!(error = %err, "webhook auth: last_used stamp failed");
    }

    Ok(matched)
}

/// Browser-auth middleware wrapped around the UI surface (and `/me`).
///
/// `none` passes everything through. `cloudflare_access` trusts the identity
/// headers set by the Access proxy in front of the tunnel; a request without
/// them never reached us through Access and is rejected.
pub async fn browser_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let doc = match state.store.load().await {
        Ok(doc) => doc,
        Err(err) => return AppError::from(err).into_response(),
    };

    match doc.settings.remote.browser_auth.auth_type {
        BrowserAuthType::None => {
            req.extensions_mut().insert(None::<BrowserUser>);
            next.run(req).await
        }
        BrowserAuthType::CloudflareAccess => {
            let email = req
                .headers()
                .get("Cf-Access-Authenticated-User-Email")
                .and_then(|value| value.to_str().ok())
                .filter(|email| !email.is_empty())
                .map(str::to_string);
            match email {
                Some(email) => {
                    let id = req
                        .headers()
                        .get("Cf-Access-Authenticated-User-Id")
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    req.extensions_mut().insert(Some(BrowserUser {
                        email,
                        name: None,
                        id,
                        provider: "cloudflare_access",
                    }));
                    next.run(req).await
                }
                None => AppError::unauthorized("browser authentication required").into_response(),
            }
        }
    }
}
