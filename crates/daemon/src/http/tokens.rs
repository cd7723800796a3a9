//! Webhook token CRUD.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;

use common::api::{CreateTokenRequest, CreatedToken, TokenInfo};

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::state::ApiToken;
use crate::tokens;

pub(crate) async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<TokenInfo>>> {
    let doc = state.store.load().await?;
    let infos = doc
        .tokens
        .iter()
        .map(|tok| TokenInfo {
            id: tok.id.clone(),
            name: tok.name.clone(),
            created_at: tok.created_at,
            last_used: tok.last_used,
        })
        .collect();
    Ok(Json(infos))
}

pub(crate) async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateTokenRequest>,
) -> ApiResult<Json<CreatedToken>> {
    let name = req
        .name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "unnamed".to_string());

    let plaintext = tokens::generate_token();
    let hash = tokens::hash_token(&plaintext)
        .map_err(|err| AppError::internal(format!("generate token: {err}")))?;

    let token = ApiToken {
        id: tokens::generate_token_id(),
        name: name.clone(),
        hash,
        created_at: Utc::now(),
        last_used: None,
    };

    let mut doc = state.store.load().await?;
    doc.tokens.push(token.clone());
    state.store.save(doc).await?;

    Ok(Json(CreatedToken {
        id: token.id,
        name: token.name,
        token: plaintext,
        created_at: token.created_at,
        message: "Store this token securely - it won't be shown again".to_string(),
    }))
}

pub(crate) async fn revoke(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if id.is_empty() {
        return Err(AppError::bad_request("token ID required"));
    }

    let mut doc = state.store.load().await?;
    let before = doc.tokens.len();
    doc.tokens.retain(|tok| tok.id != id);
    if doc.tokens.len() == before {
        return Err(AppError::not_found(format!("token {id:?} not found")));
    }

    state.store.save(doc).await?;
    Ok(Json(serde_json::json!({ "status": "revoked", "id": id })))
}
