// src/http/access_tokens.rs
// GET/POST/DELETE /api/access-tokens[/{id}] (§6). POST returns the raw
// token once; it is never retrievable again afterward.

use super::AppState;
use crate::auth::{self, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::models::{AccessToken, Id};
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub async fn list(State(state): State<AppState>, current: AuthenticatedUser) -> AppResult<Json<Vec<AccessToken>>> {
    Ok(Json(state.db.list_access_tokens(current.organization_id, current.user_id).map_err(AppError::Internal)?))
}

#[derive(Deserialize)]
pub struct CreateAccessTokenRequest {
    label: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct CreateAccessTokenResponse {
    token: String,
    access_token: AccessToken,
}

pub async fn create(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Json(req): Json<CreateAccessTokenRequest>,
) -> AppResult<Json<CreateAccessTokenResponse>> {
    let (token, hash) = auth::generate_access_token();
    let access_token = state
        .db
        .create_access_token(current.organization_id, current.user_id, &req.label, &hash, req.expires_at)
        .map_err(AppError::Internal)?;
    Ok(Json(CreateAccessTokenResponse { token, access_token }))
}

pub async fn remove(State(state): State<AppState>, current: AuthenticatedUser, Path(id): Path<Id>) -> AppResult<()> {
    state.db.revoke_access_token(current.organization_id, id).map_err(AppError::Internal)?;
    Ok(())
}
