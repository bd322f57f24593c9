// src/http/credentials.rs
// GET/POST/DELETE /api/credentials[/{id}] (§6). No PUT: credentials are
// replaced, not edited, so rotation can't accidentally leave a stale secret.

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Credential, CredentialKind, Id};
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct CredentialRequest {
    name: String,
    kind: CredentialKind,
    value: String,
}

pub async fn list(State(state): State<AppState>, current: AuthenticatedUser) -> AppResult<Json<Vec<Credential>>> {
    Ok(Json(state.db.list_credentials(current.organization_id).map_err(AppError::Internal)?))
}

pub async fn create(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Json(req): Json<CredentialRequest>,
) -> AppResult<Json<Credential>> {
    let encrypted = state.cipher.encrypt(&req.value).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    let credential = state
        .db
        .create_credential(current.organization_id, &req.name, req.kind, &encrypted)
        .map_err(AppError::Internal)?;
    Ok(Json(credential))
}

pub async fn remove(State(state): State<AppState>, current: AuthenticatedUser, Path(id): Path<Id>) -> AppResult<()> {
    state.db.delete_credential(current.organization_id, id).map_err(AppError::Internal)?;
    Ok(())
}
