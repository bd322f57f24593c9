// src/http/hosts.rs
// GET/POST/PUT/DELETE /api/hosts[/{id}], POST /api/hosts/{id}/test-connection (§6).

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Host, Id};
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct HostRequest {
    hostname: String,
    port: u16,
    username: Option<String>,
    credential_id: Option<Id>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_environment")]
    environment: String,
    #[serde(default)]
    allow_insecure_ssl: bool,
}

fn default_environment() -> String {
    "production".to_string()
}

pub async fn list(State(state): State<AppState>, current: AuthenticatedUser) -> AppResult<Json<Vec<Host>>> {
    Ok(Json(state.db.list_hosts(current.organization_id).map_err(AppError::Internal)?))
}

pub async fn create(State(state): State<AppState>, current: AuthenticatedUser, Json(req): Json<HostRequest>) -> AppResult<Json<Host>> {
    let host = state
        .db
        .create_host(
            current.organization_id,
            &req.hostname,
            req.port,
            req.username.as_deref(),
            req.credential_id,
            req.tags,
            &req.environment,
            req.allow_insecure_ssl,
        )
        .map_err(AppError::Internal)?;
    Ok(Json(host))
}

pub async fn get(State(state): State<AppState>, current: AuthenticatedUser, Path(id): Path<Id>) -> AppResult<Json<Host>> {
    let host = state.db.get_host(current.organization_id, id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;
    Ok(Json(host))
}

pub async fn update(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Path(id): Path<Id>,
    Json(req): Json<HostRequest>,
) -> AppResult<Json<Host>> {
    state
        .db
        .update_host(
            current.organization_id,
            id,
            &req.hostname,
            req.port,
            req.username.as_deref(),
            req.credential_id,
            req.tags,
            &req.environment,
            req.allow_insecure_ssl,
        )
        .map_err(AppError::Internal)?;
    state.ssh.invalidate(id).await;
    let host = state.db.get_host(current.organization_id, id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;
    Ok(Json(host))
}

pub async fn remove(State(state): State<AppState>, current: AuthenticatedUser, Path(id): Path<Id>) -> AppResult<()> {
    state.db.delete_host(current.organization_id, id).map_err(AppError::Internal)?;
    state.ssh.invalidate(id).await;
    Ok(())
}

#[derive(Serialize)]
pub struct TestConnectionResponse {
    success: bool,
    message: Option<String>,
}

pub async fn test_connection(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Path(id): Path<Id>,
) -> AppResult<Json<TestConnectionResponse>> {
    let host = state.db.get_host(current.organization_id, id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;
    match state.ssh.test_connection(&host).await {
        Ok(()) => Ok(Json(TestConnectionResponse { success: true, message: None })),
        Err(err) => Ok(Json(TestConnectionResponse { success: false, message: Some(err.to_string()) })),
    }
}
