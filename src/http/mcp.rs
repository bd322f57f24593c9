// src/http/mcp.rs
// GET/POST/DELETE /api/mcp[/{id}], POST /api/mcp/{id}/test (§6).

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::llm::provider::ToolDefinition;
use crate::models::{Id, McpServer, McpTransportType};
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Deserialize)]
pub struct McpServerRequest {
    name: String,
    transport_type: McpTransportType,
    base_url: Option<String>,
    api_key: Option<String>,
    command: Option<String>,
    #[serde(default)]
    arguments: Vec<String>,
    working_directory: Option<String>,
    #[serde(default)]
    environment_variables: BTreeMap<String, String>,
}

pub async fn list(State(state): State<AppState>, current: AuthenticatedUser) -> AppResult<Json<Vec<McpServer>>> {
    Ok(Json(state.db.list_mcp_servers(current.organization_id).map_err(AppError::Internal)?))
}

pub async fn create(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Json(req): Json<McpServerRequest>,
) -> AppResult<Json<McpServer>> {
    let api_key_encrypted = req
        .api_key
        .as_deref()
        .map(|key| state.cipher.encrypt(key))
        .transpose()
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    let server = state
        .db
        .create_mcp_server(
            current.organization_id,
            &req.name,
            req.transport_type,
            req.base_url.as_deref(),
            api_key_encrypted.as_deref(),
            req.command.as_deref(),
            req.arguments,
            req.working_directory.as_deref(),
            req.environment_variables,
        )
        .map_err(AppError::Internal)?;
    Ok(Json(server))
}

pub async fn remove(State(state): State<AppState>, current: AuthenticatedUser, Path(id): Path<Id>) -> AppResult<()> {
    state.db.delete_mcp_server(current.organization_id, id).map_err(AppError::Internal)?;
    state.mcp_stdio_cache.evict(id).await;
    Ok(())
}

pub async fn test(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Path(id): Path<Id>,
) -> AppResult<Json<Vec<ToolDefinition>>> {
    let tools = state
        .mcp
        .test_connection(current.organization_id, id)
        .await
        .map_err(|e| AppError::UpstreamFailure(e.to_string()))?;
    Ok(Json(tools))
}
