// src/http/host_notes.rs
// GET /api/hosts/{id}/note, POST /api/hosts/{id}/note/refresh (§6).

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{HostNote, Id};
use axum::extract::{Path, State};
use axum::Json;

pub async fn get_note(State(state): State<AppState>, current: AuthenticatedUser, Path(id): Path<Id>) -> AppResult<Json<Option<HostNote>>> {
    Ok(Json(state.db.get_host_note(current.organization_id, id).map_err(AppError::Internal)?))
}

/// Regenerates a host's note by asking the orchestrator's model to summarize
/// recent command history for it, in a dedicated single-message session
/// scoped to just that host (§4.6 ambient tool, exposed directly here too).
pub async fn refresh_note(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Path(id): Path<Id>,
) -> AppResult<Json<HostNote>> {
    let host = state.db.get_host(current.organization_id, id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;

    let session = state
        .db
        .create_session(current.organization_id, current.user_id, vec![host.id], false)
        .map_err(AppError::Internal)?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = tokio_util::sync::CancellationToken::new();
    let prompt = format!(
        "Review host {} and call update_host_note with a short, current summary of its role, health, and anything operationally relevant.",
        host.hostname
    );
    state
        .orchestrator
        .send_message_stream(current.organization_id, current.user_id, &session, &prompt, None, tx, cancel)
        .await?;
    while rx.recv().await.is_some() {}

    let note = state
        .db
        .get_host_note(current.organization_id, id)
        .map_err(AppError::Internal)?
        .ok_or(AppError::NotFound)?;
    Ok(Json(note))
}
