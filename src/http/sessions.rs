// src/http/sessions.rs
// GET /api/sessions, POST /api/sessions/{id}/messages (§6). The actual
// streamed reply goes out over `/hubs/chat`; this endpoint just kicks off
// the orchestrator turn under the Chat Task Manager and returns immediately.

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::hubs::HubEvent;
use crate::llm::orchestrator::OrchestratorEvent;
use crate::models::{Id, Session};
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

pub async fn list(State(state): State<AppState>, current: AuthenticatedUser) -> AppResult<Json<Vec<Session>>> {
    Ok(Json(state.db.list_sessions_for_user(current.organization_id, current.user_id).map_err(AppError::Internal)?))
}

#[derive(Deserialize)]
pub struct PostMessageRequest {
    content: String,
    #[serde(default)]
    host_ids: Option<Vec<Id>>,
    model: Option<String>,
}

#[derive(Serialize)]
pub struct PostMessageResponse {
    accepted: bool,
}

pub async fn post_message(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Path(id): Path<Id>,
    Json(req): Json<PostMessageRequest>,
) -> AppResult<Json<PostMessageResponse>> {
    let mut session = state.db.get_session(current.organization_id, id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;
    if session.user_id != current.user_id {
        return Err(AppError::Forbidden);
    }
    if let Some(host_ids) = req.host_ids {
        session.host_ids = host_ids;
    }

    let hubs = state.hubs.clone();
    let session_group = format!("session_{id}");
    hubs.publish(&session_group, HubEvent::MessageReceived { session_id: id, role: "user", content: req.content.clone() });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<OrchestratorEvent>();
    let orchestrator = state.orchestrator.clone();
    let organization_id = current.organization_id;
    let user_id = current.user_id;
    let content = req.content;
    let model = req.model;

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                OrchestratorEvent::TextDelta(text) => {
                    hubs.publish(&session_group, HubEvent::MessageReceived { session_id: id, role: "assistant", content: text });
                }
                OrchestratorEvent::AssistantTyping(typing) => {
                    hubs.publish(&session_group, HubEvent::AssistantTyping { session_id: id, typing });
                }
                OrchestratorEvent::Done => break,
            }
        }
    });

    state
        .chat_tasks
        .start(id, move |cancel| async move {
            if let Err(err) = orchestrator.send_message_stream(organization_id, user_id, &session, &content, model, tx, cancel).await {
                tracing::warn!(session = %id, error = %err, "chat turn ended with error");
            }
        })
        .await;

    Ok(Json(PostMessageResponse { accepted: true }))
}
