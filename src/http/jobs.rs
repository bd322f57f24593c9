// src/http/jobs.rs
// GET/POST/PUT/DELETE /api/jobs[/{id}], POST /api/jobs/webhook/{jobId}?secret=... (§6).

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Id, Job, TriggerType};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct JobRequest {
    name: String,
    trigger_type: TriggerType,
    cron_schedule: Option<String>,
    webhook_secret: Option<String>,
    prompt: Option<String>,
    #[serde(default)]
    auto_run_llm: bool,
    #[serde(default = "default_true")]
    is_enabled: bool,
}

fn default_true() -> bool {
    true
}

pub async fn list(State(state): State<AppState>, current: AuthenticatedUser) -> AppResult<Json<Vec<Job>>> {
    Ok(Json(state.db.list_jobs(current.organization_id).map_err(AppError::Internal)?))
}

pub async fn create(State(state): State<AppState>, current: AuthenticatedUser, Json(req): Json<JobRequest>) -> AppResult<Json<Job>> {
    let job = state
        .db
        .create_job(
            current.organization_id,
            &req.name,
            req.trigger_type,
            req.cron_schedule.as_deref(),
            req.webhook_secret.as_deref(),
            req.prompt.as_deref(),
            req.auto_run_llm,
        )
        .map_err(AppError::Internal)?;
    Ok(Json(job))
}

pub async fn update(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Path(id): Path<Id>,
    Json(req): Json<JobRequest>,
) -> AppResult<Json<Job>> {
    state
        .db
        .update_job(
            current.organization_id,
            id,
            &req.name,
            req.trigger_type,
            req.cron_schedule.as_deref(),
            req.webhook_secret.as_deref(),
            req.prompt.as_deref(),
            req.auto_run_llm,
            req.is_enabled,
        )
        .map_err(AppError::Internal)?;
    let job = state.db.get_job(current.organization_id, id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;
    Ok(Json(job))
}

pub async fn remove(State(state): State<AppState>, current: AuthenticatedUser, Path(id): Path<Id>) -> AppResult<()> {
    state.db.delete_job(current.organization_id, id).map_err(AppError::Internal)?;
    Ok(())
}

#[derive(Deserialize)]
pub struct WebhookQuery {
    secret: String,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    job_run_id: Id,
}

/// Unauthenticated (§6): the query-string secret, checked in constant time
/// against the job's stored secret, is the only gate here.
pub async fn webhook(
    State(state): State<AppState>,
    Path(job_id): Path<Id>,
    Query(query): Query<WebhookQuery>,
    body: String,
) -> AppResult<Json<WebhookResponse>> {
    let job_run_id = state.jobs.handle_webhook(job_id, &query.secret, body).await?;
    Ok(Json(WebhookResponse { job_run_id }))
}
