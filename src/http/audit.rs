// src/http/audit.rs
// GET /api/audit paginated search (§6).

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::models::{AuditEventType, AuditLog, Id};
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Deserialize)]
pub struct AuditQuery {
    event_type: Option<AuditEventType>,
    host_id: Option<Id>,
    user_id: Option<Id>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    cursor: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

#[derive(Serialize)]
pub struct AuditSearchResponse {
    logs: Vec<AuditLog>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    next_cursor: Option<DateTime<Utc>>,
}

pub async fn search(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditSearchResponse>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let logs = state
        .audit
        .search(
            current.organization_id,
            query.event_type,
            query.host_id,
            query.user_id,
            query.since,
            query.until,
            query.cursor,
            limit,
        )
        .map_err(AppError::Internal)?;

    let next_cursor = if logs.len() as i64 == limit { logs.last().map(|l| l.created_at) } else { None };
    Ok(Json(AuditSearchResponse { logs, next_cursor }))
}
