// src/http/policies.rs
// GET/POST/PUT/DELETE /api/policies[/{id}], GET /api/policies/presets,
// POST /api/policies/{id}/test, GET/POST/DELETE /api/policies/{id}/assignments[/{aid}] (§6).

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Id, Policy, PolicyAssignment};
use crate::policy::PolicyDecision;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct PolicyRequest {
    name: String,
    #[serde(default)]
    allowed_command_patterns: Vec<String>,
    #[serde(default)]
    denied_command_patterns: Vec<String>,
    #[serde(default)]
    require_approval: bool,
    #[serde(default = "default_max_concurrent")]
    max_concurrent_commands: u32,
    #[serde(default = "default_true")]
    is_enabled: bool,
}

fn default_max_concurrent() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

pub async fn list(State(state): State<AppState>, current: AuthenticatedUser) -> AppResult<Json<Vec<Policy>>> {
    Ok(Json(state.db.list_policies(current.organization_id).map_err(AppError::Internal)?))
}

pub async fn create(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Json(req): Json<PolicyRequest>,
) -> AppResult<Json<Policy>> {
    let policy = state
        .db
        .create_policy(
            current.organization_id,
            &req.name,
            req.allowed_command_patterns,
            req.denied_command_patterns,
            req.require_approval,
            req.max_concurrent_commands,
        )
        .map_err(AppError::Internal)?;
    Ok(Json(policy))
}

pub async fn update(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Path(id): Path<Id>,
    Json(req): Json<PolicyRequest>,
) -> AppResult<Json<Policy>> {
    state
        .db
        .update_policy(
            current.organization_id,
            id,
            &req.name,
            req.allowed_command_patterns,
            req.denied_command_patterns,
            req.require_approval,
            req.max_concurrent_commands,
            req.is_enabled,
        )
        .map_err(AppError::Internal)?;
    let policy = state.db.get_policy(current.organization_id, id).map_err(AppError::Internal)?.ok_or(AppError::NotFound)?;
    Ok(Json(policy))
}

pub async fn remove(State(state): State<AppState>, current: AuthenticatedUser, Path(id): Path<Id>) -> AppResult<()> {
    state.db.delete_policy(current.organization_id, id).map_err(AppError::Internal)?;
    Ok(())
}

#[derive(Serialize)]
pub struct PolicyPreset {
    name: &'static str,
    description: &'static str,
    allowed_command_patterns: Vec<&'static str>,
    denied_command_patterns: Vec<&'static str>,
    require_approval: bool,
}

/// Three starter templates an organization can clone into its own Policy
/// rather than authoring patterns from scratch.
pub async fn presets() -> Json<Vec<PolicyPreset>> {
    Json(vec![
        PolicyPreset {
            name: "read-only",
            description: "Inspection commands only; nothing that mutates state.",
            allowed_command_patterns: vec!["^(ls|cat|grep|tail|head|df|free|uptime|ps|systemctl status).*"],
            denied_command_patterns: vec![],
            require_approval: false,
        },
        PolicyPreset {
            name: "standard-ops",
            description: "Common operational commands, with service restarts gated by approval.",
            allowed_command_patterns: vec![
                "^(ls|cat|grep|tail|head|df|free|uptime|ps).*",
                "^systemctl (status|restart|reload) .*",
            ],
            denied_command_patterns: vec!["^rm -rf /.*", "^shutdown.*", "^reboot.*"],
            require_approval: true,
        },
        PolicyPreset {
            name: "deny-all",
            description: "No commands permitted; used to suspend a user or host.",
            allowed_command_patterns: vec![],
            denied_command_patterns: vec![".*"],
            require_approval: false,
        },
    ])
}

#[derive(Deserialize)]
pub struct TestCommandRequest {
    command: String,
}

#[derive(Serialize)]
pub struct PolicyTestResult {
    allowed: bool,
    requires_approval: bool,
    reason: Option<String>,
    matched_pattern: Option<String>,
}

pub async fn test(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Path(id): Path<Id>,
    Json(req): Json<TestCommandRequest>,
) -> AppResult<Json<PolicyTestResult>> {
    let decision = state
        .policy
        .test_command(current.organization_id, id, &req.command)
        .map_err(AppError::Internal)?;
    Ok(Json(match decision {
        PolicyDecision::Allow { requires_approval } => PolicyTestResult {
            allowed: true,
            requires_approval,
            reason: None,
            matched_pattern: None,
        },
        PolicyDecision::Deny { reason, matched_pattern } => PolicyTestResult {
            allowed: false,
            requires_approval: false,
            reason: Some(reason),
            matched_pattern,
        },
    }))
}

#[derive(Deserialize)]
pub struct AssignmentRequest {
    user_id: Id,
    host_id: Option<Id>,
}

pub async fn list_assignments(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Path(id): Path<Id>,
) -> AppResult<Json<Vec<PolicyAssignment>>> {
    Ok(Json(state.db.list_policy_assignments(current.organization_id, id).map_err(AppError::Internal)?))
}

pub async fn create_assignment(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Path(id): Path<Id>,
    Json(req): Json<AssignmentRequest>,
) -> AppResult<Json<PolicyAssignment>> {
    let assignment = state
        .db
        .create_policy_assignment(current.organization_id, id, req.user_id, req.host_id)
        .map_err(AppError::Internal)?;
    Ok(Json(assignment))
}

pub async fn delete_assignment(
    State(state): State<AppState>,
    current: AuthenticatedUser,
    Path((_policy_id, assignment_id)): Path<(Id, Id)>,
) -> AppResult<()> {
    state.db.delete_policy_assignment(current.organization_id, assignment_id).map_err(AppError::Internal)?;
    Ok(())
}
