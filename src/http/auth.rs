// src/http/auth.rs
// POST /api/auth/register|login (unauth), GET /api/auth/me (§6).

use super::AppState;
use crate::auth::{self, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::models::{OrgRole, User};
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct RegisterRequest {
    organization_name: String,
    email: String,
    display_name: String,
    password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    token: String,
    user: User,
}

/// Registering creates a brand new organization with the caller as its
/// first Owner; joining an existing organization happens via invitation
/// flows this crate doesn't expose (no such endpoint in §6).
pub async fn register(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> AppResult<Json<AuthResponse>> {
    if state.db.get_user_by_email(&req.email).map_err(AppError::Internal)?.is_some() {
        return Err(AppError::InvalidArgument("email already registered".to_string()));
    }

    let organization = state.db.create_organization(&req.organization_name).map_err(AppError::Internal)?;
    let password_hash = auth::hash_password(&req.password)?;
    let user = state
        .db
        .create_user(organization.id, &req.email, &req.display_name, OrgRole::Owner, &password_hash)
        .map_err(AppError::Internal)?;

    let token = auth::issue_jwt(&state.auth_config, &user)?;
    Ok(Json(AuthResponse { token, user }))
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> AppResult<Json<AuthResponse>> {
    let user = state
        .db
        .get_user_by_email(&req.email)
        .map_err(AppError::Internal)?
        .ok_or(AppError::Unauthenticated)?;

    if !auth::verify_password(&req.password, &user.password_hash) {
        return Err(AppError::Unauthenticated);
    }

    let token = auth::issue_jwt(&state.auth_config, &user)?;
    Ok(Json(AuthResponse { token, user }))
}

pub async fn me(State(state): State<AppState>, current: AuthenticatedUser) -> AppResult<Json<User>> {
    let user = state
        .db
        .get_user(current.organization_id, current.user_id)
        .map_err(AppError::Internal)?
        .ok_or(AppError::NotFound)?;
    Ok(Json(user))
}
