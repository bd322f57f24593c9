// src/http/mod.rs
// HTTP API (§6): axum router assembly, shared application state, and the
// auth extractor every handler but register/login/webhook goes through.

mod access_tokens;
mod audit;
mod auth;
mod credentials;
mod host_notes;
mod hosts;
mod jobs;
mod mcp;
mod policies;
mod sessions;
mod ws;

use crate::audit::AuditLogger;
use crate::auth::{AuthConfig, AuthenticatedUser};
use crate::chat_task::ChatTaskManager;
use crate::crypto::CredentialCipher;
use crate::db::Db;
use crate::error::AppError;
use crate::executor::CommandExecutor;
use crate::hubs::{CommandHub, HubRegistry};
use crate::jobs::JobEngine;
use crate::llm::orchestrator::Orchestrator;
use crate::mcp::registry::McpRegistry;
use crate::mcp::stdio_cache::StdioCache;
use crate::policy::PolicyEngine;
use crate::ssh::SshPool;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub auth_config: AuthConfig,
    pub cipher: CredentialCipher,
    pub policy: Arc<PolicyEngine>,
    pub ssh: Arc<SshPool>,
    pub audit: AuditLogger,
    pub executor: CommandExecutor,
    pub orchestrator: Arc<Orchestrator>,
    pub mcp: Arc<McpRegistry>,
    pub mcp_stdio_cache: Arc<StdioCache>,
    pub chat_tasks: Arc<ChatTaskManager>,
    pub jobs: Arc<JobEngine>,
    pub hubs: HubRegistry,
    pub command_hub: CommandHub,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        crate::auth::authenticate_request(&state.db, &state.auth_config, parts)
    }
}

pub fn router(state: AppState, cors_allowed_origins: &[String]) -> Router {
    let cors = if cors_allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins = cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect::<Vec<_>>();
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    };

    Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me))
        .route("/api/hosts", get(hosts::list).post(hosts::create))
        .route("/api/hosts/:id", get(hosts::get).put(hosts::update).delete(hosts::remove))
        .route("/api/hosts/:id/test-connection", post(hosts::test_connection))
        .route("/api/hosts/:id/note", get(host_notes::get_note))
        .route("/api/hosts/:id/note/refresh", post(host_notes::refresh_note))
        .route("/api/credentials", get(credentials::list).post(credentials::create))
        .route("/api/credentials/:id", delete(credentials::remove))
        .route("/api/policies", get(policies::list).post(policies::create))
        .route("/api/policies/presets", get(policies::presets))
        .route("/api/policies/:id", put(policies::update).delete(policies::remove))
        .route("/api/policies/:id/test", post(policies::test))
        .route("/api/policies/:id/assignments", get(policies::list_assignments).post(policies::create_assignment))
        .route("/api/policies/:id/assignments/:aid", delete(policies::delete_assignment))
        .route("/api/jobs", get(jobs::list).post(jobs::create))
        .route("/api/jobs/:id", put(jobs::update).delete(jobs::remove))
        .route("/api/jobs/webhook/:job_id", post(jobs::webhook))
        .route("/api/mcp", get(mcp::list).post(mcp::create))
        .route("/api/mcp/:id", delete(mcp::remove))
        .route("/api/mcp/:id/test", post(mcp::test))
        .route("/api/sessions", get(sessions::list))
        .route("/api/sessions/:id/messages", post(sessions::post_message))
        .route("/api/audit", get(audit::search))
        .route("/api/access-tokens", get(access_tokens::list).post(access_tokens::create))
        .route("/api/access-tokens/:id", delete(access_tokens::remove))
        .route("/hubs/chat", get(ws::chat_hub))
        .route("/hubs/command", get(ws::command_hub))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
