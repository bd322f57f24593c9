// src/models.rs
// Entity types from §3. Repositories return these as flat DTOs; cross-entity
// references are IDs only, resolved by lookup at query time (§9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Id,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub organization_id: Id,
    pub email: String,
    pub display_name: String,
    pub role: OrgRole,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: Id,
    pub organization_id: Id,
    pub user_id: Id,
    pub label: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CredentialKind {
    Password,
    SshKey,
    ApiToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Id,
    pub organization_id: Id,
    pub name: String,
    pub kind: CredentialKind,
    #[serde(skip_serializing)]
    pub encrypted_value: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HostStatus {
    Healthy,
    Degraded,
    Unreachable,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: Id,
    pub organization_id: Id,
    pub hostname: String,
    pub port: u16,
    pub username: Option<String>,
    pub credential_id: Option<Id>,
    pub tags: Vec<String>,
    pub environment: String,
    pub status: HostStatus,
    pub allow_insecure_ssl: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Id,
    pub organization_id: Id,
    pub name: String,
    pub allowed_command_patterns: Vec<String>,
    pub denied_command_patterns: Vec<String>,
    pub require_approval: bool,
    pub max_concurrent_commands: u32,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAssignment {
    pub id: Id,
    pub organization_id: Id,
    pub policy_id: Id,
    pub user_id: Id,
    /// None = global assignment for this user.
    pub host_id: Option<Id>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Id,
    pub organization_id: Id,
    pub user_id: Id,
    pub host_ids: Vec<Id>,
    pub title: Option<String>,
    pub is_job_run_session: bool,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Id,
    pub session_id: Id,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls_json: Option<serde_json::Value>,
    pub tokens_used: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandExecution {
    pub id: Id,
    pub organization_id: Id,
    pub host_id: Id,
    pub user_id: Id,
    pub session_id: Option<Id>,
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
    pub was_dry_run: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuditEventType {
    CommandExecuted,
    CommandDenied,
    HostAdded,
    HostRemoved,
    PolicyChanged,
    SessionStarted,
    SessionEnded,
    CredentialAdded,
    CredentialRemoved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Id,
    pub organization_id: Id,
    pub event_type: AuditEventType,
    pub user_id: Option<Id>,
    pub host_id: Option<Id>,
    pub session_id: Option<Id>,
    pub was_allowed: Option<bool>,
    pub denial_reason: Option<String>,
    pub llm_reasoning: Option<String>,
    pub metadata_json: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostNote {
    pub organization_id: Id,
    pub host_id: Id,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSettings {
    pub organization_id: Id,
    pub user_id: Id,
    pub system_prompt: Option<String>,
    pub personalization_prompt: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Cron,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Id,
    pub organization_id: Id,
    pub name: String,
    pub trigger_type: TriggerType,
    pub cron_schedule: Option<String>,
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    pub prompt: Option<String>,
    pub auto_run_llm: bool,
    pub is_enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Cron,
    Webhook,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobRunStatus {
    Received,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Id,
    pub job_id: Id,
    pub organization_id: Id,
    pub triggered_by: TriggeredBy,
    pub status: JobRunStatus,
    pub payload: String,
    pub response: Option<String>,
    pub session_id: Option<Id>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum McpTransportType {
    Http,
    Stdio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServer {
    pub id: Id,
    pub organization_id: Id,
    pub name: String,
    pub transport_type: McpTransportType,
    pub is_enabled: bool,
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key_encrypted: Option<String>,
    pub command: Option<String>,
    pub arguments: Vec<String>,
    pub working_directory: Option<String>,
    pub environment_variables: std::collections::BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}
