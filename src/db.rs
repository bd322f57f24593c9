// src/db.rs
// Persistence layer. Every repository method here is organization-scoped
// (§3 invariant: "every cross-entity read is scoped by organizationId").
// Schema migrations are deliberately out of scope (§1); this module owns one
// idempotent CREATE TABLE IF NOT EXISTS script, applied by `migrate`.

use crate::models::*;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const SCHEMA: &str = include_str!("schema.sql");

#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

fn parse_uuid(s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn json_vec(value: &[String]) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

fn parse_json_vec(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn json_map(value: &std::collections::BTreeMap<String, String>) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

fn parse_json_map(s: &str) -> std::collections::BTreeMap<String, String> {
    serde_json::from_str(s).unwrap_or_default()
}

impl Db {
    pub fn open(url: &str) -> Result<Self> {
        // `sqlite://path` and bare paths are both accepted; `:memory:` is
        // passed straight through for tests.
        let path = url.strip_prefix("sqlite://").unwrap_or(url);
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ---- organizations ----

    pub fn create_organization(&self, name: &str) -> Result<Organization> {
        let org = Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO organizations (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![org.id.to_string(), org.name, org.created_at.to_rfc3339()],
        )?;
        Ok(org)
    }

    // ---- users ----

    pub fn create_user(
        &self,
        organization_id: Id,
        email: &str,
        display_name: &str,
        role: OrgRole,
        password_hash: &str,
    ) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            organization_id,
            email: email.to_string(),
            display_name: display_name.to_string(),
            role,
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO users (id, organization_id, email, display_name, role, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id.to_string(),
                user.organization_id.to_string(),
                user.email,
                user.display_name,
                role_to_str(user.role),
                user.password_hash,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, organization_id, email, display_name, role, password_hash, created_at
             FROM users WHERE email = ?1",
        )?;
        let user = stmt
            .query_row(params![email], row_to_user)
            .optional()?;
        Ok(user)
    }

    pub fn get_user(&self, organization_id: Id, user_id: Id) -> Result<Option<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, organization_id, email, display_name, role, password_hash, created_at
             FROM users WHERE id = ?1 AND organization_id = ?2",
        )?;
        let user = stmt
            .query_row(params![user_id.to_string(), organization_id.to_string()], row_to_user)
            .optional()?;
        Ok(user)
    }

    /// Earliest-created Owner in the organization, used to attribute job-run
    /// sessions that have no human operator (§4.8).
    pub fn find_any_owner(&self, organization_id: Id) -> Result<Option<Id>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id FROM users WHERE organization_id = ?1 AND role = 'Owner' ORDER BY created_at ASC LIMIT 1",
        )?;
        let id = stmt
            .query_row(params![organization_id.to_string()], |row| {
                let s: String = row.get(0)?;
                Ok(s)
            })
            .optional()?;
        Ok(id.map(|s| parse_uuid(&s)).transpose()?)
    }

    /// Cross-org lookup for CLI operator tooling, where the caller knows a
    /// bare user id and not its organization (`infrallmd policy check`,
    /// `infrallmd token create`).
    pub fn get_user_by_id(&self, user_id: Id) -> Result<Option<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, organization_id, email, display_name, role, password_hash, created_at
             FROM users WHERE id = ?1",
        )?;
        let user = stmt.query_row(params![user_id.to_string()], row_to_user).optional()?;
        Ok(user)
    }

    // ---- access tokens ----

    pub fn create_access_token(
        &self,
        organization_id: Id,
        user_id: Id,
        label: &str,
        token_hash: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<AccessToken> {
        let token = AccessToken {
            id: Uuid::new_v4(),
            organization_id,
            user_id,
            label: label.to_string(),
            token_hash: token_hash.to_string(),
            expires_at,
            is_active: true,
            last_used_at: None,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO access_tokens (id, organization_id, user_id, label, token_hash, expires_at, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
            params![
                token.id.to_string(),
                token.organization_id.to_string(),
                token.user_id.to_string(),
                token.label,
                token.token_hash,
                token.expires_at.map(|d| d.to_rfc3339()),
                token.created_at.to_rfc3339(),
            ],
        )?;
        Ok(token)
    }

    pub fn get_access_token_by_hash(&self, token_hash: &str) -> Result<Option<AccessToken>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, organization_id, user_id, label, token_hash, expires_at, is_active, last_used_at, created_at
             FROM access_tokens WHERE token_hash = ?1 AND is_active = 1",
        )?;
        let token = stmt.query_row(params![token_hash], row_to_access_token).optional()?;
        Ok(token)
    }

    pub fn touch_access_token_last_used(&self, token_id: Id) -> Result<()> {
        self.conn().execute(
            "UPDATE access_tokens SET last_used_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), token_id.to_string()],
        )?;
        Ok(())
    }

    pub fn list_access_tokens(&self, organization_id: Id, user_id: Id) -> Result<Vec<AccessToken>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, organization_id, user_id, label, token_hash, expires_at, is_active, last_used_at, created_at
             FROM access_tokens WHERE organization_id = ?1 AND user_id = ?2 ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![organization_id.to_string(), user_id.to_string()], row_to_access_token)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn revoke_access_token(&self, organization_id: Id, token_id: Id) -> Result<()> {
        self.conn().execute(
            "UPDATE access_tokens SET is_active = 0 WHERE id = ?1 AND organization_id = ?2",
            params![token_id.to_string(), organization_id.to_string()],
        )?;
        Ok(())
    }

    // ---- credentials ----

    pub fn create_credential(
        &self,
        organization_id: Id,
        name: &str,
        kind: CredentialKind,
        encrypted_value: &str,
    ) -> Result<Credential> {
        let cred = Credential {
            id: Uuid::new_v4(),
            organization_id,
            name: name.to_string(),
            kind,
            encrypted_value: encrypted_value.to_string(),
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO credentials (id, organization_id, name, kind, encrypted_value, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                cred.id.to_string(),
                cred.organization_id.to_string(),
                cred.name,
                credential_kind_to_str(cred.kind),
                cred.encrypted_value,
                cred.created_at.to_rfc3339(),
            ],
        )?;
        Ok(cred)
    }

    pub fn get_credential(&self, organization_id: Id, id: Id) -> Result<Option<Credential>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, organization_id, name, kind, encrypted_value, created_at
             FROM credentials WHERE id = ?1 AND organization_id = ?2",
        )?;
        let row = stmt
            .query_row(params![id.to_string(), organization_id.to_string()], row_to_credential)
            .optional()?;
        Ok(row)
    }

    pub fn list_credentials(&self, organization_id: Id) -> Result<Vec<Credential>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, organization_id, name, kind, encrypted_value, created_at
             FROM credentials WHERE organization_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![organization_id.to_string()], row_to_credential)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_credential(&self, organization_id: Id, id: Id) -> Result<()> {
        self.conn().execute(
            "DELETE FROM credentials WHERE id = ?1 AND organization_id = ?2",
            params![id.to_string(), organization_id.to_string()],
        )?;
        Ok(())
    }

    // ---- hosts ----

    #[allow(clippy::too_many_arguments)]
    pub fn create_host(
        &self,
        organization_id: Id,
        hostname: &str,
        port: u16,
        username: Option<&str>,
        credential_id: Option<Id>,
        tags: Vec<String>,
        environment: &str,
        allow_insecure_ssl: bool,
    ) -> Result<Host> {
        let host = Host {
            id: Uuid::new_v4(),
            organization_id,
            hostname: hostname.to_string(),
            port,
            username: username.map(|s| s.to_string()),
            credential_id,
            tags,
            environment: environment.to_string(),
            status: HostStatus::Unknown,
            allow_insecure_ssl,
            last_health_check: None,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO hosts (id, organization_id, hostname, port, username, credential_id, tags, environment, status, allow_insecure_ssl, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                host.id.to_string(),
                host.organization_id.to_string(),
                host.hostname,
                host.port,
                host.username,
                host.credential_id.map(|i| i.to_string()),
                json_vec(&host.tags),
                host.environment,
                host_status_to_str(host.status),
                host.allow_insecure_ssl,
                host.created_at.to_rfc3339(),
            ],
        )?;
        Ok(host)
    }

    pub fn get_host(&self, organization_id: Id, id: Id) -> Result<Option<Host>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1 AND organization_id = ?2", HOST_SELECT))?;
        let row = stmt
            .query_row(params![id.to_string(), organization_id.to_string()], row_to_host)
            .optional()?;
        Ok(row)
    }

    pub fn list_hosts(&self, organization_id: Id) -> Result<Vec<Host>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE organization_id = ?1 ORDER BY created_at DESC", HOST_SELECT))?;
        let rows = stmt
            .query_map(params![organization_id.to_string()], row_to_host)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every host across every organization, for the background health-check
    /// loop, which has no tenant context of its own.
    pub fn list_all_hosts(&self) -> Result<Vec<Host>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(HOST_SELECT)?;
        let rows = stmt.query_map([], row_to_host)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn update_host_status(&self, host_id: Id, status: HostStatus) -> Result<()> {
        self.conn().execute(
            "UPDATE hosts SET status = ?1, last_health_check = ?2 WHERE id = ?3",
            params![host_status_to_str(status), Utc::now().to_rfc3339(), host_id.to_string()],
        )?;
        Ok(())
    }

    pub fn delete_host(&self, organization_id: Id, id: Id) -> Result<()> {
        self.conn().execute(
            "DELETE FROM hosts WHERE id = ?1 AND organization_id = ?2",
            params![id.to_string(), organization_id.to_string()],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_host(
        &self,
        organization_id: Id,
        id: Id,
        hostname: &str,
        port: u16,
        username: Option<&str>,
        credential_id: Option<Id>,
        tags: Vec<String>,
        environment: &str,
        allow_insecure_ssl: bool,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE hosts SET hostname = ?1, port = ?2, username = ?3, credential_id = ?4, tags = ?5, environment = ?6, allow_insecure_ssl = ?7
             WHERE id = ?8 AND organization_id = ?9",
            params![
                hostname,
                port,
                username,
                credential_id.map(|i| i.to_string()),
                json_vec(&tags),
                environment,
                allow_insecure_ssl,
                id.to_string(),
                organization_id.to_string(),
            ],
        )?;
        Ok(())
    }

    // ---- policies ----

    pub fn create_policy(
        &self,
        organization_id: Id,
        name: &str,
        allowed: Vec<String>,
        denied: Vec<String>,
        require_approval: bool,
        max_concurrent_commands: u32,
    ) -> Result<Policy> {
        let policy = Policy {
            id: Uuid::new_v4(),
            organization_id,
            name: name.to_string(),
            allowed_command_patterns: allowed,
            denied_command_patterns: denied,
            require_approval,
            max_concurrent_commands,
            is_enabled: true,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO policies (id, organization_id, name, allowed_patterns, denied_patterns, require_approval, max_concurrent_commands, is_enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
            params![
                policy.id.to_string(),
                policy.organization_id.to_string(),
                policy.name,
                json_vec(&policy.allowed_command_patterns),
                json_vec(&policy.denied_command_patterns),
                policy.require_approval,
                policy.max_concurrent_commands,
                policy.created_at.to_rfc3339(),
            ],
        )?;
        Ok(policy)
    }

    pub fn get_policy(&self, organization_id: Id, id: Id) -> Result<Option<Policy>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1 AND organization_id = ?2", POLICY_SELECT))?;
        let row = stmt
            .query_row(params![id.to_string(), organization_id.to_string()], row_to_policy)
            .optional()?;
        Ok(row)
    }

    pub fn list_policies(&self, organization_id: Id) -> Result<Vec<Policy>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE organization_id = ?1", POLICY_SELECT))?;
        let rows = stmt
            .query_map(params![organization_id.to_string()], row_to_policy)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_policy(&self, organization_id: Id, id: Id) -> Result<()> {
        self.conn().execute(
            "DELETE FROM policies WHERE id = ?1 AND organization_id = ?2",
            params![id.to_string(), organization_id.to_string()],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_policy(
        &self,
        organization_id: Id,
        id: Id,
        name: &str,
        allowed: Vec<String>,
        denied: Vec<String>,
        require_approval: bool,
        max_concurrent_commands: u32,
        is_enabled: bool,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE policies SET name = ?1, allowed_patterns = ?2, denied_patterns = ?3, require_approval = ?4, max_concurrent_commands = ?5, is_enabled = ?6
             WHERE id = ?7 AND organization_id = ?8",
            params![
                name,
                json_vec(&allowed),
                json_vec(&denied),
                require_approval,
                max_concurrent_commands,
                is_enabled,
                id.to_string(),
                organization_id.to_string(),
            ],
        )?;
        Ok(())
    }

    // ---- policy assignments ----

    pub fn create_policy_assignment(
        &self,
        organization_id: Id,
        policy_id: Id,
        user_id: Id,
        host_id: Option<Id>,
    ) -> Result<PolicyAssignment> {
        let assignment = PolicyAssignment {
            id: Uuid::new_v4(),
            organization_id,
            policy_id,
            user_id,
            host_id,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO policy_assignments (id, organization_id, policy_id, user_id, host_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                assignment.id.to_string(),
                assignment.organization_id.to_string(),
                assignment.policy_id.to_string(),
                assignment.user_id.to_string(),
                assignment.host_id.map(|i| i.to_string()),
                assignment.created_at.to_rfc3339(),
            ],
        )?;
        Ok(assignment)
    }

    pub fn list_policy_assignments(&self, organization_id: Id, policy_id: Id) -> Result<Vec<PolicyAssignment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, organization_id, policy_id, user_id, host_id, created_at
             FROM policy_assignments WHERE organization_id = ?1 AND policy_id = ?2 ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![organization_id.to_string(), policy_id.to_string()], row_to_policy_assignment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_policy_assignment(&self, organization_id: Id, id: Id) -> Result<()> {
        self.conn().execute(
            "DELETE FROM policy_assignments WHERE id = ?1 AND organization_id = ?2",
            params![id.to_string(), organization_id.to_string()],
        )?;
        Ok(())
    }

    /// Policy rows applicable to (user, host): host-scoped OR global (§4.3 step 1).
    pub fn policies_applicable_to(&self, organization_id: Id, user_id: Id, host_id: Id) -> Result<Vec<Policy>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.id, p.organization_id, p.name, p.allowed_patterns, p.denied_patterns,
                    p.require_approval, p.max_concurrent_commands, p.is_enabled, p.created_at
             FROM policies p
             JOIN policy_assignments a ON a.policy_id = p.id
             WHERE a.organization_id = ?1 AND a.user_id = ?2
               AND (a.host_id IS NULL OR a.host_id = ?3)
               AND p.is_enabled = 1",
        )?;
        let rows = stmt
            .query_map(
                params![organization_id.to_string(), user_id.to_string(), host_id.to_string()],
                row_to_policy,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ---- sessions ----

    pub fn create_session(&self, organization_id: Id, user_id: Id, host_ids: Vec<Id>, is_job_run_session: bool) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4(),
            organization_id,
            user_id,
            host_ids,
            title: None,
            is_job_run_session,
            total_tokens: 0,
            total_cost: 0.0,
            last_message_at: None,
            created_at: Utc::now(),
        };
        let host_ids_json = json_vec(&session.host_ids.iter().map(|i| i.to_string()).collect::<Vec<_>>());
        self.conn().execute(
            "INSERT INTO sessions (id, organization_id, user_id, host_ids, is_job_run_session, total_tokens, total_cost, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 0.0, ?6)",
            params![
                session.id.to_string(),
                session.organization_id.to_string(),
                session.user_id.to_string(),
                host_ids_json,
                session.is_job_run_session,
                session.created_at.to_rfc3339(),
            ],
        )?;
        Ok(session)
    }

    pub fn get_session(&self, organization_id: Id, id: Id) -> Result<Option<Session>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1 AND organization_id = ?2", SESSION_SELECT))?;
        let row = stmt
            .query_row(params![id.to_string(), organization_id.to_string()], row_to_session)
            .optional()?;
        Ok(row)
    }

    pub fn list_sessions_for_user(&self, organization_id: Id, user_id: Id) -> Result<Vec<Session>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE organization_id = ?1 AND user_id = ?2 ORDER BY created_at DESC",
            SESSION_SELECT
        ))?;
        let rows = stmt
            .query_map(params![organization_id.to_string(), user_id.to_string()], row_to_session)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn touch_session_message(&self, session_id: Id, tokens_delta: i64, cost_delta: f64) -> Result<()> {
        self.conn().execute(
            "UPDATE sessions SET last_message_at = ?1, total_tokens = total_tokens + ?2, total_cost = total_cost + ?3
             WHERE id = ?4",
            params![Utc::now().to_rfc3339(), tokens_delta, cost_delta, session_id.to_string()],
        )?;
        Ok(())
    }

    pub fn set_session_title(&self, session_id: Id, title: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE sessions SET title = ?1 WHERE id = ?2",
            params![title, session_id.to_string()],
        )?;
        Ok(())
    }

    pub fn delete_session(&self, organization_id: Id, id: Id) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![id.to_string()],
        )?;
        conn.execute(
            "DELETE FROM sessions WHERE id = ?1 AND organization_id = ?2",
            params![id.to_string(), organization_id.to_string()],
        )?;
        Ok(())
    }

    // ---- messages ----

    pub fn create_message(
        &self,
        session_id: Id,
        role: MessageRole,
        content: &str,
        tool_calls_json: Option<serde_json::Value>,
        tokens_used: i64,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            session_id,
            role,
            content: content.to_string(),
            tool_calls_json,
            tokens_used,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO messages (id, session_id, role, content, tool_calls_json, tokens_used, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.session_id.to_string(),
                message_role_to_str(message.role),
                message.content,
                message.tool_calls_json.as_ref().map(|v| v.to_string()),
                message.tokens_used,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(message)
    }

    pub fn list_messages_for_session(&self, session_id: Id) -> Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, tool_calls_json, tokens_used, created_at
             FROM messages WHERE session_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id.to_string()], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ---- command executions ----

    #[allow(clippy::too_many_arguments)]
    pub fn create_command_execution(
        &self,
        organization_id: Id,
        host_id: Id,
        user_id: Id,
        session_id: Option<Id>,
        command: &str,
        exit_code: Option<i32>,
        stdout: &str,
        stderr: &str,
        duration_ms: i64,
        was_dry_run: bool,
    ) -> Result<CommandExecution> {
        let exec = CommandExecution {
            id: Uuid::new_v4(),
            organization_id,
            host_id,
            user_id,
            session_id,
            command: command.to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms,
            was_dry_run,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO command_executions (id, organization_id, host_id, user_id, session_id, command, exit_code, stdout, stderr, duration_ms, was_dry_run, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                exec.id.to_string(),
                exec.organization_id.to_string(),
                exec.host_id.to_string(),
                exec.user_id.to_string(),
                exec.session_id.map(|i| i.to_string()),
                exec.command,
                exec.exit_code,
                exec.stdout,
                exec.stderr,
                exec.duration_ms,
                exec.was_dry_run,
                exec.created_at.to_rfc3339(),
            ],
        )?;
        Ok(exec)
    }

    // ---- audit logs (append-only, never updated or deleted) ----

    #[allow(clippy::too_many_arguments)]
    pub fn create_audit_log(
        &self,
        organization_id: Id,
        event_type: AuditEventType,
        user_id: Option<Id>,
        host_id: Option<Id>,
        session_id: Option<Id>,
        was_allowed: Option<bool>,
        denial_reason: Option<&str>,
        llm_reasoning: Option<&str>,
        metadata_json: Option<serde_json::Value>,
    ) -> Result<AuditLog> {
        let log = AuditLog {
            id: Uuid::new_v4(),
            organization_id,
            event_type,
            user_id,
            host_id,
            session_id,
            was_allowed,
            denial_reason: denial_reason.map(|s| s.to_string()),
            llm_reasoning: llm_reasoning.map(|s| s.to_string()),
            metadata_json,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO audit_logs (id, organization_id, event_type, user_id, host_id, session_id, was_allowed, denial_reason, llm_reasoning, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                log.id.to_string(),
                log.organization_id.to_string(),
                audit_event_type_to_str(log.event_type),
                log.user_id.map(|i| i.to_string()),
                log.host_id.map(|i| i.to_string()),
                log.session_id.map(|i| i.to_string()),
                log.was_allowed,
                log.denial_reason,
                log.llm_reasoning,
                log.metadata_json.as_ref().map(|v| v.to_string()),
                log.created_at.to_rfc3339(),
            ],
        )?;
        Ok(log)
    }

    /// Cursor-paginated audit search (§B): `cursor` is the `created_at` of the
    /// last row from a previous page, so the next page picks up strictly
    /// before it. `since`/`until` bound the window independently of paging.
    #[allow(clippy::too_many_arguments)]
    pub fn search_audit_logs(
        &self,
        organization_id: Id,
        event_type: Option<AuditEventType>,
        host_id: Option<Id>,
        user_id: Option<Id>,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        cursor: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<AuditLog>> {
        let conn = self.conn();
        let mut sql = AUDIT_SELECT.to_string();
        sql.push_str(" WHERE organization_id = ?1");
        if event_type.is_some() {
            sql.push_str(" AND event_type = ?2");
        }
        if host_id.is_some() {
            sql.push_str(" AND host_id = ?3");
        }
        if user_id.is_some() {
            sql.push_str(" AND user_id = ?4");
        }
        if since.is_some() {
            sql.push_str(" AND created_at >= ?5");
        }
        if until.is_some() {
            sql.push_str(" AND created_at <= ?6");
        }
        if cursor.is_some() {
            sql.push_str(" AND created_at < ?7");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?8");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    organization_id.to_string(),
                    event_type.map(audit_event_type_to_str),
                    host_id.map(|i| i.to_string()),
                    user_id.map(|i| i.to_string()),
                    since.map(|d| d.to_rfc3339()),
                    until.map(|d| d.to_rfc3339()),
                    cursor.map(|d| d.to_rfc3339()),
                    limit,
                ],
                row_to_audit_log,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ---- host notes ----

    pub fn upsert_host_note(&self, organization_id: Id, host_id: Id, content: &str) -> Result<HostNote> {
        let note = HostNote {
            organization_id,
            host_id,
            content: content.to_string(),
            updated_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO host_notes (organization_id, host_id, content, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(organization_id, host_id) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
            params![
                note.organization_id.to_string(),
                note.host_id.to_string(),
                note.content,
                note.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(note)
    }

    pub fn get_host_note(&self, organization_id: Id, host_id: Id) -> Result<Option<HostNote>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT organization_id, host_id, content, updated_at FROM host_notes
             WHERE organization_id = ?1 AND host_id = ?2",
        )?;
        let row = stmt
            .query_row(params![organization_id.to_string(), host_id.to_string()], |row| {
                Ok(HostNote {
                    organization_id: parse_uuid(&row.get::<_, String>(0)?)?,
                    host_id: parse_uuid(&row.get::<_, String>(1)?)?,
                    content: row.get(2)?,
                    updated_at: parse_ts(&row.get::<_, String>(3)?)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    // ---- prompt settings ----

    pub fn upsert_prompt_settings(
        &self,
        organization_id: Id,
        user_id: Id,
        system_prompt: Option<&str>,
        personalization_prompt: Option<&str>,
        default_model: Option<&str>,
    ) -> Result<PromptSettings> {
        let settings = PromptSettings {
            organization_id,
            user_id,
            system_prompt: system_prompt.map(|s| s.to_string()),
            personalization_prompt: personalization_prompt.map(|s| s.to_string()),
            default_model: default_model.map(|s| s.to_string()),
        };
        self.conn().execute(
            "INSERT INTO prompt_settings (organization_id, user_id, system_prompt, personalization_prompt, default_model)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(organization_id, user_id) DO UPDATE SET
                system_prompt = excluded.system_prompt,
                personalization_prompt = excluded.personalization_prompt,
                default_model = excluded.default_model",
            params![
                settings.organization_id.to_string(),
                settings.user_id.to_string(),
                settings.system_prompt,
                settings.personalization_prompt,
                settings.default_model,
            ],
        )?;
        Ok(settings)
    }

    pub fn get_prompt_settings(&self, organization_id: Id, user_id: Id) -> Result<Option<PromptSettings>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT organization_id, user_id, system_prompt, personalization_prompt, default_model
             FROM prompt_settings WHERE organization_id = ?1 AND user_id = ?2",
        )?;
        let row = stmt
            .query_row(params![organization_id.to_string(), user_id.to_string()], |row| {
                Ok(PromptSettings {
                    organization_id: parse_uuid(&row.get::<_, String>(0)?)?,
                    user_id: parse_uuid(&row.get::<_, String>(1)?)?,
                    system_prompt: row.get(2)?,
                    personalization_prompt: row.get(3)?,
                    default_model: row.get(4)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    // ---- jobs ----

    #[allow(clippy::too_many_arguments)]
    pub fn create_job(
        &self,
        organization_id: Id,
        name: &str,
        trigger_type: TriggerType,
        cron_schedule: Option<&str>,
        webhook_secret: Option<&str>,
        prompt: Option<&str>,
        auto_run_llm: bool,
    ) -> Result<Job> {
        let job = Job {
            id: Uuid::new_v4(),
            organization_id,
            name: name.to_string(),
            trigger_type,
            cron_schedule: cron_schedule.map(|s| s.to_string()),
            webhook_secret: webhook_secret.map(|s| s.to_string()),
            prompt: prompt.map(|s| s.to_string()),
            auto_run_llm,
            is_enabled: true,
            last_run_at: None,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO jobs (id, organization_id, name, trigger_type, cron_schedule, webhook_secret, prompt, auto_run_llm, is_enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)",
            params![
                job.id.to_string(),
                job.organization_id.to_string(),
                job.name,
                trigger_type_to_str(job.trigger_type),
                job.cron_schedule,
                job.webhook_secret,
                job.prompt,
                job.auto_run_llm,
                job.created_at.to_rfc3339(),
            ],
        )?;
        Ok(job)
    }

    pub fn get_job(&self, organization_id: Id, id: Id) -> Result<Option<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1 AND organization_id = ?2", JOB_SELECT))?;
        let row = stmt
            .query_row(params![id.to_string(), organization_id.to_string()], row_to_job)
            .optional()?;
        Ok(row)
    }

    /// Job lookup by id alone, used by the unauthenticated webhook endpoint
    /// (the secret check, not org membership, is what authorizes the call).
    pub fn get_job_any_org(&self, id: Id) -> Result<Option<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", JOB_SELECT))?;
        let row = stmt.query_row(params![id.to_string()], row_to_job).optional()?;
        Ok(row)
    }

    pub fn list_jobs(&self, organization_id: Id) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE organization_id = ?1", JOB_SELECT))?;
        let rows = stmt
            .query_map(params![organization_id.to_string()], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_enabled_cron_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE is_enabled = 1 AND trigger_type = 'cron'",
            JOB_SELECT
        ))?;
        let rows = stmt.query_map([], row_to_job)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Updates `last_run_at` BEFORE work starts, acting as the dedup lock (§4.8).
    pub fn mark_job_run_start(&self, job_id: Id, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE jobs SET last_run_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), job_id.to_string()],
        )?;
        Ok(())
    }

    pub fn delete_job(&self, organization_id: Id, id: Id) -> Result<()> {
        self.conn().execute(
            "DELETE FROM jobs WHERE id = ?1 AND organization_id = ?2",
            params![id.to_string(), organization_id.to_string()],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_job(
        &self,
        organization_id: Id,
        id: Id,
        name: &str,
        trigger_type: TriggerType,
        cron_schedule: Option<&str>,
        webhook_secret: Option<&str>,
        prompt: Option<&str>,
        auto_run_llm: bool,
        is_enabled: bool,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE jobs SET name = ?1, trigger_type = ?2, cron_schedule = ?3, webhook_secret = ?4, prompt = ?5, auto_run_llm = ?6, is_enabled = ?7
             WHERE id = ?8 AND organization_id = ?9",
            params![
                name,
                trigger_type_to_str(trigger_type),
                cron_schedule,
                webhook_secret,
                prompt,
                auto_run_llm,
                is_enabled,
                id.to_string(),
                organization_id.to_string(),
            ],
        )?;
        Ok(())
    }

    // ---- job runs ----

    pub fn create_job_run(
        &self,
        job_id: Id,
        organization_id: Id,
        triggered_by: TriggeredBy,
        payload: &str,
    ) -> Result<JobRun> {
        let run = JobRun {
            id: Uuid::new_v4(),
            job_id,
            organization_id,
            triggered_by,
            status: JobRunStatus::Received,
            payload: payload.to_string(),
            response: None,
            session_id: None,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO job_runs (id, job_id, organization_id, triggered_by, status, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, 'received', ?5, ?6)",
            params![
                run.id.to_string(),
                run.job_id.to_string(),
                run.organization_id.to_string(),
                triggered_by_to_str(run.triggered_by),
                run.payload,
                run.created_at.to_rfc3339(),
            ],
        )?;
        Ok(run)
    }

    pub fn update_job_run(&self, id: Id, status: JobRunStatus, response: Option<&str>, session_id: Option<Id>) -> Result<()> {
        self.conn().execute(
            "UPDATE job_runs SET status = ?1, response = ?2, session_id = ?3 WHERE id = ?4",
            params![
                job_run_status_to_str(status),
                response,
                session_id.map(|i| i.to_string()),
                id.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn get_job_run(&self, organization_id: Id, id: Id) -> Result<Option<JobRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{JOB_RUN_SELECT} WHERE id = ?1 AND organization_id = ?2"))?;
        let run = stmt.query_row(params![id.to_string(), organization_id.to_string()], row_to_job_run).optional()?;
        Ok(run)
    }

    pub fn list_job_runs(&self, organization_id: Id, job_id: Id) -> Result<Vec<JobRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{JOB_RUN_SELECT} WHERE job_id = ?1 AND organization_id = ?2 ORDER BY created_at DESC"))?;
        let rows = stmt.query_map(params![job_id.to_string(), organization_id.to_string()], row_to_job_run)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ---- mcp servers ----

    #[allow(clippy::too_many_arguments)]
    pub fn create_mcp_server(
        &self,
        organization_id: Id,
        name: &str,
        transport_type: McpTransportType,
        base_url: Option<&str>,
        api_key_encrypted: Option<&str>,
        command: Option<&str>,
        arguments: Vec<String>,
        working_directory: Option<&str>,
        environment_variables: std::collections::BTreeMap<String, String>,
    ) -> Result<McpServer> {
        let server = McpServer {
            id: Uuid::new_v4(),
            organization_id,
            name: name.to_string(),
            transport_type,
            is_enabled: true,
            base_url: base_url.map(|s| s.to_string()),
            api_key_encrypted: api_key_encrypted.map(|s| s.to_string()),
            command: command.map(|s| s.to_string()),
            arguments,
            working_directory: working_directory.map(|s| s.to_string()),
            environment_variables,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO mcp_servers (id, organization_id, name, transport_type, is_enabled, base_url, api_key_encrypted, command, arguments, working_directory, environment_variables, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                server.id.to_string(),
                server.organization_id.to_string(),
                server.name,
                mcp_transport_to_str(server.transport_type),
                server.base_url,
                server.api_key_encrypted,
                server.command,
                json_vec(&server.arguments),
                server.working_directory,
                json_map(&server.environment_variables),
                server.created_at.to_rfc3339(),
            ],
        )?;
        Ok(server)
    }

    pub fn list_enabled_mcp_servers(&self, organization_id: Id) -> Result<Vec<McpServer>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE organization_id = ?1 AND is_enabled = 1",
            MCP_SERVER_SELECT
        ))?;
        let rows = stmt
            .query_map(params![organization_id.to_string()], row_to_mcp_server)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All servers regardless of `is_enabled`, for the management CRUD listing.
    pub fn list_mcp_servers(&self, organization_id: Id) -> Result<Vec<McpServer>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE organization_id = ?1 ORDER BY created_at DESC", MCP_SERVER_SELECT))?;
        let rows = stmt
            .query_map(params![organization_id.to_string()], row_to_mcp_server)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_all_organizations_with_enabled_stdio_servers(&self) -> Result<Vec<Id>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT organization_id FROM mcp_servers WHERE is_enabled = 1 AND transport_type = 'Stdio'",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let s: String = row.get(0)?;
                Ok(parse_uuid(&s)?)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_mcp_server(&self, organization_id: Id, id: Id) -> Result<Option<McpServer>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1 AND organization_id = ?2", MCP_SERVER_SELECT))?;
        let row = stmt
            .query_row(params![id.to_string(), organization_id.to_string()], row_to_mcp_server)
            .optional()?;
        Ok(row)
    }

    pub fn delete_mcp_server(&self, organization_id: Id, id: Id) -> Result<()> {
        self.conn().execute(
            "DELETE FROM mcp_servers WHERE id = ?1 AND organization_id = ?2",
            params![id.to_string(), organization_id.to_string()],
        )?;
        Ok(())
    }
}

// ---- enum <-> TEXT mapping ----

fn role_to_str(r: OrgRole) -> &'static str {
    match r {
        OrgRole::Owner => "Owner",
        OrgRole::Admin => "Admin",
        OrgRole::Member => "Member",
    }
}

fn parse_role(s: &str) -> OrgRole {
    match s {
        "Owner" => OrgRole::Owner,
        "Admin" => OrgRole::Admin,
        _ => OrgRole::Member,
    }
}

fn credential_kind_to_str(k: CredentialKind) -> &'static str {
    match k {
        CredentialKind::Password => "Password",
        CredentialKind::SshKey => "SSHKey",
        CredentialKind::ApiToken => "APIToken",
    }
}

fn parse_credential_kind(s: &str) -> CredentialKind {
    match s {
        "SSHKey" => CredentialKind::SshKey,
        "APIToken" => CredentialKind::ApiToken,
        _ => CredentialKind::Password,
    }
}

fn host_status_to_str(s: HostStatus) -> &'static str {
    match s {
        HostStatus::Healthy => "Healthy",
        HostStatus::Degraded => "Degraded",
        HostStatus::Unreachable => "Unreachable",
        HostStatus::Unknown => "Unknown",
    }
}

fn parse_host_status(s: &str) -> HostStatus {
    match s {
        "Healthy" => HostStatus::Healthy,
        "Degraded" => HostStatus::Degraded,
        "Unreachable" => HostStatus::Unreachable,
        _ => HostStatus::Unknown,
    }
}

fn message_role_to_str(r: MessageRole) -> &'static str {
    match r {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn parse_message_role(s: &str) -> MessageRole {
    match s {
        "assistant" => MessageRole::Assistant,
        _ => MessageRole::User,
    }
}

fn audit_event_type_to_str(e: AuditEventType) -> &'static str {
    match e {
        AuditEventType::CommandExecuted => "CommandExecuted",
        AuditEventType::CommandDenied => "CommandDenied",
        AuditEventType::HostAdded => "HostAdded",
        AuditEventType::HostRemoved => "HostRemoved",
        AuditEventType::PolicyChanged => "PolicyChanged",
        AuditEventType::SessionStarted => "SessionStarted",
        AuditEventType::SessionEnded => "SessionEnded",
        AuditEventType::CredentialAdded => "CredentialAdded",
        AuditEventType::CredentialRemoved => "CredentialRemoved",
    }
}

fn parse_audit_event_type(s: &str) -> AuditEventType {
    match s {
        "CommandDenied" => AuditEventType::CommandDenied,
        "HostAdded" => AuditEventType::HostAdded,
        "HostRemoved" => AuditEventType::HostRemoved,
        "PolicyChanged" => AuditEventType::PolicyChanged,
        "SessionStarted" => AuditEventType::SessionStarted,
        "SessionEnded" => AuditEventType::SessionEnded,
        "CredentialAdded" => AuditEventType::CredentialAdded,
        "CredentialRemoved" => AuditEventType::CredentialRemoved,
        _ => AuditEventType::CommandExecuted,
    }
}

fn trigger_type_to_str(t: TriggerType) -> &'static str {
    match t {
        TriggerType::Cron => "cron",
        TriggerType::Webhook => "webhook",
    }
}

fn parse_trigger_type(s: &str) -> TriggerType {
    match s {
        "webhook" => TriggerType::Webhook,
        _ => TriggerType::Cron,
    }
}

fn triggered_by_to_str(t: TriggeredBy) -> &'static str {
    match t {
        TriggeredBy::Cron => "cron",
        TriggeredBy::Webhook => "webhook",
        TriggeredBy::Manual => "manual",
    }
}

fn parse_triggered_by(s: &str) -> TriggeredBy {
    match s {
        "webhook" => TriggeredBy::Webhook,
        "manual" => TriggeredBy::Manual,
        _ => TriggeredBy::Cron,
    }
}

fn job_run_status_to_str(s: JobRunStatus) -> &'static str {
    match s {
        JobRunStatus::Received => "received",
        JobRunStatus::Completed => "completed",
        JobRunStatus::Failed => "failed",
    }
}

fn parse_job_run_status(s: &str) -> JobRunStatus {
    match s {
        "completed" => JobRunStatus::Completed,
        "failed" => JobRunStatus::Failed,
        _ => JobRunStatus::Received,
    }
}

fn mcp_transport_to_str(t: McpTransportType) -> &'static str {
    match t {
        McpTransportType::Http => "Http",
        McpTransportType::Stdio => "Stdio",
    }
}

fn parse_mcp_transport(s: &str) -> McpTransportType {
    match s {
        "Stdio" => McpTransportType::Stdio,
        _ => McpTransportType::Http,
    }
}

// ---- row mapping ----

const HOST_SELECT: &str = "SELECT id, organization_id, hostname, port, username, credential_id, tags, environment, status, allow_insecure_ssl, last_health_check, created_at FROM hosts";
const POLICY_SELECT: &str = "SELECT id, organization_id, name, allowed_patterns, denied_patterns, require_approval, max_concurrent_commands, is_enabled, created_at FROM policies";
const SESSION_SELECT: &str = "SELECT id, organization_id, user_id, host_ids, title, is_job_run_session, total_tokens, total_cost, last_message_at, created_at FROM sessions";
const AUDIT_SELECT: &str = "SELECT id, organization_id, event_type, user_id, host_id, session_id, was_allowed, denial_reason, llm_reasoning, metadata_json, created_at FROM audit_logs";
const JOB_SELECT: &str = "SELECT id, organization_id, name, trigger_type, cron_schedule, webhook_secret, prompt, auto_run_llm, is_enabled, last_run_at, created_at FROM jobs";
const MCP_SERVER_SELECT: &str = "SELECT id, organization_id, name, transport_type, is_enabled, base_url, api_key_encrypted, command, arguments, working_directory, environment_variables, created_at FROM mcp_servers";
const JOB_RUN_SELECT: &str = "SELECT id, job_id, organization_id, triggered_by, status, payload, response, session_id, created_at FROM job_runs";

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        organization_id: parse_uuid(&row.get::<_, String>(1)?)?,
        email: row.get(2)?,
        display_name: row.get(3)?,
        role: parse_role(&row.get::<_, String>(4)?),
        password_hash: row.get(5)?,
        created_at: parse_ts(&row.get::<_, String>(6)?)?,
    })
}

fn row_to_access_token(row: &rusqlite::Row) -> rusqlite::Result<AccessToken> {
    Ok(AccessToken {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        organization_id: parse_uuid(&row.get::<_, String>(1)?)?,
        user_id: parse_uuid(&row.get::<_, String>(2)?)?,
        label: row.get(3)?,
        token_hash: row.get(4)?,
        expires_at: row.get::<_, Option<String>>(5)?.map(|s| parse_ts(&s)).transpose()?,
        is_active: row.get(6)?,
        last_used_at: row.get::<_, Option<String>>(7)?.map(|s| parse_ts(&s)).transpose()?,
        created_at: parse_ts(&row.get::<_, String>(8)?)?,
    })
}

fn row_to_credential(row: &rusqlite::Row) -> rusqlite::Result<Credential> {
    Ok(Credential {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        organization_id: parse_uuid(&row.get::<_, String>(1)?)?,
        name: row.get(2)?,
        kind: parse_credential_kind(&row.get::<_, String>(3)?),
        encrypted_value: row.get(4)?,
        created_at: parse_ts(&row.get::<_, String>(5)?)?,
    })
}

fn row_to_host(row: &rusqlite::Row) -> rusqlite::Result<Host> {
    Ok(Host {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        organization_id: parse_uuid(&row.get::<_, String>(1)?)?,
        hostname: row.get(2)?,
        port: row.get(3)?,
        username: row.get(4)?,
        credential_id: row.get::<_, Option<String>>(5)?.map(|s| parse_uuid(&s)).transpose()?,
        tags: parse_json_vec(&row.get::<_, String>(6)?),
        environment: row.get(7)?,
        status: parse_host_status(&row.get::<_, String>(8)?),
        allow_insecure_ssl: row.get(9)?,
        last_health_check: row.get::<_, Option<String>>(10)?.map(|s| parse_ts(&s)).transpose()?,
        created_at: parse_ts(&row.get::<_, String>(11)?)?,
    })
}

fn row_to_policy(row: &rusqlite::Row) -> rusqlite::Result<Policy> {
    Ok(Policy {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        organization_id: parse_uuid(&row.get::<_, String>(1)?)?,
        name: row.get(2)?,
        allowed_command_patterns: parse_json_vec(&row.get::<_, String>(3)?),
        denied_command_patterns: parse_json_vec(&row.get::<_, String>(4)?),
        require_approval: row.get(5)?,
        max_concurrent_commands: row.get(6)?,
        is_enabled: row.get(7)?,
        created_at: parse_ts(&row.get::<_, String>(8)?)?,
    })
}

fn row_to_policy_assignment(row: &rusqlite::Row) -> rusqlite::Result<PolicyAssignment> {
    Ok(PolicyAssignment {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        organization_id: parse_uuid(&row.get::<_, String>(1)?)?,
        policy_id: parse_uuid(&row.get::<_, String>(2)?)?,
        user_id: parse_uuid(&row.get::<_, String>(3)?)?,
        host_id: row.get::<_, Option<String>>(4)?.map(|s| parse_uuid(&s)).transpose()?,
        created_at: parse_ts(&row.get::<_, String>(5)?)?,
    })
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let host_ids_raw: String = row.get(3)?;
    let host_ids = parse_json_vec(&host_ids_raw)
        .into_iter()
        .filter_map(|s| Uuid::parse_str(&s).ok())
        .collect();
    Ok(Session {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        organization_id: parse_uuid(&row.get::<_, String>(1)?)?,
        user_id: parse_uuid(&row.get::<_, String>(2)?)?,
        host_ids,
        title: row.get(4)?,
        is_job_run_session: row.get(5)?,
        total_tokens: row.get(6)?,
        total_cost: row.get(7)?,
        last_message_at: row.get::<_, Option<String>>(8)?.map(|s| parse_ts(&s)).transpose()?,
        created_at: parse_ts(&row.get::<_, String>(9)?)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        session_id: parse_uuid(&row.get::<_, String>(1)?)?,
        role: parse_message_role(&row.get::<_, String>(2)?),
        content: row.get(3)?,
        tool_calls_json: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        tokens_used: row.get(5)?,
        created_at: parse_ts(&row.get::<_, String>(6)?)?,
    })
}

fn row_to_audit_log(row: &rusqlite::Row) -> rusqlite::Result<AuditLog> {
    Ok(AuditLog {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        organization_id: parse_uuid(&row.get::<_, String>(1)?)?,
        event_type: parse_audit_event_type(&row.get::<_, String>(2)?),
        user_id: row.get::<_, Option<String>>(3)?.map(|s| parse_uuid(&s)).transpose()?,
        host_id: row.get::<_, Option<String>>(4)?.map(|s| parse_uuid(&s)).transpose()?,
        session_id: row.get::<_, Option<String>>(5)?.map(|s| parse_uuid(&s)).transpose()?,
        was_allowed: row.get(6)?,
        denial_reason: row.get(7)?,
        llm_reasoning: row.get(8)?,
        metadata_json: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_ts(&row.get::<_, String>(10)?)?,
    })
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    Ok(Job {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        organization_id: parse_uuid(&row.get::<_, String>(1)?)?,
        name: row.get(2)?,
        trigger_type: parse_trigger_type(&row.get::<_, String>(3)?),
        cron_schedule: row.get(4)?,
        webhook_secret: row.get(5)?,
        prompt: row.get(6)?,
        auto_run_llm: row.get(7)?,
        is_enabled: row.get(8)?,
        last_run_at: row.get::<_, Option<String>>(9)?.map(|s| parse_ts(&s)).transpose()?,
        created_at: parse_ts(&row.get::<_, String>(10)?)?,
    })
}

fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
    Ok(JobRun {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        job_id: parse_uuid(&row.get::<_, String>(1)?)?,
        organization_id: parse_uuid(&row.get::<_, String>(2)?)?,
        triggered_by: parse_triggered_by(&row.get::<_, String>(3)?),
        status: parse_job_run_status(&row.get::<_, String>(4)?),
        payload: row.get(5)?,
        response: row.get(6)?,
        session_id: row.get::<_, Option<String>>(7)?.map(|s| parse_uuid(&s)).transpose()?,
        created_at: parse_ts(&row.get::<_, String>(8)?)?,
    })
}

fn row_to_mcp_server(row: &rusqlite::Row) -> rusqlite::Result<McpServer> {
    Ok(McpServer {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        organization_id: parse_uuid(&row.get::<_, String>(1)?)?,
        name: row.get(2)?,
        transport_type: parse_mcp_transport(&row.get::<_, String>(3)?),
        is_enabled: row.get(4)?,
        base_url: row.get(5)?,
        api_key_encrypted: row.get(6)?,
        command: row.get(7)?,
        arguments: parse_json_vec(&row.get::<_, String>(8)?),
        working_directory: row.get(9)?,
        environment_variables: parse_json_map(&row.get::<_, String>(10)?),
        created_at: parse_ts(&row.get::<_, String>(11)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Db {
        let db = Db::open(":memory:").unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn host_note_upsert_on_same_org_host_yields_one_row_with_latest_content() {
        let db = test_db();
        let org = db.create_organization("acme").unwrap();
        let host = db
            .create_host(org.id, "box1", 22, None, None, vec![], "prod", false)
            .unwrap();

        db.upsert_host_note(org.id, host.id, "first note").unwrap();
        db.upsert_host_note(org.id, host.id, "second note").unwrap();

        let note = db.get_host_note(org.id, host.id).unwrap().unwrap();
        assert_eq!(note.content, "second note");

        let conn = db.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM host_notes WHERE organization_id = ?1 AND host_id = ?2",
                params![org.id.to_string(), host.id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn policies_applicable_to_includes_global_and_host_scoped() {
        let db = test_db();
        let org = db.create_organization("acme").unwrap();
        let user = db
            .create_user(org.id, "u@acme.test", "U", OrgRole::Member, "hash")
            .unwrap();
        let host = db
            .create_host(org.id, "box1", 22, None, None, vec![], "prod", false)
            .unwrap();
        let global_policy = db
            .create_policy(org.id, "global", vec!["^ls.*".into()], vec![], false, 4)
            .unwrap();
        let scoped_policy = db
            .create_policy(org.id, "scoped", vec!["^cat.*".into()], vec![], false, 4)
            .unwrap();

        db.create_policy_assignment(org.id, global_policy.id, user.id, None)
            .unwrap();
        db.create_policy_assignment(org.id, scoped_policy.id, user.id, Some(host.id))
            .unwrap();

        let applicable = db.policies_applicable_to(org.id, user.id, host.id).unwrap();
        assert_eq!(applicable.len(), 2);
    }

    #[test]
    fn cross_tenant_host_read_returns_none() {
        let db = test_db();
        let org1 = db.create_organization("acme").unwrap();
        let org2 = db.create_organization("globex").unwrap();
        let host = db
            .create_host(org1.id, "box1", 22, None, None, vec![], "prod", false)
            .unwrap();

        assert!(db.get_host(org2.id, host.id).unwrap().is_none());
    }

    #[test]
    fn access_token_roundtrips_by_hash() {
        let db = test_db();
        let org = db.create_organization("acme").unwrap();
        let user = db
            .create_user(org.id, "u@acme.test", "U", OrgRole::Admin, "hash")
            .unwrap();
        let token = db
            .create_access_token(org.id, user.id, "ci", "deadbeef", None)
            .unwrap();

        let found = db.get_access_token_by_hash("deadbeef").unwrap().unwrap();
        assert_eq!(found.id, token.id);
        assert!(found.last_used_at.is_none());

        db.touch_access_token_last_used(token.id).unwrap();
        let found = db.get_access_token_by_hash("deadbeef").unwrap().unwrap();
        assert!(found.last_used_at.is_some());
    }
}
