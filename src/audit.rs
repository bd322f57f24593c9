// src/audit.rs
// Audit Logger: thin wrapper over the append-only audit_logs repository
// methods. No update/delete method is exposed anywhere in this crate.

use crate::db::Db;
use crate::models::{AuditEventType, AuditLog, Id};
use anyhow::Result;
use chrono::{DateTime, Utc};

#[derive(Clone)]
pub struct AuditLogger {
    db: Db,
}

#[derive(Default)]
pub struct AuditEvent<'a> {
    pub user_id: Option<Id>,
    pub host_id: Option<Id>,
    pub session_id: Option<Id>,
    pub was_allowed: Option<bool>,
    pub denial_reason: Option<&'a str>,
    pub llm_reasoning: Option<&'a str>,
    pub metadata: Option<serde_json::Value>,
}

impl AuditLogger {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn record(&self, organization_id: Id, event_type: AuditEventType, event: AuditEvent<'_>) -> Result<AuditLog> {
        self.db.create_audit_log(
            organization_id,
            event_type,
            event.user_id,
            event.host_id,
            event.session_id,
            event.was_allowed,
            event.denial_reason,
            event.llm_reasoning,
            event.metadata,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn search(
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
        self.db.search_audit_logs(organization_id, event_type, host_id, user_id, since, until, cursor, limit)
    }
}
