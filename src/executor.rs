// src/executor.rs
// Command Executor (§4.4): gate via Policy Engine, lease an SSH client,
// execute (or synthesize for dry-run), persist, audit.

use crate::audit::{AuditEvent, AuditLogger};
use crate::db::Db;
use crate::error::AppError;
use crate::models::{AuditEventType, CommandExecution, Id};
use crate::policy::{PolicyDecision, PolicyEngine};
use crate::ssh::SshPool;
use async_stream::try_stream;
use futures::Stream;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct CommandOutcome {
    pub execution: CommandExecution,
}

#[derive(Clone)]
pub struct CommandExecutor {
    db: Db,
    policy: Arc<PolicyEngine>,
    ssh: Arc<SshPool>,
    audit: AuditLogger,
}

impl CommandExecutor {
    pub fn new(db: Db, policy: Arc<PolicyEngine>, ssh: Arc<SshPool>, audit: AuditLogger) -> Self {
        Self { db, policy, ssh, audit }
    }

    fn gate(
        &self,
        organization_id: Id,
        user_id: Id,
        host_id: Id,
        session_id: Option<Id>,
        command: &str,
    ) -> Result<(), AppError> {
        let decision = self
            .policy
            .validate_command(organization_id, user_id, host_id, command)
            .map_err(AppError::Internal)?;

        match decision {
            PolicyDecision::Allow { requires_approval: false } => Ok(()),
            PolicyDecision::Allow { requires_approval: true } => {
                // No interactive approval flow exists outside a UI-driven path
                // (§9 open question); treat as a hard deny here.
                self.deny(organization_id, user_id, host_id, session_id, "Approval required", None);
                Err(AppError::PolicyDenied {
                    reason: "Approval required".to_string(),
                    matched_pattern: None,
                })
            }
            PolicyDecision::Deny { reason, matched_pattern } => {
                self.deny(organization_id, user_id, host_id, session_id, &reason, matched_pattern.as_deref());
                Err(AppError::PolicyDenied { reason, matched_pattern })
            }
        }
    }

    fn deny(&self, organization_id: Id, user_id: Id, host_id: Id, session_id: Option<Id>, reason: &str, matched_pattern: Option<&str>) {
        let metadata = matched_pattern.map(|p| serde_json::json!({ "matchedPattern": p }));
        let _ = self.audit.record(
            organization_id,
            AuditEventType::CommandDenied,
            AuditEvent {
                user_id: Some(user_id),
                host_id: Some(host_id),
                session_id,
                was_allowed: Some(false),
                denial_reason: Some(reason),
                metadata,
                ..Default::default()
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        organization_id: Id,
        user_id: Id,
        host_id: Id,
        session_id: Option<Id>,
        command: &str,
        dry_run: bool,
        llm_reasoning: Option<&str>,
    ) -> Result<CommandOutcome, AppError> {
        self.gate(organization_id, user_id, host_id, session_id, command)?;

        let host = self
            .db
            .get_host(organization_id, host_id)
            .map_err(AppError::Internal)?
            .ok_or(AppError::NotFound)?;

        let started = Instant::now();

        let (exit_code, stdout, stderr) = if dry_run {
            (Some(0), format!("[dry-run] {command}").into_bytes(), Vec::new())
        } else {
            let lease = self
                .ssh
                .get(&host)
                .await
                .map_err(|err| AppError::UpstreamFailure(err.to_string()))?;
            let result = self.ssh.run(&lease, command).await;
            self.ssh.release(lease).await;
            let result = result.map_err(|err| AppError::UpstreamFailure(err.to_string()))?;
            (result.exit_code, result.stdout, result.stderr)
        };

        let duration_ms = started.elapsed().as_millis() as i64;

        let execution = self
            .db
            .create_command_execution(
                organization_id,
                host_id,
                user_id,
                session_id,
                command,
                exit_code,
                &String::from_utf8_lossy(&stdout),
                &String::from_utf8_lossy(&stderr),
                duration_ms,
                dry_run,
            )
            .map_err(AppError::Internal)?;

        let metadata = serde_json::json!({ "executionId": execution.id, "wasDryRun": dry_run });
        self.audit
            .record(
                organization_id,
                AuditEventType::CommandExecuted,
                AuditEvent {
                    user_id: Some(user_id),
                    host_id: Some(host_id),
                    session_id,
                    was_allowed: Some(true),
                    llm_reasoning,
                    metadata: Some(metadata),
                    ..Default::default()
                },
            )
            .map_err(AppError::Internal)?;

        Ok(CommandOutcome { execution })
    }

    /// Same gate and lease as `execute`, but yields stdout chunks lazily.
    /// Closes on process exit, timeout, or `cancel` being triggered.
    #[allow(clippy::too_many_arguments)]
    pub fn stream_command_output(
        &self,
        organization_id: Id,
        user_id: Id,
        host_id: Id,
        session_id: Option<Id>,
        command: String,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Vec<u8>, AppError>> + '_ {
        try_stream! {
            self.gate(organization_id, user_id, host_id, session_id, &command)?;

            let host = self
                .db
                .get_host(organization_id, host_id)
                .map_err(AppError::Internal)?
                .ok_or(AppError::NotFound)?;

            let lease = self
                .ssh
                .get(&host)
                .await
                .map_err(|err| AppError::UpstreamFailure(err.to_string()))?;

            let result = tokio::select! {
                result = self.ssh.run(&lease, &command) => result,
                _ = cancel.cancelled() => {
                    self.ssh.cancel_and_release(lease).await;
                    Err(AppError::Canceled)?;
                    unreachable!()
                }
            };

            match result {
                Ok(output) => {
                    self.ssh.release(lease).await;
                    if !output.stdout.is_empty() {
                        yield output.stdout;
                    }
                    let duration_ms = 0i64;
                    self.db
                        .create_command_execution(
                            organization_id,
                            host_id,
                            user_id,
                            session_id,
                            &command,
                            output.exit_code,
                            &String::from_utf8_lossy(&output.stdout),
                            &String::from_utf8_lossy(&output.stderr),
                            duration_ms,
                            false,
                        )
                        .map_err(AppError::Internal)?;
                    self.audit
                        .record(
                            organization_id,
                            AuditEventType::CommandExecuted,
                            AuditEvent {
                                user_id: Some(user_id),
                                host_id: Some(host_id),
                                session_id,
                                was_allowed: Some(true),
                                ..Default::default()
                            },
                        )
                        .map_err(AppError::Internal)?;
                }
                Err(err) => {
                    self.ssh.release(lease).await;
                    Err(AppError::UpstreamFailure(err.to_string()))?;
                }
            }
        }
    }
}
