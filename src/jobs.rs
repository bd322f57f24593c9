// src/jobs.rs
// Job Engine (§4.8): cron scheduler background task plus the webhook ingress
// handler shared by the HTTP layer.

use crate::audit::AuditLogger;
use crate::chat_task::ChatTaskManager;
use crate::db::Db;
use crate::error::{AppError, AppResult};
use crate::llm::orchestrator::{Orchestrator, OrchestratorEvent};
use crate::models::{Id, Job, JobRun, JobRunStatus, TriggerType, TriggeredBy};
use chrono::Utc;
use croner::Cron;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct JobEngine {
    db: Db,
    orchestrator: Arc<Orchestrator>,
    chat_tasks: Arc<ChatTaskManager>,
    audit: AuditLogger,
    poll_interval: Duration,
}

impl JobEngine {
    pub fn new(db: Db, orchestrator: Arc<Orchestrator>, chat_tasks: Arc<ChatTaskManager>, audit: AuditLogger, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self { db, orchestrator, chat_tasks, audit, poll_interval })
    }

    /// Polls every `poll_interval` for enabled cron jobs whose schedule
    /// matches the current minute and haven't already run this minute.
    pub fn spawn_scheduler(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.poll_interval);
            loop {
                interval.tick().await;
                if let Err(err) = engine.tick().await {
                    error!(error = %err, "cron scheduler tick failed");
                }
            }
        });
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let jobs = self.db.list_enabled_cron_jobs()?;
        let now = Utc::now();

        for job in jobs {
            let Some(schedule) = job.cron_schedule.as_deref() else { continue };
            let cron = match Cron::new(schedule).parse() {
                Ok(c) => c,
                Err(err) => {
                    // Malformed cron disables scheduling without deleting the job
                    // (§4.8 edge case) so the owner can see and fix it in the UI.
                    warn!(job = %job.name, error = %err, "disabling job with malformed cron expression");
                    continue;
                }
            };

            if !cron.is_time_matching(&now).unwrap_or(false) {
                continue;
            }

            if let Some(last_run) = job.last_run_at {
                if last_run.timestamp() / 60 == now.timestamp() / 60 {
                    continue;
                }
            }

            self.db.mark_job_run_start(job.id, now)?;

            let run = self.db.create_job_run(job.id, job.organization_id, TriggeredBy::Cron, "{}")?;

            let job = job.clone();
            let engine_db = self.db.clone();
            let orchestrator = Arc::clone(&self.orchestrator);
            let chat_tasks = Arc::clone(&self.chat_tasks);
            let audit = self.audit.clone();
            tokio::spawn(async move {
                run_job(engine_db, orchestrator, chat_tasks, audit, run, job).await;
            });
        }
        Ok(())
    }

    /// Handles `POST /api/jobs/webhook/{jobId}?secret=...`. Not org-scoped:
    /// the shared secret, not a session, is the authorization.
    pub async fn handle_webhook(&self, job_id: Id, secret: &str, payload: String) -> AppResult<Id> {
        let job = self
            .db
            .get_job_any_org(job_id)
            .map_err(AppError::Internal)?
            .ok_or(AppError::NotFound)?;

        if job.trigger_type != TriggerType::Webhook {
            return Err(AppError::InvalidArgument("job is not webhook-triggered".to_string()));
        }

        if !job.is_enabled {
            return Err(AppError::Unauthenticated);
        }

        let expected = job.webhook_secret.as_deref().unwrap_or("");
        if expected.is_empty() || !bool::from(expected.as_bytes().ct_eq(secret.as_bytes())) {
            return Err(AppError::Unauthenticated);
        }

        self.db.mark_job_run_start(job.id, Utc::now()).map_err(AppError::Internal)?;

        let run = self
            .db
            .create_job_run(job.id, job.organization_id, TriggeredBy::Webhook, &payload)
            .map_err(AppError::Internal)?;

        let run_id = run.id;
        let engine_db = self.db.clone();
        let orchestrator = Arc::clone(&self.orchestrator);
        let chat_tasks = Arc::clone(&self.chat_tasks);
        let audit = self.audit.clone();
        tokio::spawn(async move {
            run_job(engine_db, orchestrator, chat_tasks, audit, run, job).await;
        });

        Ok(run_id)
    }
}

/// Drives a single job run to completion: creates a job-run session when
/// `autoRunLlm` is set, streams the orchestrator to exhaustion, and records
/// the terminal status. Runs detached from the HTTP request lifecycle.
/// `run` must already be persisted by the caller (cron tick or webhook
/// ingress), since both need the run id before this detached task finishes.
async fn run_job(db: Db, orchestrator: Arc<Orchestrator>, chat_tasks: Arc<ChatTaskManager>, audit: AuditLogger, run: JobRun, job: Job) {
    if !job.auto_run_llm {
        let _ = db.update_job_run(run.id, JobRunStatus::Completed, Some("job has no autoRunLlm prompt"), None);
        return;
    }

    let prompt = job.prompt.clone().unwrap_or_else(|| format!("Triggered job: {}", job.name));

    let (owner_user_id, session) = match bootstrap_job_session(&db, &job) {
        Ok(pair) => pair,
        Err(err) => {
            error!(job = %job.name, error = %err, "failed to create job run session");
            let _ = db.update_job_run(run.id, JobRunStatus::Failed, Some(&err.to_string()), None);
            return;
        }
    };

    let session_id = session.id;
    let (tx, mut rx) = mpsc::unbounded_channel::<OrchestratorEvent>();
    let collected = Arc::new(tokio::sync::Mutex::new(String::new()));
    let collected_for_drain = Arc::clone(&collected);
    let drain = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let OrchestratorEvent::TextDelta(text) = event {
                collected_for_drain.lock().await.push_str(&text);
            }
        }
    });

    let organization_id = job.organization_id;
    let job_name = job.name.clone();
    let turn_failed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let orchestrator = Arc::clone(&orchestrator);
        let turn_failed = Arc::clone(&turn_failed);
        chat_tasks
            .start(session_id, move |cancel| async move {
                if let Err(err) = orchestrator
                    .send_message_stream(organization_id, owner_user_id, &session, &prompt, None, tx, cancel)
                    .await
                {
                    warn!(job = %job_name, error = %err, "job run orchestrator turn ended with error");
                    turn_failed.store(true, std::sync::atomic::Ordering::SeqCst);
                }
            })
            .await;
    }
    let _ = drain.await;

    let response_text = collected.lock().await.clone();
    let status = if turn_failed.load(std::sync::atomic::Ordering::SeqCst) {
        JobRunStatus::Failed
    } else {
        JobRunStatus::Completed
    };
    info!(job_run = %run.id, session = %session_id, ?status, "job run finished");

    let _ = audit.record(
        organization_id,
        crate::models::AuditEventType::SessionEnded,
        crate::audit::AuditEvent { session_id: Some(session_id), ..Default::default() },
    );

    let _ = db.update_job_run(run.id, status, Some(&response_text), Some(session_id));
}

/// Job runs have no human operator, so they execute as the organization's
/// earliest-created Owner and run in a dedicated single-message session with
/// no hosts pre-attached (the prompt itself names hosts via tool calls).
fn bootstrap_job_session(db: &Db, job: &Job) -> anyhow::Result<(Id, crate::models::Session)> {
    let owner_user_id = db
        .find_any_owner(job.organization_id)?
        .ok_or_else(|| anyhow::anyhow!("organization has no owner to run jobs as"))?;
    let session = db.create_session(job.organization_id, owner_user_id, Vec::new(), true)?;
    Ok((owner_user_id, session))
}
