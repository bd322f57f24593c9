// Webhook ingress -> Job Engine -> job_run persistence, without touching the
// LLM provider (auto_run_llm left false so the run completes synchronously
// in the detached task before we poll for it).

use infrallm::audit::AuditLogger;
use infrallm::chat_task::ChatTaskManager;
use infrallm::crypto::CredentialCipher;
use infrallm::db::Db;
use infrallm::executor::CommandExecutor;
use infrallm::jobs::JobEngine;
use infrallm::llm::orchestrator::{Orchestrator, OrchestratorConfig};
use infrallm::llm::provider::AnthropicProvider;
use infrallm::mcp::registry::McpRegistry;
use infrallm::mcp::stdio_cache::StdioCache;
use infrallm::models::{JobRunStatus, TriggerType};
use infrallm::policy::PolicyEngine;
use infrallm::ssh::SshPool;
use std::sync::Arc;
use std::time::Duration;

fn new_engine() -> (Db, Arc<JobEngine>) {
    let db = Db::open(":memory:").unwrap();
    db.migrate().unwrap();
    let cipher = CredentialCipher::new("test-master-key");
    let policy = Arc::new(PolicyEngine::new(db.clone()));
    let audit = AuditLogger::new(db.clone());
    let ssh = SshPool::new(db.clone(), cipher.clone(), 2, Duration::from_secs(600), Duration::from_secs(5), Duration::from_secs(30));
    let executor = CommandExecutor::new(db.clone(), policy, ssh, audit.clone());
    let stdio_cache = StdioCache::new(db.clone(), Duration::from_secs(900));
    let mcp = Arc::new(McpRegistry::new(db.clone(), cipher, stdio_cache, Duration::from_secs(60)));
    let provider = Arc::new(AnthropicProvider::new(String::new(), "https://api.anthropic.com".to_string(), Duration::from_secs(30)));
    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        executor,
        mcp,
        provider,
        audit.clone(),
        OrchestratorConfig {
            default_model: "claude-sonnet-4-5".to_string(),
            max_tool_iterations: 5,
            max_turn_wall_clock: Duration::from_secs(30),
        },
    ));
    let chat_tasks = Arc::new(ChatTaskManager::new());
    let engine = JobEngine::new(db.clone(), orchestrator, chat_tasks, audit, Duration::from_secs(3600));
    (db, engine)
}

#[tokio::test]
async fn webhook_with_wrong_secret_is_rejected() {
    let (db, engine) = new_engine();
    let org = db.create_organization("acme").unwrap();
    let job = db
        .create_job(org.id, "nightly-report", TriggerType::Webhook, None, Some("s3cr3t"), None, false)
        .unwrap();

    let result = engine.handle_webhook(job.id, "wrong", "{}".to_string()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn webhook_creates_exactly_one_job_run_and_completes_without_a_prompt() {
    let (db, engine) = new_engine();
    let org = db.create_organization("acme").unwrap();
    let job = db
        .create_job(org.id, "nightly-report", TriggerType::Webhook, None, Some("s3cr3t"), None, false)
        .unwrap();

    let run_id = engine.handle_webhook(job.id, "s3cr3t", "{\"ok\":true}".to_string()).await.unwrap();

    // give the detached completion task a moment to run; auto_run_llm is
    // false so it finishes immediately without touching the orchestrator.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let run = db.get_job_run(org.id, run_id).unwrap().expect("job run should exist");
    assert_eq!(run.status, JobRunStatus::Completed);

    let all_runs = db.list_job_runs(org.id, job.id).unwrap();
    assert_eq!(all_runs.len(), 1, "webhook ingress must not create duplicate job_run rows");
}
