// Policy Engine -> Command Executor -> Audit Log, end to end against an
// in-memory database. Uses `dry_run` so the SSH pool is never touched;
// SSH itself is exercised only by the pool's own colocated unit tests.

use infrallm::audit::AuditLogger;
use infrallm::db::Db;
use infrallm::executor::CommandExecutor;
use infrallm::models::{AuditEventType, OrgRole};
use infrallm::policy::PolicyEngine;
use infrallm::ssh::SshPool;
use infrallm::crypto::CredentialCipher;
use std::sync::Arc;
use std::time::Duration;

fn new_executor() -> (Db, CommandExecutor) {
    let db = Db::open(":memory:").unwrap();
    db.migrate().unwrap();
    let policy = Arc::new(PolicyEngine::new(db.clone()));
    let audit = AuditLogger::new(db.clone());
    let cipher = CredentialCipher::new("test-master-key");
    let ssh = SshPool::new(db.clone(), cipher, 2, Duration::from_secs(600), Duration::from_secs(5), Duration::from_secs(30));
    let executor = CommandExecutor::new(db.clone(), policy, ssh, audit);
    (db, executor)
}

#[tokio::test]
async fn command_denied_without_any_policy() {
    let (db, executor) = new_executor();
    let org = db.create_organization("acme").unwrap();
    let user = db.create_user(org.id, "op@acme.test", "Operator", OrgRole::Member, "hash").unwrap();
    let host = db.create_host(org.id, "db01.acme.internal", 22, Some("root"), None, vec![], "production", false).unwrap();

    let result = executor.execute(org.id, user.id, host.id, None, "uptime", true, None).await;
    assert!(result.is_err());

    let logs = db
        .search_audit_logs(org.id, Some(AuditEventType::CommandDenied), None, None, None, None, None, 10)
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].was_allowed, Some(false));
}

#[tokio::test]
async fn command_allowed_by_matching_pattern_executes_dry_run() {
    let (db, executor) = new_executor();
    let org = db.create_organization("acme").unwrap();
    let user = db.create_user(org.id, "op@acme.test", "Operator", OrgRole::Member, "hash").unwrap();
    let host = db.create_host(org.id, "db01.acme.internal", 22, Some("root"), None, vec![], "production", false).unwrap();
    let policy = db
        .create_policy(org.id, "standard-ops", vec!["uptime".to_string(), "df.*".to_string()], vec![], false, 4)
        .unwrap();
    db.create_policy_assignment(org.id, policy.id, user.id, None).unwrap();

    let outcome = executor.execute(org.id, user.id, host.id, None, "uptime", true, None).await.unwrap();
    assert_eq!(outcome.execution.exit_code, Some(0));
    assert!(outcome.execution.was_dry_run);

    let logs = db
        .search_audit_logs(org.id, Some(AuditEventType::CommandExecuted), None, None, None, None, None, 10)
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].was_allowed, Some(true));
}

#[tokio::test]
async fn command_outside_allowed_patterns_is_denied_even_with_a_policy_present() {
    let (db, executor) = new_executor();
    let org = db.create_organization("acme").unwrap();
    let user = db.create_user(org.id, "op@acme.test", "Operator", OrgRole::Member, "hash").unwrap();
    let host = db.create_host(org.id, "db01.acme.internal", 22, Some("root"), None, vec![], "production", false).unwrap();
    let policy = db.create_policy(org.id, "read-only", vec!["uptime".to_string()], vec![], false, 4).unwrap();
    db.create_policy_assignment(org.id, policy.id, user.id, None).unwrap();

    let result = executor.execute(org.id, user.id, host.id, None, "rm -rf /data", true, None).await;
    assert!(result.is_err());
}
