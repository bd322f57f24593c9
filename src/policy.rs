// src/policy.rs
// Policy Engine (§4.3): decides allow/deny/approve for (user, host, command).

use crate::db::Db;
use crate::models::{Id, Policy};
use regex::Regex;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Allow { requires_approval: bool },
    Deny { reason: String, matched_pattern: Option<String> },
}

impl PolicyDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, PolicyDecision::Allow { .. })
    }
}

pub struct PolicyEngine {
    db: Db,
}

impl PolicyEngine {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Compiles a pattern for full-match semantics; invalid regex is treated
    /// as non-matching rather than a fatal error (§4.3).
    fn full_match(pattern: &str, command: &str) -> bool {
        match Regex::new(pattern) {
            Ok(re) => match re.find(command) {
                Some(m) => m.start() == 0 && m.end() == command.len(),
                None => false,
            },
            Err(err) => {
                warn!(pattern, error = %err, "invalid policy regex, treating as non-matching");
                false
            }
        }
    }

    pub fn validate_command(&self, organization_id: Id, user_id: Id, host_id: Id, command: &str) -> anyhow::Result<PolicyDecision> {
        let policies = self.db.policies_applicable_to(organization_id, user_id, host_id)?;
        let decision = Self::evaluate(&policies, command);
        Ok(decision)
    }

    /// Pure evaluation over an already-resolved policy set; also the engine
    /// behind `TestCommand`, which evaluates a single policy in isolation.
    pub fn evaluate(policies: &[Policy], command: &str) -> PolicyDecision {
        if policies.is_empty() {
            return PolicyDecision::Deny {
                reason: "No policy assigned".to_string(),
                matched_pattern: None,
            };
        }

        for policy in policies {
            for pattern in &policy.denied_command_patterns {
                if Self::full_match(pattern, command) {
                    return PolicyDecision::Deny {
                        reason: "Matches denied pattern".to_string(),
                        matched_pattern: Some(pattern.clone()),
                    };
                }
            }
        }

        let mut allowed = false;
        let mut requires_approval = false;
        for policy in policies {
            for pattern in &policy.allowed_command_patterns {
                if Self::full_match(pattern, command) {
                    allowed = true;
                    if policy.require_approval {
                        requires_approval = true;
                    }
                }
            }
        }

        if allowed {
            PolicyDecision::Allow { requires_approval }
        } else {
            PolicyDecision::Deny {
                reason: "Not in allowlist".to_string(),
                matched_pattern: None,
            }
        }
    }

    /// Single-policy evaluation for the dry-run tester (§6 `POST /api/policies/{id}/test`).
    pub fn test_command(&self, organization_id: Id, policy_id: Id, command: &str) -> anyhow::Result<PolicyDecision> {
        let policy = self
            .db
            .get_policy(organization_id, policy_id)?
            .ok_or_else(|| anyhow::anyhow!("policy not found"))?;
        Ok(Self::evaluate(&[policy], command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Policy;
    use chrono::Utc;
    use uuid::Uuid;

    fn policy(allow: &[&str], deny: &[&str], require_approval: bool) -> Policy {
        Policy {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "p".to_string(),
            allowed_command_patterns: allow.iter().map(|s| s.to_string()).collect(),
            denied_command_patterns: deny.iter().map(|s| s.to_string()).collect(),
            require_approval,
            max_concurrent_commands: 4,
            is_enabled: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn no_policies_denies_with_no_policy_assigned() {
        let decision = PolicyEngine::evaluate(&[], "ls -la");
        assert_eq!(
            decision,
            PolicyDecision::Deny {
                reason: "No policy assigned".to_string(),
                matched_pattern: None,
            }
        );
    }

    #[test]
    fn deny_pattern_wins_over_allow_pattern() {
        let p = policy(&["^rm.*"], &["^rm.*"], false);
        let decision = PolicyEngine::evaluate(&[p], "rm -rf /");
        assert_eq!(
            decision,
            PolicyDecision::Deny {
                reason: "Matches denied pattern".to_string(),
                matched_pattern: Some("^rm.*".to_string()),
            }
        );
    }

    #[test]
    fn allowed_command_is_allowed() {
        let p = policy(&["^ls.*"], &["^rm.*"], false);
        let decision = PolicyEngine::evaluate(&[p], "ls -la");
        assert_eq!(decision, PolicyDecision::Allow { requires_approval: false });
    }

    #[test]
    fn command_outside_allowlist_is_denied() {
        let p = policy(&["^ls.*"], &[], false);
        let decision = PolicyEngine::evaluate(&[p], "cat /etc/passwd");
        assert_eq!(
            decision,
            PolicyDecision::Deny {
                reason: "Not in allowlist".to_string(),
                matched_pattern: None,
            }
        );
    }

    #[test]
    fn require_approval_flag_propagates_to_allow_decision() {
        let p = policy(&["^reboot$"], &[], true);
        let decision = PolicyEngine::evaluate(&[p], "reboot");
        assert_eq!(decision, PolicyDecision::Allow { requires_approval: true });
    }

    #[test]
    fn invalid_regex_is_treated_as_non_matching_not_fatal() {
        let p = policy(&["("], &[], false);
        let decision = PolicyEngine::evaluate(&[p], "anything");
        assert_eq!(
            decision,
            PolicyDecision::Deny {
                reason: "Not in allowlist".to_string(),
                matched_pattern: None,
            }
        );
    }

    #[test]
    fn partial_match_does_not_satisfy_full_match_semantics() {
        let p = policy(&["^ls$"], &[], false);
        let decision = PolicyEngine::evaluate(&[p], "ls -la");
        assert_eq!(
            decision,
            PolicyDecision::Deny {
                reason: "Not in allowlist".to_string(),
                matched_pattern: None,
            }
        );
    }
}
