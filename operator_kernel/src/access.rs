//! Role-based tool access control with an append-only audit trail.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Tool names known to the built-in roles.
pub mod tools {
    pub const POLICY_ANALYZE: &str = "policy_analyze";
    pub const BATCH_ANALYZE: &str = "batch_analyze";
    pub const VECTOR_SEARCH: &str = "vector_search";
    pub const FILE_READ: &str = "file_read";
    pub const FILE_WRITE: &str = "file_write";
    pub const LLM_COMPLETE: &str = "llm_complete";
    pub const WORKFLOW_RUN: &str = "workflow_run";
}

/// Roles seeded into every kernel: admin, researcher, operator, read_only.
pub fn builtin_roles() -> Vec<(&'static str, Vec<&'static str>)> {
    use tools::*;
    vec![
        (
            "admin",
            vec![
                POLICY_ANALYZE,
                BATCH_ANALYZE,
                VECTOR_SEARCH,
                FILE_READ,
                FILE_WRITE,
                LLM_COMPLETE,
                WORKFLOW_RUN,
            ],
        ),
        ("researcher", vec![POLICY_ANALYZE, BATCH_ANALYZE, VECTOR_SEARCH, LLM_COMPLETE]),
        ("operator", vec![POLICY_ANALYZE, LLM_COMPLETE, WORKFLOW_RUN]),
        ("read_only", vec![POLICY_ANALYZE]),
    ]
}

/// One access check, as recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub principal: String,
    pub tool: String,
    pub role: Option<String>,
    pub allowed: bool,
}

#[derive(Debug, Default)]
struct Policy {
    roles: HashMap<String, BTreeSet<String>>,
    principals: HashMap<String, String>,
}

/// RBAC over tool names.
///
/// `check_access` resolves the principal's role and appends its audit entry
/// while holding the policy read lock, so a concurrent `assign_role` can
/// never produce an entry that disagrees with the decision returned.
#[derive(Debug, Default)]
pub struct AccessController {
    policy: RwLock<Policy>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl AccessController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a role or extend it. Tools are merged, never replaced.
    pub fn define_role<I, S>(&self, role: &str, tools: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut policy = self.policy.write();
        let granted = policy.roles.entry(role.to_string()).or_default();
        granted.extend(tools.into_iter().map(Into::into));
        debug!("Role '{}' now grants {} tools", role, granted.len());
    }

    /// Assign `role` to `principal`, replacing any previous assignment.
    pub fn assign_role(&self, principal: &str, role: &str) {
        self.policy
            .write()
            .principals
            .insert(principal.to_string(), role.to_string());
        info!("Assigned role '{}' to '{}'", role, principal);
    }

    pub fn role_of(&self, principal: &str) -> Option<String> {
        self.policy.read().principals.get(principal).cloned()
    }

    /// Defined role names, sorted.
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.policy.read().roles.keys().cloned().collect();
        roles.sort();
        roles
    }

    /// Decide whether `principal` may use `tool`. Always audited.
    pub fn check_access(&self, principal: &str, tool: &str) -> bool {
        self.decide(principal, tool).allowed
    }

    /// Like [`check_access`](Self::check_access) but returns the audit entry
    /// that was recorded.
    pub fn decide(&self, principal: &str, tool: &str) -> AuditEntry {
        let policy = self.policy.read();
        let role = policy.principals.get(principal).cloned();
        let allowed = role
            .as_ref()
            .and_then(|role| policy.roles.get(role))
            .is_some_and(|granted| granted.contains(tool));

        let entry = AuditEntry {
            timestamp: Utc::now(),
            principal: principal.to_string(),
            tool: tool.to_string(),
            role,
            allowed,
        };
        self.audit.lock().push(entry.clone());
        drop(policy);

        if !allowed {
            warn!("Access denied: '{}' cannot use tool '{}'", principal, tool);
        }
        entry
    }

    /// Sorted tools granted by the principal's current role.
    pub fn permitted_tools(&self, principal: &str) -> Vec<String> {
        let policy = self.policy.read();
        policy
            .principals
            .get(principal)
            .and_then(|role| policy.roles.get(role))
            .map(|granted| granted.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the audit trail, oldest first.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn seeded() -> AccessController {
        let access = AccessController::new();
        for (role, granted) in builtin_roles() {
            access.define_role(role, granted);
        }
        access
    }

    #[test]
    fn test_unassigned_principal_is_denied_and_audited() {
        let access = seeded();
        assert!(!access.check_access("stranger", tools::LLM_COMPLETE));
        assert!(access.permitted_tools("stranger").is_empty());

        let log = access.audit_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].principal, "stranger");
        assert_eq!(log[0].role, None);
        assert!(!log[0].allowed);
    }

    #[test]
    fn test_role_grants() {
        let access = seeded();
        access.assign_role("reader", "read_only");
        access.assign_role("ops", "operator");

        assert!(access.check_access("reader", tools::POLICY_ANALYZE));
        assert!(!access.check_access("reader", tools::LLM_COMPLETE));
        assert!(access.check_access("ops", tools::WORKFLOW_RUN));
        assert_eq!(access.audit_log().len(), 3);
        assert_eq!(
            access.permitted_tools("ops"),
            vec!["llm_complete", "policy_analyze", "workflow_run"]
        );
    }

    #[test]
    fn test_define_role_is_additive() {
        let access = AccessController::new();
        access.define_role("custom", ["a", "b"]);
        access.define_role("custom", ["c"]);
        access.assign_role("p", "custom");
        assert_eq!(access.permitted_tools("p"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_last_assignment_wins() {
        let access = seeded();
        access.assign_role("agent", "admin");
        access.assign_role("agent", "read_only");

        assert_eq!(access.role_of("agent").as_deref(), Some("read_only"));
        assert!(!access.check_access("agent", tools::FILE_WRITE));
    }

    #[test]
    fn test_role_without_definition_grants_nothing() {
        let access = AccessController::new();
        access.assign_role("p", "ghost_role");
        let entry = access.decide("p", "anything");
        assert_eq!(entry.role.as_deref(), Some("ghost_role"));
        assert!(!entry.allowed);
    }

    #[test]
    fn test_audit_entries_match_decisions_under_contention() {
        let access = Arc::new(seeded());
        access.assign_role("flip", "read_only");

        let writer = {
            let access = access.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    let role = if i % 2 == 0 { "admin" } else { "read_only" };
                    access.assign_role("flip", role);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let access = access.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        access.check_access("flip", tools::FILE_WRITE);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        let log = access.audit_log();
        assert_eq!(log.len(), 2000);
        for entry in log {
            assert_eq!(entry.allowed, entry.role.as_deref() == Some("admin"));
        }
    }
}
