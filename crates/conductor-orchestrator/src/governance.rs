use crate::audit::{AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use crate::types::{GovernanceRules, StepOutcome, TaskDescriptor, WorkflowStep};
use chrono::Utc;
use conductor_core::OrchestrationError;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Words in a task's text that mark the whole plan as high risk.
pub const RISK_KEYWORDS: [&str; 3] = ["production", "security", "payment"];

const HIGH_RISK_MAX_EXECUTION_MS: u64 = 1_800_000;
const DEFAULT_MAX_EXECUTION_MS: u64 = 900_000;

/// Derives per-plan rules and checks each step against them.
pub struct GovernanceEngine {
    audit: Arc<dyn AuditSink>,
}

impl GovernanceEngine {
    /// Engine writing audit records to `audit`.
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { audit }
    }

    /// Whether any descriptor mentions a risk keyword (case-insensitive).
    pub fn is_high_risk(tasks: &[TaskDescriptor]) -> bool {
        tasks.iter().any(|task| {
            let text = task.combined_text().to_lowercase();
            RISK_KEYWORDS.iter().any(|kw| text.contains(kw))
        })
    }

    /// Derive the rules for a plan from its task descriptors.
    ///
    /// High-risk plans get a longer budget but a narrower operation set,
    /// human escalation and mandatory auditing.
    pub fn derive_rules(tasks: &[TaskDescriptor]) -> GovernanceRules {
        let to_set = |ops: &[&str]| -> BTreeSet<String> {
            ops.iter().map(|op| (*op).to_string()).collect()
        };
        if Self::is_high_risk(tasks) {
            GovernanceRules {
                max_execution_time_ms: HIGH_RISK_MAX_EXECUTION_MS,
                allowed_operations: to_set(&["read", "validate", "test"]),
                risk_threshold: 0.7,
                escalation_paths: vec!["human-review".to_string(), "security-audit".to_string()],
                audit_required: true,
            }
        } else {
            GovernanceRules {
                max_execution_time_ms: DEFAULT_MAX_EXECUTION_MS,
                allowed_operations: to_set(&["read", "write", "validate", "test", "deploy"]),
                risk_threshold: 0.8,
                escalation_paths: vec!["auto-approve".to_string()],
                audit_required: false,
            }
        }
    }

    /// Reject a step whose declared operations are not allowed. Runs before dispatch.
    pub fn check_operations(
        step: &WorkflowStep,
        rules: &GovernanceRules,
    ) -> Result<(), OrchestrationError> {
        let denied: Vec<&str> = step
            .operations
            .iter()
            .map(String::as_str)
            .filter(|op| !rules.allows(op))
            .collect();
        if denied.is_empty() {
            return Ok(());
        }
        Err(OrchestrationError::GovernanceViolation {
            step_id: step.id.clone(),
            agent_id: None,
            reason: format!(
                "operations {denied:?} not allowed (escalate via {:?})",
                rules.escalation_paths
            ),
        })
    }

    /// Validate a dispatched step's outcome and emit its audit record.
    ///
    /// `allowed_ms` is the effective timeout the step ran under.
    pub fn check_step(
        &self,
        plan_id: Uuid,
        step: &WorkflowStep,
        agent_id: &str,
        outcome: &StepOutcome,
        allowed_ms: u64,
        rules: &GovernanceRules,
    ) -> Result<(), OrchestrationError> {
        let verdict = if !outcome.success {
            Err(OrchestrationError::StepExecution {
                step_id: step.id.clone(),
                agent_id: Some(agent_id.to_string()),
                message: outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("agent {agent_id} reported failure")),
            })
        } else if outcome.execution_time_ms > allowed_ms {
            Err(OrchestrationError::GovernanceViolation {
                step_id: step.id.clone(),
                agent_id: Some(agent_id.to_string()),
                reason: format!(
                    "reported execution time {}ms exceeds timeout {allowed_ms}ms",
                    outcome.execution_time_ms
                ),
            })
        } else {
            Ok(())
        };

        if rules.audit_required {
            let (result, detail) = match &verdict {
                Ok(()) => (AuditOutcome::Success, json!({ "status": "success" })),
                Err(e) => (AuditOutcome::Failure, json!({ "error": e.to_string() })),
            };
            self.audit.record(AuditEvent {
                timestamp: Utc::now(),
                plan_id,
                step_id: step.id.clone(),
                agent_id: Some(agent_id.to_string()),
                outcome: result,
                execution_time_ms: outcome.execution_time_ms,
                detail,
            });
        }

        if let Err(e) = &verdict {
            warn!(plan_id = %plan_id, step_id = %step.id, agent_id, error = %e, "step rejected");
        }
        verdict
    }

    /// Audit a step that failed before producing an outcome (no agent,
    /// timeout, transport fault, cancellation).
    pub fn audit_failure(
        &self,
        plan_id: Uuid,
        step_id: &str,
        error: &OrchestrationError,
        execution_time_ms: u64,
        rules: &GovernanceRules,
    ) {
        if !rules.audit_required {
            return;
        }
        self.audit.record(AuditEvent {
            timestamp: Utc::now(),
            plan_id,
            step_id: step_id.to_string(),
            agent_id: error.agent_id().map(str::to_string),
            outcome: AuditOutcome::Failure,
            execution_time_ms,
            detail: json!({ "error": error.to_string() }),
        });
    }
}

impl Default for GovernanceEngine {
    fn default() -> Self {
        Self::new(Arc::new(NoopAuditSink))
    }
}
