//! Core error definitions for the Conductor orchestration framework.
//!
//! This crate provides the error taxonomy shared across all Conductor crates.
//! Failures raised while planning or executing a workflow are structured
//! values that carry the step and agent they originated from, so callers can
//! reconstruct exactly where a plan stopped.
//!
//! # Main types
//!
//! - [`OrchestrationError`]: Caller-visible failure of a plan or one of its steps.
//! - [`ConductorError`]: Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`]: Convenience alias for `Result<T, ConductorError>`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Orchestration errors ---

/// A structured failure raised while executing an orchestration plan.
///
/// Every step-level variant names the step it came from, and the agent when one
/// had been claimed, so the failure point can be reconstructed from the error
/// alone.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestrationError {
    /// The caller referenced a plan id that was never created.
    #[error("plan {plan_id} not found")]
    PlanNotFound {
        /// The unknown plan id.
        plan_id: Uuid,
    },

    /// No agent of the required type is registered at all.
    #[error("no agent registered for type '{agent_type}' (step '{step_id}')")]
    AgentNotFound {
        /// The step that needed the agent.
        step_id: String,
        /// The agent type that has no registrations.
        agent_type: String,
    },

    /// Agents of the required type exist but none is currently active.
    #[error("no available agent of type '{agent_type}' for step '{step_id}'")]
    NoAvailableAgent {
        /// The step that needed the agent.
        step_id: String,
        /// The agent type whose agents are all busy or errored.
        agent_type: String,
    },

    /// Steps remain incomplete but none of them can ever become ready.
    #[error("circular or unresolvable dependency: steps {step_ids:?} can never become ready")]
    CircularDependency {
        /// The stuck step ids, in workflow order.
        step_ids: Vec<String>,
    },

    /// A dispatched step exceeded its timeout.
    #[error("step '{step_id}' timed out after {timeout_ms}ms on agent '{agent_id}'")]
    StepTimeout {
        /// The step that timed out.
        step_id: String,
        /// The agent executing it.
        agent_id: String,
        /// The effective timeout that elapsed.
        timeout_ms: u64,
    },

    /// The dispatch reported failure or the transport raised.
    #[error("step '{step_id}' failed: {message}")]
    StepExecution {
        /// The failed step.
        step_id: String,
        /// The agent executing it, when one had been claimed.
        agent_id: Option<String>,
        /// The underlying failure message.
        message: String,
    },

    /// Governance rejected a step before dispatch or after completion.
    #[error("governance violation on step '{step_id}': {reason}")]
    GovernanceViolation {
        /// The offending step.
        step_id: String,
        /// The agent that produced the result, if the step was dispatched.
        agent_id: Option<String>,
        /// Why the step was rejected.
        reason: String,
    },

    /// A result was written twice for the same step.
    #[error("result for step '{step_id}' was already recorded")]
    DuplicateResult {
        /// The step whose result slot was already filled.
        step_id: String,
    },

    /// The plan ran longer than its governance `max_execution_time`.
    #[error("plan {plan_id} exceeded its execution budget of {max_execution_ms}ms")]
    PlanDeadlineExceeded {
        /// The plan that ran out of time.
        plan_id: Uuid,
        /// The budget from the plan's governance rules.
        max_execution_ms: u64,
    },

    /// The caller cancelled the plan.
    #[error("plan {plan_id} was cancelled")]
    Cancelled {
        /// The cancelled plan.
        plan_id: Uuid,
        /// The step that was in flight when cancellation hit, if any.
        step_id: Option<String>,
    },

    /// The plan is not in a state that allows the requested operation.
    #[error("plan {plan_id} is {status}, expected planning")]
    InvalidPlanState {
        /// The plan.
        plan_id: Uuid,
        /// Its current status.
        status: String,
    },
}

impl OrchestrationError {
    /// The step this failure originated from, if it is a step-level failure.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::AgentNotFound { step_id, .. }
            | Self::NoAvailableAgent { step_id, .. }
            | Self::StepTimeout { step_id, .. }
            | Self::StepExecution { step_id, .. }
            | Self::GovernanceViolation { step_id, .. }
            | Self::DuplicateResult { step_id } => Some(step_id),
            Self::Cancelled { step_id, .. } => step_id.as_deref(),
            Self::PlanNotFound { .. }
            | Self::CircularDependency { .. }
            | Self::PlanDeadlineExceeded { .. }
            | Self::InvalidPlanState { .. } => None,
        }
    }

    /// The agent involved in this failure, if one had been claimed.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::StepTimeout { agent_id, .. } => Some(agent_id),
            Self::StepExecution { agent_id, .. } | Self::GovernanceViolation { agent_id, .. } => {
                agent_id.as_deref()
            }
            _ => None,
        }
    }

    /// Whether this failure is attributed to a single step.
    ///
    /// Governance violations count as step failures.
    pub fn is_step_failure(&self) -> bool {
        matches!(
            self,
            Self::AgentNotFound { .. }
                | Self::NoAvailableAgent { .. }
                | Self::StepTimeout { .. }
                | Self::StepExecution { .. }
                | Self::GovernanceViolation { .. }
        )
    }
}

// --- Framework errors ---

/// Top-level error type for the Conductor framework.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// A plan or step failure from the orchestrator.
    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;
