//! Multi-agent workflow orchestration with dependency rounds and governance.
//!
//! A goal and a list of task descriptors become an [`OrchestrationPlan`]: one
//! [`WorkflowStep`] per task, typed by the agent it needs and linked by
//! declared dependencies. The scheduler executes the step graph in rounds,
//! dispatching every ready step concurrently to an exclusively claimed agent
//! and aborting the plan on the first failure.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Caller-facing API owning the agent registry and all plans.
//! - [`WorkflowScheduler`]: Round-based executor of a plan's step graph.
//! - [`PlanBuilder`]: Turns task descriptors into a plan.
//! - [`GovernanceEngine`]: Derives per-plan rules and checks each step.
//! - [`AgentRegistry`]: Known agents and their availability.
//! - [`ExecutionContext`]: Write-once store of step results.
//! - [`Dispatcher`]: Contract for actually executing a step on an agent.
//! - [`AuditSink`]: Destination for governance audit records.

/// Governance audit records and sinks.
pub mod audit;
/// Write-once result store for one plan execution.
pub mod context;
/// Step dispatch contract and the simulated dispatcher.
pub mod dispatch;
/// Caller-facing orchestrator API.
pub mod engine;
/// Rule derivation and per-step governance checks.
pub mod governance;
/// Plan construction from task descriptors.
pub mod planner;
/// Agent registry and selection strategies.
pub mod registry;
/// Default agent roster.
pub mod roster;
/// Round-based workflow execution.
pub mod scheduler;
/// Shared orchestration types (Agent, WorkflowStep, OrchestrationPlan, etc.).
pub mod types;

pub use audit::{AuditEvent, AuditLog, AuditOutcome, AuditSink, MemoryAuditSink, NoopAuditSink};
pub use context::{ExecutionContext, PriorResults};
pub use dispatch::{Dispatcher, SimulatedDispatcher};
pub use engine::Orchestrator;
pub use governance::{GovernanceEngine, RISK_KEYWORDS};
pub use planner::{slugify, PlanBuilder};
pub use registry::{AgentRegistry, AgentSelector, FirstAvailable};
pub use roster::default_agents;
pub use scheduler::{PlanFailure, PlanResult, WorkflowScheduler};
pub use types::{
    Agent, AgentAssignment, AgentStatus, AgentType, AssignmentStatus, GovernanceRules,
    OrchestrationPlan, PlanStatus, Priority, StepOutcome, StepStatus, Task, TaskDescriptor,
    WorkflowStep, DEFAULT_STEP_TIMEOUT_MS,
};
