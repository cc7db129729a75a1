use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

/// Step timeout applied when a task descriptor does not set one (5 minutes).
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 300_000;

/// Kind of worker an agent is, and therefore which steps it can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Gathers information and sources.
    Researcher,
    /// Builds, codes and deploys.
    Implementer,
    /// Processes data into insights.
    Analyst,
    /// Reviews and quality-checks results.
    Validator,
    /// Coordinates and escalates.
    Supervisor,
    /// Any type string outside the known set.
    #[serde(other)]
    Unknown,
}

impl AgentType {
    /// The five concrete agent types, in roster order.
    pub const ALL: [AgentType; 5] = [
        AgentType::Researcher,
        AgentType::Implementer,
        AgentType::Analyst,
        AgentType::Validator,
        AgentType::Supervisor,
    ];

    /// Map a free-form task type onto the agent type that executes it.
    ///
    /// Unrecognised task types fall back to [`AgentType::Implementer`].
    pub fn for_task_type(task_type: &str) -> Self {
        match task_type.trim().to_ascii_lowercase().as_str() {
            "research" => AgentType::Researcher,
            "analysis" => AgentType::Analyst,
            "implementation" => AgentType::Implementer,
            "validation" => AgentType::Validator,
            "coordination" => AgentType::Supervisor,
            _ => AgentType::Implementer,
        }
    }

    /// Parse an agent type name, yielding [`AgentType::Unknown`] for anything unrecognised.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "researcher" => AgentType::Researcher,
            "implementer" => AgentType::Implementer,
            "analyst" => AgentType::Analyst,
            "validator" => AgentType::Validator,
            "supervisor" => AgentType::Supervisor,
            _ => AgentType::Unknown,
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentType::Researcher => write!(f, "researcher"),
            AgentType::Implementer => write!(f, "implementer"),
            AgentType::Analyst => write!(f, "analyst"),
            AgentType::Validator => write!(f, "validator"),
            AgentType::Supervisor => write!(f, "supervisor"),
            AgentType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Availability of an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Idle and claimable.
    #[default]
    Active,
    /// Registered but switched off.
    Inactive,
    /// Claimed by a running step.
    Busy,
    /// Its last step failed; stays here until explicitly reactivated.
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Inactive => write!(f, "inactive"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

/// A typed worker that executes workflow steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent id, e.g. `researcher-1`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Which steps this agent executes.
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    /// Free-form capability tags.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Current availability.
    #[serde(default)]
    pub status: AgentStatus,
    /// Where the agent is reached. Defaults to `agent://{id}`.
    #[serde(default)]
    pub endpoint: String,
    /// Arbitrary descriptive metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Agent {
    /// New active agent with the default endpoint.
    pub fn new(id: impl Into<String>, name: impl Into<String>, agent_type: AgentType) -> Self {
        let id = id.into();
        Self {
            endpoint: format!("agent://{id}"),
            id,
            name: name.into(),
            agent_type,
            capabilities: BTreeSet::new(),
            status: AgentStatus::Active,
            metadata: HashMap::new(),
        }
    }

    /// Replace the capability set.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Override the default endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Urgency of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// The default.
    #[default]
    Medium,
    /// Ahead of the default.
    High,
    /// Most urgent.
    Critical,
}

/// Caller-supplied description of one task in a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Explicit step id. When absent the slugified name is used.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name, slugified into the step id when `id` is absent.
    pub name: String,
    /// Free-form task type such as `research` or `analysis`.
    #[serde(rename = "type", default)]
    pub task_type: String,
    /// Free text, scanned for risk keywords.
    #[serde(default)]
    pub description: String,
    /// Step ids this task waits on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Step timeout. Defaults to [`DEFAULT_STEP_TIMEOUT_MS`].
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Whether the step may share a round with others. Defaults to true.
    #[serde(default)]
    pub parallel: Option<bool>,
    /// Defaults to [`Priority::Medium`].
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Free-form requirements, scanned for risk keywords.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Operations the task intends to perform, checked against governance.
    #[serde(default)]
    pub operations: Vec<String>,
}

impl TaskDescriptor {
    /// Descriptor with a name and task type and every other field defaulted.
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            ..Self::default()
        }
    }

    /// Set an explicit step id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Replace the dependency list.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the step timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Replace the requirement list.
    pub fn with_requirements<I, S>(mut self, requirements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements = requirements.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the operation list.
    pub fn with_operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operations = operations.into_iter().map(Into::into).collect();
        self
    }

    /// All descriptor text that governance scans for risk keywords.
    pub fn combined_text(&self) -> String {
        let mut text = format!("{} {} {}", self.name, self.task_type, self.description);
        for requirement in &self.requirements {
            text.push(' ');
            text.push_str(requirement);
        }
        text
    }
}

/// Lifecycle of a workflow step (and of the task it was built from).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting on dependencies or for its round.
    #[default]
    Pending,
    /// Dispatched in the current round.
    InProgress,
    /// Finished successfully; its result is in the context.
    Completed,
    /// Failed and aborted the plan.
    Failed,
}

impl StepStatus {
    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::InProgress)
                | (StepStatus::InProgress, StepStatus::Completed)
                | (StepStatus::InProgress, StepStatus::Failed)
        )
    }
}

/// The plan's record of one task descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task id, referenced by its step.
    pub id: Uuid,
    /// Name copied from the descriptor.
    pub name: String,
    /// Task type copied from the descriptor.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Description copied from the descriptor.
    pub description: String,
    /// Descriptor priority or the default.
    pub priority: Priority,
    /// Requirements copied from the descriptor.
    pub requirements: Vec<String>,
    /// Step ids the task waits on.
    pub dependencies: Vec<String>,
    /// Mirrors the status of the task's step.
    pub status: StepStatus,
    /// When the plan was built.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

/// One node of a plan's dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step id, unique within the plan.
    pub id: String,
    /// The [`Task`] this step executes.
    pub task_id: Uuid,
    /// Task name.
    pub name: String,
    /// Task description.
    pub description: String,
    /// Agent type that executes the step.
    pub agent_type: AgentType,
    /// Step ids that must complete first. Not validated at planning time.
    pub dependencies: Vec<String>,
    /// Informational only. Scheduling is driven by dependencies.
    pub parallel: bool,
    /// Per-step dispatch timeout.
    pub timeout_ms: u64,
    /// Operations checked against the plan's allowed set before dispatch.
    pub operations: Vec<String>,
    /// Current lifecycle state.
    pub status: StepStatus,
}

impl WorkflowStep {
    /// The step timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Pending with every dependency in `completed`.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.status == StepStatus::Pending
            && self.dependencies.iter().all(|dep| completed.contains(dep))
    }

    /// Move the step forward. Returns false, leaving the step untouched, on an
    /// illegal transition.
    pub fn transition(&mut self, next: StepStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// Lifecycle of a plan. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Built but not yet executed.
    #[default]
    Planning,
    /// Rounds are running.
    Executing,
    /// Every step completed.
    Completed,
    /// A step failed, the run was cancelled or the budget ran out.
    Failed,
}

impl PlanStatus {
    /// Whether the plan has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Failed)
    }

    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        matches!(
            (self, next),
            (PlanStatus::Planning, PlanStatus::Executing)
                | (PlanStatus::Executing, PlanStatus::Completed)
                | (PlanStatus::Executing, PlanStatus::Failed)
        )
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanStatus::Planning => write!(f, "planning"),
            PlanStatus::Executing => write!(f, "executing"),
            PlanStatus::Completed => write!(f, "completed"),
            PlanStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Whether a planning-time agent lookup succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    /// An agent of the step's type was registered at planning time.
    Assigned,
    /// No agent of the step's type was registered at planning time.
    Unassigned,
}

/// Planning-time pairing of a task with the agent expected to run it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAssignment {
    /// The agent found at planning time, if any.
    pub agent_id: Option<String>,
    /// Task this assignment covers.
    pub task_id: Uuid,
    /// Step this assignment covers.
    pub step_id: String,
    /// Agent type the step needs.
    pub role: AgentType,
    /// Whether an agent was found.
    pub status: AssignmentStatus,
}

/// Risk-derived constraints applied to every step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceRules {
    /// Budget for the whole plan.
    pub max_execution_time_ms: u64,
    /// Operations a step may declare.
    pub allowed_operations: BTreeSet<String>,
    /// Risk threshold recorded with the rules.
    pub risk_threshold: f64,
    /// Who is notified on escalation.
    pub escalation_paths: Vec<String>,
    /// Whether every step outcome is audited.
    pub audit_required: bool,
}

impl GovernanceRules {
    /// The plan budget as a [`Duration`].
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }

    /// Whether `operation` is in the allowed set.
    pub fn allows(&self, operation: &str) -> bool {
        self.allowed_operations.contains(operation)
    }
}

/// One orchestration run: goal, task graph, governance and status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationPlan {
    /// Plan id.
    pub id: Uuid,
    /// The caller's goal.
    pub goal: String,
    /// One task per descriptor, in input order.
    pub tasks: Vec<Task>,
    /// Planning-time agent lookups, one per step.
    pub agent_assignments: Vec<AgentAssignment>,
    /// Steps in insertion order; dispatch within a round follows this order.
    pub workflow: Vec<WorkflowStep>,
    /// Rules derived from the descriptors.
    pub governance: GovernanceRules,
    /// Current lifecycle state.
    pub status: PlanStatus,
    /// When the plan was built.
    pub created_at: DateTime<Utc>,
    /// Last status change of the plan or one of its steps.
    pub updated_at: DateTime<Utc>,
}

impl OrchestrationPlan {
    /// Look up a step by id.
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.workflow.iter().find(|s| s.id == step_id)
    }

    /// Advance the plan status. Returns false on an illegal (backwards) move.
    pub fn set_status(&mut self, next: PlanStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    /// Transition a step and mirror the new status onto its task.
    pub fn set_step_status(&mut self, step_id: &str, next: StepStatus) -> bool {
        let Some(step) = self.workflow.iter_mut().find(|s| s.id == step_id) else {
            return false;
        };
        if !step.transition(next) {
            return false;
        }
        let task_id = step.task_id;
        let now = Utc::now();
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) {
            task.status = next;
            task.updated_at = now;
        }
        self.updated_at = now;
        true
    }

    /// Number of completed steps.
    pub fn completed_count(&self) -> usize {
        self.workflow
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }
}

/// What an agent returned for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Whether the agent considers the step done.
    pub success: bool,
    /// Result payload handed to dependent steps.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Execution time reported by the agent.
    pub execution_time_ms: u64,
    /// Failure description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    /// A successful outcome carrying `data`.
    pub fn success(data: serde_json::Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            data,
            execution_time_ms,
            error: None,
        }
    }

    /// A failed outcome with no payload.
    pub fn failure(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            execution_time_ms,
            error: Some(error.into()),
        }
    }
}
