use crate::governance::GovernanceEngine;
use crate::registry::AgentRegistry;
use crate::types::{
    AgentAssignment, AgentType, AssignmentStatus, OrchestrationPlan, PlanStatus, StepStatus, Task,
    TaskDescriptor, WorkflowStep, DEFAULT_STEP_TIMEOUT_MS,
};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Turns a goal and task descriptors into an [`OrchestrationPlan`].
///
/// The builder carries dependencies through verbatim. It does not check that
/// they reference existing steps or form a DAG; the scheduler detects both at
/// run time.
pub struct PlanBuilder {
    registry: Arc<AgentRegistry>,
}

impl PlanBuilder {
    /// Builder resolving agent assignments against `registry`.
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// Build a plan in `planning` status. Nothing is executed.
    pub fn create_plan(&self, goal: &str, descriptors: &[TaskDescriptor]) -> OrchestrationPlan {
        let now = Utc::now();
        let mut used_ids = HashSet::new();
        let mut tasks = Vec::with_capacity(descriptors.len());
        let mut workflow = Vec::with_capacity(descriptors.len());
        let mut agent_assignments = Vec::with_capacity(descriptors.len());

        for (index, desc) in descriptors.iter().enumerate() {
            let name = if desc.name.trim().is_empty() {
                format!("Step {}", index + 1)
            } else {
                desc.name.clone()
            };
            let step_id = unique_id(step_id_for(desc, index), &mut used_ids);
            let agent_type = AgentType::for_task_type(&desc.task_type);
            let dependencies = dedup(&desc.dependencies);

            let task = Task {
                id: Uuid::new_v4(),
                name: name.clone(),
                task_type: desc.task_type.clone(),
                description: desc.description.clone(),
                priority: desc.priority.unwrap_or_default(),
                requirements: desc.requirements.clone(),
                dependencies: dependencies.clone(),
                status: StepStatus::Pending,
                created_at: now,
                updated_at: now,
            };

            let planned_agent = self.registry.first_of_type(agent_type).map(|a| a.id);
            agent_assignments.push(AgentAssignment {
                status: if planned_agent.is_some() {
                    AssignmentStatus::Assigned
                } else {
                    AssignmentStatus::Unassigned
                },
                agent_id: planned_agent,
                task_id: task.id,
                step_id: step_id.clone(),
                role: agent_type,
            });

            workflow.push(WorkflowStep {
                id: step_id,
                task_id: task.id,
                name,
                description: if desc.description.is_empty() {
                    format!("Execute {}", desc.task_type)
                } else {
                    desc.description.clone()
                },
                agent_type,
                dependencies,
                parallel: desc.parallel.unwrap_or(false),
                timeout_ms: desc.timeout_ms.unwrap_or(DEFAULT_STEP_TIMEOUT_MS),
                operations: desc.operations.clone(),
                status: StepStatus::Pending,
            });
            tasks.push(task);
        }

        let plan = OrchestrationPlan {
            id: Uuid::new_v4(),
            goal: goal.to_string(),
            tasks,
            agent_assignments,
            workflow,
            governance: GovernanceEngine::derive_rules(descriptors),
            status: PlanStatus::Planning,
            created_at: now,
            updated_at: now,
        };

        info!(
            plan_id = %plan.id,
            steps = plan.workflow.len(),
            audit_required = plan.governance.audit_required,
            "plan created"
        );
        plan
    }
}

/// Lowercase `name`, keeping ASCII alphanumerics and collapsing everything
/// else into single dashes: `"Research market trends"` → `"research-market-trends"`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn step_id_for(desc: &TaskDescriptor, index: usize) -> String {
    if let Some(id) = desc.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    let slug = slugify(&desc.name);
    if slug.is_empty() {
        format!("step-{}", index + 1)
    } else {
        slug
    }
}

fn unique_id(base: String, used: &mut HashSet<String>) -> String {
    if used.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}
