use crate::audit::AuditSink;
use crate::dispatch::Dispatcher;
use crate::governance::GovernanceEngine;
use crate::planner::PlanBuilder;
use crate::registry::AgentRegistry;
use crate::roster::default_agents;
use crate::scheduler::{PlanFailure, PlanResult, WorkflowScheduler};
use crate::types::{Agent, OrchestrationPlan, PlanStatus, TaskDescriptor};
use conductor_core::OrchestrationError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// The multi-agent orchestrator.
/// Owns the agent registry and every plan created through it.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    plans: Arc<RwLock<HashMap<Uuid, OrchestrationPlan>>>,
    builder: PlanBuilder,
    scheduler: Arc<WorkflowScheduler>,
}

impl Orchestrator {
    /// Create an orchestrator with the default five-agent roster.
    pub fn new(dispatcher: Arc<dyn Dispatcher>, audit: Arc<dyn AuditSink>) -> Self {
        Self::with_registry(
            AgentRegistry::with_agents(default_agents()),
            dispatcher,
            audit,
        )
    }

    /// Create with a custom set of agents.
    pub fn with_agents(
        agents: Vec<Agent>,
        dispatcher: Arc<dyn Dispatcher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self::with_registry(AgentRegistry::with_agents(agents), dispatcher, audit)
    }

    /// Create around a prepared registry, e.g. one with a custom selector.
    pub fn with_registry(
        registry: AgentRegistry,
        dispatcher: Arc<dyn Dispatcher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let registry = Arc::new(registry);
        let governance = Arc::new(GovernanceEngine::new(audit));
        Self {
            builder: PlanBuilder::new(Arc::clone(&registry)),
            scheduler: Arc::new(WorkflowScheduler::new(
                Arc::clone(&registry),
                dispatcher,
                governance,
            )),
            plans: Arc::new(RwLock::new(HashMap::new())),
            registry,
        }
    }

    /// Get a reference to the agent registry.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Build and store a plan in `planning` status.
    pub async fn create_plan(&self, goal: &str, tasks: &[TaskDescriptor]) -> OrchestrationPlan {
        let plan = self.builder.create_plan(goal, tasks);
        self.plans.write().await.insert(plan.id, plan.clone());
        plan
    }

    /// Execute a stored plan to completion or first failure.
    pub async fn execute_plan(&self, plan_id: Uuid) -> Result<PlanResult, PlanFailure> {
        self.execute_plan_with_cancel(plan_id, CancellationToken::new())
            .await
    }

    /// Execute a stored plan, aborting when `cancel` fires.
    ///
    /// The stored copy is moved to `executing` before the first round so that
    /// [`get_plan_status`](Self::get_plan_status) and a second call observe it,
    /// and is replaced by the final plan once the run ends.
    ///
    /// The run itself is a spawned task. Dropping this future cancels it; the
    /// task still settles its agents and stores the plan as `failed`.
    pub async fn execute_plan_with_cancel(
        &self,
        plan_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<PlanResult, PlanFailure> {
        let mut plan = {
            let mut plans = self.plans.write().await;
            let Some(stored) = plans.get_mut(&plan_id) else {
                return Err(PlanFailure::before_start(
                    plan_id,
                    OrchestrationError::PlanNotFound { plan_id },
                ));
            };
            if stored.status != PlanStatus::Planning {
                return Err(PlanFailure::before_start(
                    plan_id,
                    OrchestrationError::InvalidPlanState {
                        plan_id,
                        status: stored.status.to_string(),
                    },
                ));
            }
            let runnable = stored.clone();
            stored.set_status(PlanStatus::Executing);
            runnable
        };

        let run_token = cancel.child_token();
        let _cancel_on_drop = run_token.clone().drop_guard();
        let scheduler = Arc::clone(&self.scheduler);
        let plans = Arc::clone(&self.plans);
        let run = tokio::spawn(async move {
            let outcome = scheduler.execute(&mut plan, &run_token).await;
            info!(plan_id = %plan_id, status = %plan.status, "plan finished");
            plans.write().await.insert(plan_id, plan);
            outcome
        });

        match run.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(plan_id = %plan_id, error = %e, "plan run aborted");
                if let Some(stored) = self.plans.write().await.get_mut(&plan_id) {
                    stored.set_status(PlanStatus::Failed);
                }
                Err(PlanFailure::before_start(
                    plan_id,
                    OrchestrationError::Cancelled {
                        plan_id,
                        step_id: None,
                    },
                ))
            }
        }
    }

    /// Current status of a stored plan.
    pub async fn get_plan_status(&self, plan_id: Uuid) -> Result<PlanStatus, OrchestrationError> {
        self.plans
            .read()
            .await
            .get(&plan_id)
            .map(|plan| plan.status)
            .ok_or(OrchestrationError::PlanNotFound { plan_id })
    }

    /// Snapshot of a stored plan, including its step statuses.
    pub async fn get_plan(&self, plan_id: Uuid) -> Result<OrchestrationPlan, OrchestrationError> {
        self.plans
            .read()
            .await
            .get(&plan_id)
            .cloned()
            .ok_or(OrchestrationError::PlanNotFound { plan_id })
    }

    /// All stored plans, oldest first.
    pub async fn list_plans(&self) -> Vec<OrchestrationPlan> {
        let mut plans: Vec<OrchestrationPlan> = self.plans.read().await.values().cloned().collect();
        plans.sort_by_key(|plan| plan.created_at);
        plans
    }

    /// Every registered agent with its current status.
    pub fn list_agents(&self) -> Vec<Agent> {
        self.registry.list()
    }

    /// Register or replace an agent by id.
    pub fn register_agent(&self, agent: Agent) -> Option<Agent> {
        info!(agent_id = %agent.id, agent_type = %agent.agent_type, "agent registered");
        self.registry.register(agent)
    }

    /// Remove an agent. Returns whether it was registered.
    pub fn remove_agent(&self, agent_id: &str) -> bool {
        let removed = self.registry.remove(agent_id);
        if removed {
            info!(agent_id, "agent removed");
        }
        removed
    }
}
