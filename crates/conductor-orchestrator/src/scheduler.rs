use crate::context::{ExecutionContext, PriorResults};
use crate::dispatch::Dispatcher;
use crate::governance::GovernanceEngine;
use crate::registry::AgentRegistry;
use crate::types::{
    Agent, GovernanceRules, OrchestrationPlan, PlanStatus, StepOutcome, StepStatus, WorkflowStep,
};
use conductor_core::OrchestrationError;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Outcome of a plan whose every step completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    /// Plan that ran.
    pub plan_id: Uuid,
    /// Always `completed`.
    pub status: PlanStatus,
    /// Outcome of every step, keyed by step id.
    pub results: PriorResults,
    /// Step ids dispatched in each round, in dispatch order.
    pub rounds: Vec<Vec<String>>,
    /// Wall-clock time of the run.
    pub duration_ms: u64,
}

/// A failed plan: the originating error plus everything computed before it.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("plan {plan_id} failed: {error}")]
pub struct PlanFailure {
    /// Plan that failed.
    pub plan_id: Uuid,
    /// The error that aborted the plan.
    pub error: OrchestrationError,
    /// Results of the steps that completed before the abort.
    pub partial_results: PriorResults,
    /// Rounds dispatched, including the failing one.
    pub rounds: Vec<Vec<String>>,
    /// Wall-clock time until the abort.
    pub duration_ms: u64,
}

impl PlanFailure {
    pub(crate) fn before_start(plan_id: Uuid, error: OrchestrationError) -> Self {
        Self {
            plan_id,
            error,
            partial_results: PriorResults::new(),
            rounds: Vec::new(),
            duration_ms: 0,
        }
    }
}

impl From<PlanFailure> for OrchestrationError {
    fn from(failure: PlanFailure) -> Self {
        failure.error
    }
}

/// What one step unit reports back to the round loop.
#[derive(Debug)]
struct StepReport {
    step_id: String,
    agent_id: Option<String>,
    verdict: Result<StepOutcome, OrchestrationError>,
}

impl StepReport {
    fn rejected(step_id: &str, error: OrchestrationError) -> Self {
        Self {
            step_id: step_id.to_string(),
            agent_id: None,
            verdict: Err(error),
        }
    }
}

/// Everything a spawned step unit needs, owned.
struct StepJob {
    plan_id: Uuid,
    step: WorkflowStep,
    agent: Agent,
    prior: Arc<PriorResults>,
    timeout: Duration,
    rules: GovernanceRules,
}

/// Step units of a round that have not reported yet.
///
/// Dropping it before [`disarm`](Self::disarm) aborts every unit and releases
/// the agents they still hold.
struct InFlight {
    registry: Arc<AgentRegistry>,
    units: Vec<(String, AbortHandle)>,
}

impl InFlight {
    fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            units: Vec::new(),
        }
    }

    fn track(&mut self, agent_id: String, handle: AbortHandle) {
        self.units.push((agent_id, handle));
    }

    /// The round reached its barrier; every unit has settled its agent.
    fn disarm(mut self) {
        self.units.clear();
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        for (agent_id, handle) in self.units.drain(..) {
            handle.abort();
            if self.registry.release(&agent_id) {
                warn!(agent_id = %agent_id, "round abandoned, agent released");
            }
        }
    }
}

/// Executes a plan's step graph in dependency rounds.
///
/// Each round dispatches every ready step concurrently and waits for all of
/// them before computing the next ready set. The first failing step (in
/// workflow order) aborts the plan after its round settles; later rounds are
/// never started.
pub struct WorkflowScheduler {
    registry: Arc<AgentRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
    governance: Arc<GovernanceEngine>,
}

impl WorkflowScheduler {
    /// Scheduler claiming from `registry` and dispatching through `dispatcher`.
    pub fn new(
        registry: Arc<AgentRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
        governance: Arc<GovernanceEngine>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            governance,
        }
    }

    /// Run `plan` to completion or first failure.
    ///
    /// The plan must be in `planning`. Its status and step statuses are only
    /// mutated here, never by the step units.
    ///
    /// Dropping the returned future aborts the units of the current round and
    /// releases their agents. `plan` is then left in `executing`.
    pub async fn execute(
        &self,
        plan: &mut OrchestrationPlan,
        cancel: &CancellationToken,
    ) -> Result<PlanResult, PlanFailure> {
        let start = Instant::now();
        let plan_id = plan.id;

        if !plan.set_status(PlanStatus::Executing) {
            return Err(PlanFailure::before_start(
                plan_id,
                OrchestrationError::InvalidPlanState {
                    plan_id,
                    status: plan.status.to_string(),
                },
            ));
        }

        let total = plan.workflow.len();
        let budget = plan.governance.max_execution_time();
        let mut completed: HashSet<String> = HashSet::with_capacity(total);
        let mut context = ExecutionContext::new();
        let mut rounds: Vec<Vec<String>> = Vec::new();

        info!(plan_id = %plan_id, steps = total, goal = %plan.goal, "plan executing");

        let outcome: Result<(), OrchestrationError> = loop {
            if completed.len() >= total {
                break Ok(());
            }
            if cancel.is_cancelled() {
                break Err(OrchestrationError::Cancelled {
                    plan_id,
                    step_id: None,
                });
            }
            let remaining = budget.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break Err(OrchestrationError::PlanDeadlineExceeded {
                    plan_id,
                    max_execution_ms: plan.governance.max_execution_time_ms,
                });
            }

            let ready: Vec<usize> = plan
                .workflow
                .iter()
                .enumerate()
                .filter(|(_, step)| step.is_ready(&completed))
                .map(|(idx, _)| idx)
                .collect();

            if ready.is_empty() {
                let stuck: Vec<String> = plan
                    .workflow
                    .iter()
                    .filter(|step| !completed.contains(&step.id))
                    .map(|step| step.id.clone())
                    .collect();
                warn!(plan_id = %plan_id, stuck = ?stuck, "no step can become ready");
                break Err(OrchestrationError::CircularDependency { step_ids: stuck });
            }

            let round_ids: Vec<String> = ready
                .iter()
                .map(|&idx| plan.workflow[idx].id.clone())
                .collect();
            info!(plan_id = %plan_id, round = rounds.len() + 1, steps = ?round_ids, "dispatching round");
            rounds.push(round_ids);

            let reports = self
                .run_round(plan, &ready, &context, remaining, cancel)
                .await;

            let mut first_error = None;
            for report in reports {
                match report.verdict {
                    Ok(outcome) => match context.set(report.step_id.clone(), outcome) {
                        Ok(()) => {
                            plan.set_step_status(&report.step_id, StepStatus::Completed);
                            info!(plan_id = %plan_id, step_id = %report.step_id, "step completed");
                            completed.insert(report.step_id);
                        }
                        Err(e) => {
                            error!(plan_id = %plan_id, step_id = %report.step_id, "duplicate step result");
                            plan.set_step_status(&report.step_id, StepStatus::Failed);
                            first_error.get_or_insert(e);
                        }
                    },
                    Err(e) => {
                        error!(
                            plan_id = %plan_id,
                            step_id = %report.step_id,
                            agent_id = ?report.agent_id,
                            error = %e,
                            "step failed"
                        );
                        plan.set_step_status(&report.step_id, StepStatus::Failed);
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                break Err(e);
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                plan.set_status(PlanStatus::Completed);
                info!(plan_id = %plan_id, rounds = rounds.len(), duration_ms, "plan completed");
                Ok(PlanResult {
                    plan_id,
                    status: plan.status,
                    results: context.into_results(),
                    rounds,
                    duration_ms,
                })
            }
            Err(error) => {
                plan.set_status(PlanStatus::Failed);
                error!(
                    plan_id = %plan_id,
                    completed = completed.len(),
                    error = %error,
                    "plan failed"
                );
                Err(PlanFailure {
                    plan_id,
                    error,
                    partial_results: context.into_results(),
                    rounds,
                    duration_ms,
                })
            }
        }
    }

    /// Dispatch the ready steps of one round and wait for all of them.
    ///
    /// Agents are claimed here, in workflow order, before anything is spawned;
    /// reports come back in the same order.
    async fn run_round(
        &self,
        plan: &mut OrchestrationPlan,
        ready: &[usize],
        context: &ExecutionContext,
        remaining: Duration,
        cancel: &CancellationToken,
    ) -> Vec<StepReport> {
        let mut reports: Vec<Option<StepReport>> = Vec::with_capacity(ready.len());
        let mut running: Vec<(usize, String, String, JoinHandle<StepReport>)> = Vec::new();
        let mut in_flight = InFlight::new(Arc::clone(&self.registry));

        for &idx in ready {
            let step = plan.workflow[idx].clone();
            plan.set_step_status(&step.id, StepStatus::InProgress);

            let claimed = GovernanceEngine::check_operations(&step, &plan.governance)
                .and_then(|()| self.registry.claim(&step.id, step.agent_type));

            match claimed {
                Ok(agent) => {
                    let job = StepJob {
                        plan_id: plan.id,
                        prior: context.snapshot_for(&step.dependencies),
                        timeout: step.timeout().min(remaining),
                        rules: plan.governance.clone(),
                        agent,
                        step,
                    };
                    let step_id = job.step.id.clone();
                    let agent_id = job.agent.id.clone();
                    let handle = self.spawn_step(job, cancel);
                    in_flight.track(agent_id.clone(), handle.abort_handle());
                    running.push((reports.len(), step_id, agent_id, handle));
                    reports.push(None);
                }
                Err(e) => {
                    self.governance
                        .audit_failure(plan.id, &step.id, &e, 0, &plan.governance);
                    reports.push(Some(StepReport::rejected(&step.id, e)));
                }
            }
        }

        let slots: Vec<(usize, String, String)> = running
            .iter()
            .map(|(pos, step_id, agent_id, _)| (*pos, step_id.clone(), agent_id.clone()))
            .collect();
        let joined = join_all(running.into_iter().map(|(_, _, _, handle)| handle)).await;
        in_flight.disarm();

        for ((pos, step_id, agent_id), joined) in slots.into_iter().zip(joined) {
            let report = joined.unwrap_or_else(|e| {
                self.registry.mark_error(&agent_id);
                StepReport {
                    verdict: Err(OrchestrationError::StepExecution {
                        step_id: step_id.clone(),
                        agent_id: Some(agent_id.clone()),
                        message: format!("dispatch task aborted: {e}"),
                    }),
                    step_id,
                    agent_id: Some(agent_id),
                }
            });
            if let Some(slot) = reports.get_mut(pos) {
                *slot = Some(report);
            }
        }

        reports.into_iter().flatten().collect()
    }

    /// Spawn one step unit: dispatch under timeout and cancellation, run the
    /// governance check, release the agent.
    fn spawn_step(&self, job: StepJob, cancel: &CancellationToken) -> JoinHandle<StepReport> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let registry = Arc::clone(&self.registry);
        let governance = Arc::clone(&self.governance);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let StepJob {
                plan_id,
                step,
                agent,
                prior,
                timeout,
                rules,
            } = job;
            let timeout_ms = timeout.as_millis() as u64;
            let started = Instant::now();
            info!(plan_id = %plan_id, step_id = %step.id, agent_id = %agent.id, timeout_ms, "step dispatched");

            let dispatched = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(OrchestrationError::Cancelled {
                    plan_id,
                    step_id: Some(step.id.clone()),
                }),
                res = tokio::time::timeout(timeout, dispatcher.dispatch(&agent, &step, &prior)) => {
                    match res {
                        Ok(Ok(outcome)) => Ok(outcome),
                        Ok(Err(e)) => Err(OrchestrationError::StepExecution {
                            step_id: step.id.clone(),
                            agent_id: Some(agent.id.clone()),
                            message: e.to_string(),
                        }),
                        // The plan budget, not the step's own timeout, ran out.
                        Err(_) if timeout < step.timeout() => {
                            Err(OrchestrationError::PlanDeadlineExceeded {
                                plan_id,
                                max_execution_ms: rules.max_execution_time_ms,
                            })
                        }
                        Err(_) => Err(OrchestrationError::StepTimeout {
                            step_id: step.id.clone(),
                            agent_id: agent.id.clone(),
                            timeout_ms,
                        }),
                    }
                }
            };

            let verdict = match dispatched {
                Ok(outcome) => governance
                    .check_step(plan_id, &step, &agent.id, &outcome, timeout_ms, &rules)
                    .map(|()| outcome),
                Err(e) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    governance.audit_failure(plan_id, &step.id, &e, elapsed_ms, &rules);
                    Err(e)
                }
            };

            match &verdict {
                Ok(_) | Err(OrchestrationError::Cancelled { .. }) => {
                    registry.mark_active(&agent.id);
                }
                Err(_) => {
                    registry.mark_error(&agent.id);
                }
            }

            StepReport {
                step_id: step.id,
                agent_id: Some(agent.id),
                verdict,
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::planner::PlanBuilder;
    use crate::types::{AgentStatus, AgentType, TaskDescriptor};
    use async_trait::async_trait;
    use conductor_core::ConductorResult;
    use serde_json::json;

    struct EchoDispatcher;

    #[async_trait]
    impl Dispatcher for EchoDispatcher {
        async fn dispatch(
            &self,
            agent: &Agent,
            step: &WorkflowStep,
            prior: &PriorResults,
        ) -> ConductorResult<StepOutcome> {
            Ok(StepOutcome::success(
                json!({ "agent": agent.id, "step": step.id, "seen": prior.len() }),
                1,
            ))
        }
    }

    fn setup(agents: Vec<Agent>) -> (Arc<AgentRegistry>, WorkflowScheduler) {
        let registry = Arc::new(AgentRegistry::with_agents(agents));
        let scheduler = WorkflowScheduler::new(
            Arc::clone(&registry),
            Arc::new(EchoDispatcher),
            Arc::new(GovernanceEngine::default()),
        );
        (registry, scheduler)
    }

    #[tokio::test]
    async fn test_empty_plan_completes() {
        let (registry, scheduler) = setup(vec![]);
        let mut plan = PlanBuilder::new(registry).create_plan("nothing", &[]);
        let result = scheduler
            .execute(&mut plan, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.results.is_empty());
        assert!(result.rounds.is_empty());
        assert_eq!(plan.status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn test_prior_results_scoped_to_dependencies() {
        let (registry, scheduler) = setup(vec![
            Agent::new("researcher-1", "R", AgentType::Researcher),
            Agent::new("analyst-1", "A", AgentType::Analyst),
        ]);
        let mut plan = PlanBuilder::new(registry).create_plan(
            "g",
            &[
                TaskDescriptor::new("a", "research"),
                TaskDescriptor::new("b", "research"),
                TaskDescriptor::new("c", "analysis").with_dependencies(["a"]),
            ],
        );
        // a and b share one researcher, so run them in separate rounds.
        plan.workflow[1].dependencies = vec!["a".into()];

        let result = scheduler
            .execute(&mut plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.results["c"].data["seen"], 1);
        assert_eq!(result.rounds, vec![vec!["a".to_string()], vec!["b".into(), "c".into()]]);
    }

    #[tokio::test]
    async fn test_rejects_non_planning_plan() {
        let (registry, scheduler) = setup(vec![Agent::new("r", "R", AgentType::Researcher)]);
        let mut plan =
            PlanBuilder::new(registry).create_plan("g", &[TaskDescriptor::new("a", "research")]);
        scheduler
            .execute(&mut plan, &CancellationToken::new())
            .await
            .unwrap();

        let failure = scheduler
            .execute(&mut plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            failure.error,
            OrchestrationError::InvalidPlanState { .. }
        ));
        assert_eq!(plan.status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn test_operation_denied_before_dispatch() {
        let (registry, scheduler) = setup(vec![Agent::new(
            "implementer-1",
            "I",
            AgentType::Implementer,
        )]);
        let mut plan = PlanBuilder::new(Arc::clone(&registry)).create_plan(
            "g",
            &[TaskDescriptor::new("release", "implementation")
                .with_description("production release")
                .with_operations(["deploy"])],
        );
        let failure = scheduler
            .execute(&mut plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            failure.error,
            OrchestrationError::GovernanceViolation { .. }
        ));
        // never claimed
        assert_eq!(
            registry.get("implementer-1").unwrap().status,
            AgentStatus::Active
        );
        assert_eq!(plan.workflow[0].status, StepStatus::Failed);
    }

    struct Hang {
        dropped: Arc<std::sync::atomic::AtomicBool>,
    }

    /// Sets the flag when the pending dispatch future is dropped.
    struct DropFlag(Arc<std::sync::atomic::AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Dispatcher for Hang {
        async fn dispatch(
            &self,
            _agent: &Agent,
            _step: &WorkflowStep,
            _prior: &PriorResults,
        ) -> ConductorResult<StepOutcome> {
            let _flag = DropFlag(Arc::clone(&self.dropped));
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_dropped_execution_aborts_round() {
        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let registry = Arc::new(AgentRegistry::with_agents([Agent::new(
            "analyst-1",
            "A",
            AgentType::Analyst,
        )]));
        let scheduler = WorkflowScheduler::new(
            Arc::clone(&registry),
            Arc::new(Hang {
                dropped: Arc::clone(&dropped),
            }),
            Arc::new(GovernanceEngine::default()),
        );
        let mut plan = PlanBuilder::new(Arc::clone(&registry))
            .create_plan("g", &[TaskDescriptor::new("a", "analysis")]);

        let cancel = CancellationToken::new();
        let elapsed = tokio::time::timeout(
            Duration::from_millis(30),
            scheduler.execute(&mut plan, &cancel),
        )
        .await;
        assert!(elapsed.is_err());
        assert_eq!(
            registry.get("analyst-1").unwrap().status,
            AgentStatus::Active
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_agent_type_fails_step() {
        let (registry, scheduler) = setup(vec![]);
        let mut plan =
            PlanBuilder::new(registry).create_plan("g", &[TaskDescriptor::new("v", "validation")]);
        let failure = scheduler
            .execute(&mut plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, OrchestrationError::AgentNotFound { .. }));
        assert_eq!(failure.error.step_id(), Some("v"));
        assert_eq!(plan.status, PlanStatus::Failed);
    }
}
