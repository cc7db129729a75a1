//! End-to-end orchestration tests.
//!
//! Drives full plans through the [`Orchestrator`] with a scripted dispatcher.
//! Checks: round structure and termination, cycle detection, dependency
//! ordering, intra-round concurrency, fail-fast, agent exclusivity, timeouts,
//! cancellation (including a dropped caller) and governance auditing.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, OrchestrationError};
use conductor_orchestrator::*;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Scripted dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    /// Sleep, then succeed.
    Succeed(u64),
    /// Sleep, then report `success = false`.
    Fail(u64),
    /// Return a transport error.
    Transport,
    /// Never return.
    Hang,
    /// Panic inside the dispatch future.
    Panic,
    /// Succeed immediately but report this execution time.
    Report(u64),
}

#[derive(Debug, Clone)]
struct Dispatch {
    step_id: String,
    agent_id: String,
    at: Instant,
    prior: Vec<String>,
}

#[derive(Default)]
struct Trace {
    starts: Vec<Dispatch>,
    ends: HashMap<String, Instant>,
    in_flight: HashMap<String, usize>,
    max_per_agent: usize,
}

#[derive(Default)]
struct ScriptedDispatcher {
    script: HashMap<String, Behaviour>,
    trace: Mutex<Trace>,
}

impl ScriptedDispatcher {
    fn new() -> Self {
        Self::default()
    }

    fn on(mut self, step_id: &str, behaviour: Behaviour) -> Self {
        self.script.insert(step_id.to_string(), behaviour);
        self
    }

    fn started(&self) -> Vec<String> {
        self.trace
            .lock()
            .starts
            .iter()
            .map(|d| d.step_id.clone())
            .collect()
    }

    fn start_of(&self, step_id: &str) -> Dispatch {
        self.trace
            .lock()
            .starts
            .iter()
            .find(|d| d.step_id == step_id)
            .cloned()
            .unwrap_or_else(|| panic!("{step_id} was never dispatched"))
    }

    fn end_of(&self, step_id: &str) -> Instant {
        self.trace.lock().ends[step_id]
    }

    fn max_per_agent(&self) -> usize {
        self.trace.lock().max_per_agent
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn dispatch(
        &self,
        agent: &Agent,
        step: &WorkflowStep,
        prior: &PriorResults,
    ) -> ConductorResult<StepOutcome> {
        let behaviour = self
            .script
            .get(&step.id)
            .copied()
            .unwrap_or(Behaviour::Succeed(5));
        {
            let mut trace = self.trace.lock();
            trace.starts.push(Dispatch {
                step_id: step.id.clone(),
                agent_id: agent.id.clone(),
                at: Instant::now(),
                prior: prior.keys().cloned().collect(),
            });
            let count = trace.in_flight.entry(agent.id.clone()).or_default();
            *count += 1;
            let count = *count;
            trace.max_per_agent = trace.max_per_agent.max(count);
        }

        let result = match behaviour {
            Behaviour::Succeed(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(StepOutcome::success(json!({ "agent": agent.id }), ms))
            }
            Behaviour::Fail(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(StepOutcome::failure("scripted failure", ms))
            }
            Behaviour::Transport => Err(ConductorError::Io(std::io::Error::other(
                "connection reset",
            ))),
            Behaviour::Hang => std::future::pending::<ConductorResult<StepOutcome>>().await,
            Behaviour::Panic => panic!("agent crashed"),
            Behaviour::Report(ms) => Ok(StepOutcome::success(json!({}), ms)),
        };

        let mut trace = self.trace.lock();
        trace.ends.insert(step.id.clone(), Instant::now());
        if let Some(count) = trace.in_flight.get_mut(&agent.id) {
            *count -= 1;
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn orchestrator(dispatcher: &Arc<ScriptedDispatcher>) -> Orchestrator {
    Orchestrator::new(dispatcher.clone(), Arc::new(NoopAuditSink))
}

fn task(id: &str, task_type: &str, deps: &[&str]) -> TaskDescriptor {
    TaskDescriptor::new(id, task_type)
        .with_id(id)
        .with_dependencies(deps.iter().copied())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_demo_research_then_analyze() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let orch = orchestrator(&dispatcher);

    let plan = orch
        .create_plan(
            "demo",
            &[
                TaskDescriptor::new("research", "research"),
                TaskDescriptor::new("analyze", "analysis").with_dependencies(["research"]),
            ],
        )
        .await;
    let result = orch.execute_plan(plan.id).await.unwrap();

    assert_eq!(result.results.len(), 2);
    assert_eq!(result.status, PlanStatus::Completed);
    assert_eq!(
        orch.get_plan_status(plan.id).await.unwrap(),
        PlanStatus::Completed
    );
    assert!(dispatcher.start_of("analyze").at >= dispatcher.end_of("research"));
    assert_eq!(dispatcher.start_of("analyze").prior, vec!["research"]);
}

#[tokio::test]
async fn test_terminates_within_workflow_rounds() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let orch = orchestrator(&dispatcher);

    let chain = [
        task("a", "research", &[]),
        task("b", "analysis", &["a"]),
        task("c", "implementation", &["b"]),
        task("d", "validation", &["c"]),
    ];
    let plan = orch.create_plan("chain", &chain).await;
    let result = orch.execute_plan(plan.id).await.unwrap();
    assert_eq!(result.rounds.len(), 4);
    assert!(result.rounds.len() <= plan.workflow.len());

    let wide = [
        task("w1", "research", &[]),
        task("w2", "analysis", &[]),
        task("w3", "implementation", &[]),
        task("w4", "validation", &["w1", "w2", "w3"]),
    ];
    let plan = orch.create_plan("wide", &wide).await;
    let result = orch.execute_plan(plan.id).await.unwrap();
    assert_eq!(
        result.rounds,
        vec![
            vec!["w1".to_string(), "w2".into(), "w3".into()],
            vec!["w4".to_string()],
        ]
    );
}

#[tokio::test]
async fn test_cycle_detected_without_hanging() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let orch = orchestrator(&dispatcher);
    let plan = orch
        .create_plan(
            "cycle",
            &[task("a", "research", &["b"]), task("b", "analysis", &["a"])],
        )
        .await;

    let failure = tokio::time::timeout(Duration::from_secs(5), orch.execute_plan(plan.id))
        .await
        .expect("cycle detection must not hang")
        .unwrap_err();

    assert_eq!(
        failure.error,
        OrchestrationError::CircularDependency {
            step_ids: vec!["a".into(), "b".into()]
        }
    );
    assert!(failure.partial_results.is_empty());
    assert!(dispatcher.started().is_empty());
    assert_eq!(
        orch.get_plan_status(plan.id).await.unwrap(),
        PlanStatus::Failed
    );

    let body = serde_json::to_value(&failure.error).unwrap();
    assert_eq!(body["kind"], "circular_dependency");
}

#[tokio::test]
async fn test_unreachable_steps_reported_after_progress() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let orch = orchestrator(&dispatcher);
    let plan = orch
        .create_plan(
            "dangling",
            &[
                task("root", "research", &[]),
                task("orphan", "analysis", &["ghost"]),
                task("child", "validation", &["orphan"]),
            ],
        )
        .await;

    let failure = orch.execute_plan(plan.id).await.unwrap_err();
    assert_eq!(
        failure.error,
        OrchestrationError::CircularDependency {
            step_ids: vec!["orphan".into(), "child".into()]
        }
    );
    assert!(failure.partial_results.contains_key("root"));
    assert_eq!(failure.rounds, vec![vec!["root".to_string()]]);
}

#[tokio::test]
async fn test_dependencies_complete_before_dispatch() {
    let dispatcher = Arc::new(
        ScriptedDispatcher::new()
            .on("b", Behaviour::Succeed(40))
            .on("c", Behaviour::Succeed(10)),
    );
    let orch = orchestrator(&dispatcher);
    let plan = orch
        .create_plan(
            "diamond",
            &[
                task("a", "research", &[]),
                task("b", "analysis", &["a"]),
                task("c", "implementation", &["a"]),
                task("d", "validation", &["b", "c"]),
            ],
        )
        .await;
    orch.execute_plan(plan.id).await.unwrap();

    let stored = orch.get_plan(plan.id).await.unwrap();
    for step in &stored.workflow {
        let start = dispatcher.start_of(&step.id).at;
        for dep in &step.dependencies {
            assert!(
                start >= dispatcher.end_of(dep),
                "{} dispatched before {dep} finished",
                step.id
            );
        }
    }
    assert_eq!(dispatcher.start_of("d").prior, vec!["b", "c"]);
}

#[tokio::test]
async fn test_independent_steps_run_concurrently() {
    let dispatcher = Arc::new(
        ScriptedDispatcher::new()
            .on("left", Behaviour::Succeed(100))
            .on("right", Behaviour::Succeed(100)),
    );
    let orch = orchestrator(&dispatcher);
    let plan = orch
        .create_plan(
            "parallel",
            &[task("left", "research", &[]), task("right", "analysis", &[])],
        )
        .await;

    let started = Instant::now();
    let result = orch.execute_plan(plan.id).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.rounds.len(), 1);
    assert!(dispatcher.start_of("right").at < dispatcher.end_of("left"));
    assert!(dispatcher.start_of("left").at < dispatcher.end_of("right"));
    assert!(
        elapsed < Duration::from_millis(190),
        "two 100ms steps took {elapsed:?}"
    );
}

#[tokio::test]
async fn test_fail_fast_stops_later_rounds() {
    let dispatcher = Arc::new(
        ScriptedDispatcher::new()
            .on("s1", Behaviour::Succeed(60))
            .on("s2", Behaviour::Succeed(60))
            .on("s3", Behaviour::Fail(10)),
    );
    let orch = orchestrator(&dispatcher);
    let plan = orch
        .create_plan(
            "five",
            &[
                task("s1", "research", &[]),
                task("s2", "analysis", &[]),
                task("s3", "validation", &[]),
                task("s4", "implementation", &["s1"]),
                task("s5", "coordination", &["s3"]),
            ],
        )
        .await;

    let failure = orch.execute_plan(plan.id).await.unwrap_err();

    match &failure.error {
        OrchestrationError::StepExecution {
            step_id,
            agent_id,
            message,
        } => {
            assert_eq!(step_id, "s3");
            assert_eq!(agent_id.as_deref(), Some("validator-1"));
            assert_eq!(message, "scripted failure");
        }
        other => panic!("unexpected error {other:?}"),
    }
    // Round-mates of the failing step still report their own outcome.
    assert!(failure.partial_results.contains_key("s1"));
    assert!(failure.partial_results.contains_key("s2"));
    assert_eq!(failure.rounds.len(), 1);

    let started = dispatcher.started();
    assert!(!started.contains(&"s4".to_string()));
    assert!(!started.contains(&"s5".to_string()));

    let stored = orch.get_plan(plan.id).await.unwrap();
    assert_eq!(stored.status, PlanStatus::Failed);
    let status = |id: &str| stored.step(id).unwrap().status;
    assert_eq!(status("s1"), StepStatus::Completed);
    assert_eq!(status("s2"), StepStatus::Completed);
    assert_eq!(status("s3"), StepStatus::Failed);
    assert_eq!(status("s4"), StepStatus::Pending);
    assert_eq!(status("s5"), StepStatus::Pending);
}

#[tokio::test]
async fn test_same_type_contention_fails_without_queueing() {
    let dispatcher = Arc::new(ScriptedDispatcher::new().on("first", Behaviour::Succeed(30)));
    let orch = orchestrator(&dispatcher);
    let plan = orch
        .create_plan(
            "contention",
            &[task("first", "research", &[]), task("second", "research", &[])],
        )
        .await;

    let failure = orch.execute_plan(plan.id).await.unwrap_err();
    assert_eq!(
        failure.error,
        OrchestrationError::NoAvailableAgent {
            step_id: "second".into(),
            agent_type: "researcher".into(),
        }
    );
    assert!(failure.partial_results.contains_key("first"));
    assert_eq!(dispatcher.started(), vec!["first"]);
    assert_eq!(
        orch.registry().get("researcher-1").unwrap().status,
        AgentStatus::Active
    );
}

#[tokio::test]
async fn test_busy_agents_never_shared() {
    let dispatcher = Arc::new(
        ScriptedDispatcher::new()
            .on("one", Behaviour::Succeed(40))
            .on("two", Behaviour::Succeed(40)),
    );
    let orch = orchestrator(&dispatcher);
    orch.register_agent(Agent::new("researcher-2", "Research Agent Beta", AgentType::Researcher));

    let plan = orch
        .create_plan(
            "two researchers",
            &[task("one", "research", &[]), task("two", "research", &[])],
        )
        .await;
    let result = orch.execute_plan(plan.id).await.unwrap();

    assert_eq!(result.rounds.len(), 1);
    assert_eq!(dispatcher.max_per_agent(), 1);
    assert_ne!(
        dispatcher.start_of("one").agent_id,
        dispatcher.start_of("two").agent_id
    );
    assert!(orch
        .list_agents()
        .iter()
        .all(|a| a.status == AgentStatus::Active));
}

#[tokio::test]
async fn test_errored_agent_stays_out_until_restored() {
    let dispatcher = Arc::new(ScriptedDispatcher::new().on("broken", Behaviour::Fail(1)));
    let orch = orchestrator(&dispatcher);

    let plan = orch
        .create_plan("first", &[task("broken", "analysis", &[])])
        .await;
    orch.execute_plan(plan.id).await.unwrap_err();
    assert_eq!(
        orch.registry().get("analyst-1").unwrap().status,
        AgentStatus::Error
    );

    let retry = orch
        .create_plan("second", &[task("fixed", "analysis", &[])])
        .await;
    let failure = orch.execute_plan(retry.id).await.unwrap_err();
    assert!(matches!(
        failure.error,
        OrchestrationError::NoAvailableAgent { .. }
    ));

    assert!(orch.registry().mark_active("analyst-1"));
    let again = orch
        .create_plan("third", &[task("fixed", "analysis", &[])])
        .await;
    orch.execute_plan(again.id).await.unwrap();
}

#[tokio::test]
async fn test_step_timeout_marks_agent_error() {
    let dispatcher = Arc::new(ScriptedDispatcher::new().on("slow", Behaviour::Hang));
    let orch = orchestrator(&dispatcher);
    let plan = orch
        .create_plan(
            "timeout",
            &[task("slow", "implementation", &[]).with_timeout_ms(50)],
        )
        .await;

    let failure = orch.execute_plan(plan.id).await.unwrap_err();
    assert_eq!(
        failure.error,
        OrchestrationError::StepTimeout {
            step_id: "slow".into(),
            agent_id: "implementer-1".into(),
            timeout_ms: 50,
        }
    );
    assert_eq!(
        orch.registry().get("implementer-1").unwrap().status,
        AgentStatus::Error
    );
}

#[tokio::test]
async fn test_transport_error_preserves_message() {
    let dispatcher = Arc::new(ScriptedDispatcher::new().on("call", Behaviour::Transport));
    let orch = orchestrator(&dispatcher);
    let plan = orch
        .create_plan("transport", &[task("call", "research", &[])])
        .await;

    let failure = orch.execute_plan(plan.id).await.unwrap_err();
    match failure.error {
        OrchestrationError::StepExecution { message, .. } => {
            assert!(message.contains("connection reset"), "{message}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_panicking_dispatch_is_a_step_failure() {
    let dispatcher = Arc::new(
        ScriptedDispatcher::new()
            .on("crash", Behaviour::Panic)
            .on("fine", Behaviour::Succeed(5)),
    );
    let orch = orchestrator(&dispatcher);
    let plan = orch
        .create_plan(
            "panic",
            &[task("crash", "validation", &[]), task("fine", "research", &[])],
        )
        .await;

    let failure = orch.execute_plan(plan.id).await.unwrap_err();
    assert!(failure.error.is_step_failure());
    assert_eq!(failure.error.step_id(), Some("crash"));
    assert_eq!(failure.error.agent_id(), Some("validator-1"));
    assert!(failure.partial_results.contains_key("fine"));
    assert_eq!(
        orch.registry().get("validator-1").unwrap().status,
        AgentStatus::Error
    );
}

#[tokio::test]
async fn test_cancellation_releases_agent() {
    let dispatcher = Arc::new(ScriptedDispatcher::new().on("wait", Behaviour::Hang));
    let orch = orchestrator(&dispatcher);
    let plan = orch
        .create_plan(
            "cancel",
            &[task("wait", "coordination", &[]), task("next", "research", &["wait"])],
        )
        .await;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let failure = orch
        .execute_plan_with_cancel(plan.id, token)
        .await
        .unwrap_err();
    assert_eq!(
        failure.error,
        OrchestrationError::Cancelled {
            plan_id: plan.id,
            step_id: Some("wait".into()),
        }
    );
    assert_eq!(dispatcher.started(), vec!["wait"]);
    assert_eq!(
        orch.registry().get("supervisor-1").unwrap().status,
        AgentStatus::Active
    );
    assert_eq!(
        orch.get_plan_status(plan.id).await.unwrap(),
        PlanStatus::Failed
    );
}

#[tokio::test]
async fn test_cancelled_before_first_round() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let orch = orchestrator(&dispatcher);
    let plan = orch
        .create_plan("cancel", &[task("a", "research", &[])])
        .await;

    let token = CancellationToken::new();
    token.cancel();
    let failure = orch
        .execute_plan_with_cancel(plan.id, token)
        .await
        .unwrap_err();
    assert_eq!(
        failure.error,
        OrchestrationError::Cancelled {
            plan_id: plan.id,
            step_id: None,
        }
    );
    assert!(dispatcher.started().is_empty());
}

#[tokio::test]
async fn test_dropped_execution_fails_plan_and_releases_agent() {
    let dispatcher = Arc::new(ScriptedDispatcher::new().on("wait", Behaviour::Hang));
    let orch = orchestrator(&dispatcher);
    let plan = orch
        .create_plan(
            "abandoned",
            &[task("wait", "coordination", &[]), task("next", "research", &["wait"])],
        )
        .await;

    let elapsed = tokio::time::timeout(Duration::from_millis(50), orch.execute_plan(plan.id)).await;
    assert!(elapsed.is_err());

    // The detached run settles on its own once the caller is gone.
    let deadline = Instant::now() + Duration::from_secs(2);
    while orch.get_plan_status(plan.id).await.unwrap() == PlanStatus::Executing {
        assert!(Instant::now() < deadline, "plan stuck in executing");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stored = orch.get_plan(plan.id).await.unwrap();
    assert_eq!(stored.status, PlanStatus::Failed);
    assert_eq!(stored.step("wait").unwrap().status, StepStatus::Failed);
    assert_eq!(stored.step("next").unwrap().status, StepStatus::Pending);
    assert_eq!(
        orch.registry().get("supervisor-1").unwrap().status,
        AgentStatus::Active
    );
    assert_eq!(dispatcher.started(), vec!["wait"]);

    let failure = orch.execute_plan(plan.id).await.unwrap_err();
    assert_eq!(
        failure.error,
        OrchestrationError::InvalidPlanState {
            plan_id: plan.id,
            status: "failed".into(),
        }
    );
}

#[tokio::test]
async fn test_plan_budget_caps_step_timeout() {
    let dispatcher = Arc::new(ScriptedDispatcher::new().on("long", Behaviour::Hang));
    let registry = Arc::new(AgentRegistry::with_agents(default_agents()));
    let scheduler = WorkflowScheduler::new(
        Arc::clone(&registry),
        dispatcher.clone(),
        Arc::new(GovernanceEngine::default()),
    );
    let mut plan =
        PlanBuilder::new(Arc::clone(&registry)).create_plan("budget", &[task("long", "research", &[])]);
    plan.governance.max_execution_time_ms = 50;

    let failure = scheduler
        .execute(&mut plan, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        failure.error,
        OrchestrationError::PlanDeadlineExceeded {
            plan_id: plan.id,
            max_execution_ms: 50,
        }
    );

    let mut exhausted =
        PlanBuilder::new(registry).create_plan("budget", &[task("quick", "analysis", &[])]);
    exhausted.governance.max_execution_time_ms = 0;
    let failure = scheduler
        .execute(&mut exhausted, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        OrchestrationError::PlanDeadlineExceeded { .. }
    ));
    assert!(failure.rounds.is_empty());
    assert_eq!(dispatcher.started(), vec!["long"]);
}

#[tokio::test]
async fn test_high_risk_plan_audits_every_outcome() {
    let dispatcher = Arc::new(
        ScriptedDispatcher::new()
            .on("check", Behaviour::Succeed(5))
            .on("verify", Behaviour::Report(10_000)),
    );
    let sink = Arc::new(MemoryAuditSink::new());
    let orch = Orchestrator::new(dispatcher.clone(), sink.clone());

    let plan = orch
        .create_plan(
            "payment gateway hardening",
            &[
                task("check", "research", &[]).with_description("security scan"),
                task("verify", "validation", &["check"]).with_timeout_ms(1_000),
            ],
        )
        .await;
    assert!(plan.governance.audit_required);

    let failure = orch.execute_plan(plan.id).await.unwrap_err();
    assert!(matches!(
        failure.error,
        OrchestrationError::GovernanceViolation { ref step_id, .. } if step_id == "verify"
    ));
    assert!(failure.partial_results.contains_key("check"));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].step_id, "check");
    assert_eq!(events[0].outcome, AuditOutcome::Success);
    assert_eq!(events[1].step_id, "verify");
    assert_eq!(events[1].outcome, AuditOutcome::Failure);
    assert_eq!(events[1].agent_id.as_deref(), Some("validator-1"));
    assert!(events.iter().all(|e| e.plan_id == plan.id));
}

#[tokio::test]
async fn test_denied_operation_never_dispatched() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let sink = Arc::new(MemoryAuditSink::new());
    let orch = Orchestrator::new(dispatcher.clone(), sink.clone());

    let plan = orch
        .create_plan(
            "production rollout",
            &[task("ship", "implementation", &[])
                .with_description("push to production")
                .with_operations(["write", "deploy"])],
        )
        .await;
    let failure = orch.execute_plan(plan.id).await.unwrap_err();

    assert!(matches!(
        failure.error,
        OrchestrationError::GovernanceViolation { agent_id: None, .. }
    ));
    assert!(dispatcher.started().is_empty());
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.events()[0].outcome, AuditOutcome::Failure);
}

#[tokio::test]
async fn test_custom_selector_strategy() {
    struct LastAvailable;

    impl AgentSelector for LastAvailable {
        fn select(&self, agents: &[Agent], agent_type: AgentType) -> Option<usize> {
            agents
                .iter()
                .rposition(|a| a.agent_type == agent_type && a.status == AgentStatus::Active)
        }
    }

    let registry = AgentRegistry::with_selector(LastAvailable);
    registry.register(Agent::new("analyst-1", "Gamma", AgentType::Analyst));
    registry.register(Agent::new("analyst-2", "Delta", AgentType::Analyst));

    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let orch = Orchestrator::with_registry(registry, dispatcher.clone(), Arc::new(NoopAuditSink));
    let plan = orch
        .create_plan("pick", &[task("a", "analysis", &[])])
        .await;
    let result = orch.execute_plan(plan.id).await.unwrap();

    assert_eq!(dispatcher.start_of("a").agent_id, "analyst-2");
    assert_eq!(result.results["a"].data["agent"], "analyst-2");
    // Planning records the first registered agent regardless of strategy.
    assert_eq!(
        plan.agent_assignments[0].agent_id.as_deref(),
        Some("analyst-1")
    );
}

#[test]
fn test_results_are_write_once() {
    let mut context = ExecutionContext::new();
    context
        .set("a", StepOutcome::success(json!({ "v": 1 }), 1))
        .unwrap();
    let err = context
        .set("a", StepOutcome::success(json!({ "v": 2 }), 1))
        .unwrap_err();
    assert_eq!(
        err,
        OrchestrationError::DuplicateResult {
            step_id: "a".into()
        }
    );
    assert_eq!(context.get("a").unwrap().data["v"], 1);
}
