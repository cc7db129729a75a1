use crate::context::PriorResults;
use crate::types::{Agent, AgentType, StepOutcome, WorkflowStep};
use async_trait::async_trait;
use conductor_core::ConductorResult;
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

/// Executes one workflow step on one agent.
///
/// Business failures are returned as `Ok` with `success == false`; `Err` is
/// reserved for transport faults. The scheduler enforces the step timeout by
/// dropping the returned future, so implementations must be cancel-safe.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Run `step` on `agent`, given the results of its dependencies.
    async fn dispatch(
        &self,
        agent: &Agent,
        step: &WorkflowStep,
        prior: &PriorResults,
    ) -> ConductorResult<StepOutcome>;
}

/// Deterministic stand-in for a real agent transport.
///
/// Sleeps a per-step delay derived from the step id, then returns a payload
/// shaped by the agent type. Steps listed in `fail_steps` report failure.
#[derive(Debug, Clone)]
pub struct SimulatedDispatcher {
    min_delay_ms: u64,
    max_delay_ms: u64,
    fail_steps: HashSet<String>,
}

impl SimulatedDispatcher {
    /// Delay bounds in milliseconds; swapped bounds are reordered.
    pub fn new(min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            min_delay_ms: min_delay_ms.min(max_delay_ms),
            max_delay_ms: max_delay_ms.max(min_delay_ms),
            fail_steps: HashSet::new(),
        }
    }

    /// Make the given steps report `success == false`.
    pub fn with_failures<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// The delay this dispatcher applies to `step_id`.
    pub fn delay_for(&self, step_id: &str) -> Duration {
        let span = self.max_delay_ms - self.min_delay_ms;
        let offset = if span == 0 {
            0
        } else {
            let mut hasher = DefaultHasher::new();
            step_id.hash(&mut hasher);
            hasher.finish() % span.saturating_add(1)
        };
        Duration::from_millis(self.min_delay_ms.saturating_add(offset))
    }
}

impl Default for SimulatedDispatcher {
    fn default() -> Self {
        Self::new(1_000, 3_000)
    }
}

#[async_trait]
impl Dispatcher for SimulatedDispatcher {
    async fn dispatch(
        &self,
        agent: &Agent,
        step: &WorkflowStep,
        prior: &PriorResults,
    ) -> ConductorResult<StepOutcome> {
        let start = Instant::now();
        tokio::time::sleep(self.delay_for(&step.id)).await;
        let elapsed = start.elapsed().as_millis() as u64;

        if self.fail_steps.contains(&step.id) {
            return Ok(StepOutcome::failure(
                format!("Agent {} failed to execute step {}", agent.name, step.name),
                elapsed,
            ));
        }

        let mut data = simulated_payload(agent, step);
        data["agent_id"] = json!(agent.id);
        data["inputs"] = json!(prior.keys().collect::<Vec<_>>());
        Ok(StepOutcome::success(data, elapsed))
    }
}

fn simulated_payload(agent: &Agent, step: &WorkflowStep) -> serde_json::Value {
    let name = &step.name;
    match agent.agent_type {
        AgentType::Researcher => json!({
            "findings": format!("Research completed for {name}"),
            "sources": ["source1", "source2", "source3"],
            "confidence": 0.85,
        }),
        AgentType::Implementer => json!({
            "implementation": format!("Implementation completed for {name}"),
            "tests": ["test1", "test2", "test3"],
            "deployment": "ready",
        }),
        AgentType::Analyst => json!({
            "analysis": format!("Analysis completed for {name}"),
            "metrics": { "accuracy": 0.92, "precision": 0.88, "recall": 0.95 },
            "insights": ["Insight 1", "Insight 2", "Insight 3"],
        }),
        AgentType::Validator => json!({
            "validation": format!("Validation completed for {name}"),
            "issues": [],
            "compliance": "passed",
        }),
        AgentType::Supervisor => json!({
            "supervision": format!("Supervision completed for {name}"),
            "coordination": "successful",
            "decisions": ["Decision 1", "Decision 2"],
        }),
        AgentType::Unknown => json!({
            "result": format!("Task {name} completed by {}", agent.name),
        }),
    }
}
