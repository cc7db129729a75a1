use crate::types::{Agent, AgentStatus, AgentType};
use conductor_core::OrchestrationError;
use parking_lot::Mutex;
use tracing::debug;

/// Strategy for picking which agent of a type serves the next step.
///
/// Implementations only choose; the registry performs the claim under its lock,
/// so a strategy never races another claim.
pub trait AgentSelector: Send + Sync {
    /// Return the index into `agents` of the agent to claim, or `None` when no
    /// agent of `agent_type` may be claimed right now.
    fn select(&self, agents: &[Agent], agent_type: AgentType) -> Option<usize>;
}

/// First active agent of the requested type, in registration order.
///
/// Never waits: when every matching agent is busy the claim fails immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstAvailable;

impl AgentSelector for FirstAvailable {
    fn select(&self, agents: &[Agent], agent_type: AgentType) -> Option<usize> {
        agents
            .iter()
            .position(|a| a.agent_type == agent_type && a.status == AgentStatus::Active)
    }
}

/// The set of known agents and their availability.
///
/// All mutation goes through one mutex so concurrent steps of a round cannot
/// claim the same agent.
pub struct AgentRegistry {
    agents: Mutex<Vec<Agent>>,
    selector: Box<dyn AgentSelector>,
}

impl AgentRegistry {
    /// Empty registry using [`FirstAvailable`].
    pub fn new() -> Self {
        Self::with_selector(FirstAvailable)
    }

    /// Empty registry using a custom selection strategy.
    pub fn with_selector(selector: impl AgentSelector + 'static) -> Self {
        Self {
            agents: Mutex::new(Vec::new()),
            selector: Box::new(selector),
        }
    }

    /// Build a registry pre-populated with `agents`.
    pub fn with_agents(agents: impl IntoIterator<Item = Agent>) -> Self {
        let registry = Self::new();
        for agent in agents {
            registry.register(agent);
        }
        registry
    }

    /// Insert an agent, replacing (in place) any agent with the same id.
    /// Returns the replaced agent.
    pub fn register(&self, agent: Agent) -> Option<Agent> {
        let mut agents = self.agents.lock();
        match agents.iter_mut().find(|a| a.id == agent.id) {
            Some(existing) => Some(std::mem::replace(existing, agent)),
            None => {
                agents.push(agent);
                None
            }
        }
    }

    /// Remove an agent by id.
    pub fn remove(&self, agent_id: &str) -> bool {
        let mut agents = self.agents.lock();
        let before = agents.len();
        agents.retain(|a| a.id != agent_id);
        agents.len() != before
    }

    /// Snapshot of one agent.
    pub fn get(&self, agent_id: &str) -> Option<Agent> {
        self.agents.lock().iter().find(|a| a.id == agent_id).cloned()
    }

    /// Snapshot of every agent in registration order.
    pub fn list(&self) -> Vec<Agent> {
        self.agents.lock().clone()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.lock().len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.lock().is_empty()
    }

    /// First registered agent of `agent_type`, regardless of status.
    pub fn first_of_type(&self, agent_type: AgentType) -> Option<Agent> {
        self.agents
            .lock()
            .iter()
            .find(|a| a.agent_type == agent_type)
            .cloned()
    }

    /// The agent the selector would pick for `agent_type`, without claiming it.
    pub fn find_available(&self, agent_type: AgentType) -> Option<Agent> {
        let agents = self.agents.lock();
        self.selector
            .select(&agents, agent_type)
            .and_then(|idx| agents.get(idx).cloned())
    }

    /// Select an agent for `step_id` and mark it busy in one critical section.
    ///
    /// Fails with `AgentNotFound` when no agent of the type is registered and
    /// with `NoAvailableAgent` when all of them are busy, inactive or errored.
    pub fn claim(&self, step_id: &str, agent_type: AgentType) -> Result<Agent, OrchestrationError> {
        let mut agents = self.agents.lock();
        let picked = self
            .selector
            .select(&agents, agent_type)
            .filter(|&idx| {
                agents
                    .get(idx)
                    .is_some_and(|a| a.agent_type == agent_type && a.status == AgentStatus::Active)
            });

        if let Some(agent) = picked.and_then(|idx| agents.get_mut(idx)) {
            agent.status = AgentStatus::Busy;
            debug!(agent_id = %agent.id, step_id, "agent claimed");
            return Ok(agent.clone());
        }

        if agents.iter().any(|a| a.agent_type == agent_type) {
            Err(OrchestrationError::NoAvailableAgent {
                step_id: step_id.to_string(),
                agent_type: agent_type.to_string(),
            })
        } else {
            Err(OrchestrationError::AgentNotFound {
                step_id: step_id.to_string(),
                agent_type: agent_type.to_string(),
            })
        }
    }

    /// Mark an active agent busy. Fails when the agent is unknown or not active.
    pub fn mark_busy(&self, agent_id: &str) -> bool {
        let mut agents = self.agents.lock();
        match agents.iter_mut().find(|a| a.id == agent_id) {
            Some(agent) if agent.status == AgentStatus::Active => {
                agent.status = AgentStatus::Busy;
                debug!(agent_id, "agent busy");
                true
            }
            _ => false,
        }
    }

    /// Return an agent to the pool after a step, whatever its prior status.
    pub fn mark_active(&self, agent_id: &str) -> bool {
        self.set_status(agent_id, AgentStatus::Active)
    }

    /// Take an agent out of selection until it is marked active again.
    pub fn mark_error(&self, agent_id: &str) -> bool {
        self.set_status(agent_id, AgentStatus::Error)
    }

    /// Take an agent out of service.
    pub fn mark_inactive(&self, agent_id: &str) -> bool {
        self.set_status(agent_id, AgentStatus::Inactive)
    }

    /// Free a busy agent. Agents in any other status are left untouched.
    pub fn release(&self, agent_id: &str) -> bool {
        let mut agents = self.agents.lock();
        match agents.iter_mut().find(|a| a.id == agent_id) {
            Some(agent) if agent.status == AgentStatus::Busy => {
                agent.status = AgentStatus::Active;
                debug!(agent_id, "agent released");
                true
            }
            _ => false,
        }
    }

    fn set_status(&self, agent_id: &str, status: AgentStatus) -> bool {
        let mut agents = self.agents.lock();
        match agents.iter_mut().find(|a| a.id == agent_id) {
            Some(agent) => {
                debug!(agent_id, from = %agent.status, to = %status, "agent status changed");
                agent.status = status;
                true
            }
            None => false,
        }
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
