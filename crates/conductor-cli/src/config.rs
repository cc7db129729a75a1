use conductor_core::{ConductorError, ConductorResult};
use conductor_orchestrator::{default_agents, Agent, AgentType, SimulatedDispatcher, TaskDescriptor};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level `conductor.toml`.
#[derive(Debug, Deserialize)]
pub struct ConductorConfig {
    /// Root for persisted state; the audit log lives under `audit/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Default tracing filter when neither `--log-level` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log line format on stderr.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Simulated dispatcher settings.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// When empty the default roster is used.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Knobs for the [`SimulatedDispatcher`] used by `conductor run`.
#[derive(Debug, Deserialize)]
pub struct SimulationConfig {
    /// Lower bound of the per-step delay.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Upper bound of the per-step delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Step ids that report failure.
    #[serde(default)]
    pub fail_steps: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            fail_steps: Vec::new(),
        }
    }
}

/// One `[[agents]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentConfig {
    fn into_agent(self) -> Agent {
        let mut agent =
            Agent::new(self.id, self.name, self.agent_type).with_capabilities(self.capabilities);
        if let Some(endpoint) = self.endpoint {
            agent = agent.with_endpoint(endpoint);
        }
        agent.metadata = self.metadata;
        agent
    }
}

/// A plan file: `goal` plus `[[tasks]]`.
#[derive(Debug, Deserialize)]
pub struct PlanFile {
    pub goal: String,
    #[serde(default)]
    pub tasks: Vec<TaskDescriptor>,
}

impl PlanFile {
    /// Read and parse a plan file.
    pub fn load(path: &Path) -> ConductorResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConductorError::Config(format!("failed to read plan file '{}': {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            ConductorError::Config(format!("invalid plan file '{}': {e}", path.display()))
        })
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_min_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    250
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            simulation: SimulationConfig::default(),
            agents: Vec::new(),
        }
    }
}

impl ConductorConfig {
    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> ConductorResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            ConductorError::Config(format!("invalid config file '{}': {e}", path.display()))
        })
    }

    /// Configured agents, or the default roster when none are configured.
    pub fn agents(&self) -> Vec<Agent> {
        if self.agents.is_empty() {
            return default_agents();
        }
        self.agents
            .iter()
            .cloned()
            .map(AgentConfig::into_agent)
            .collect()
    }

    /// Simulated dispatcher built from `[simulation]`.
    pub fn dispatcher(&self) -> SimulatedDispatcher {
        SimulatedDispatcher::new(self.simulation.min_delay_ms, self.simulation.max_delay_ms)
            .with_failures(self.simulation.fail_steps.iter().cloned())
    }

    /// Directory of the JSON-lines audit log.
    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("audit")
    }
}
