use crate::types::{Agent, AgentType};
use serde_json::json;

/// Create the default agent roster: one active agent per concrete agent type.
pub fn default_agents() -> Vec<Agent> {
    vec![
        researcher_agent(),
        implementer_agent(),
        analyst_agent(),
        validator_agent(),
        supervisor_agent(),
    ]
}

fn researcher_agent() -> Agent {
    Agent::new("researcher-1", "Research Agent Alpha", AgentType::Researcher)
        .with_capabilities(["web-search", "data-analysis", "documentation", "fact-checking"])
        .with_metadata("specialty", json!("market-research"))
        .with_metadata("experience", json!("senior"))
}

fn implementer_agent() -> Agent {
    Agent::new(
        "implementer-1",
        "Implementation Agent Beta",
        AgentType::Implementer,
    )
    .with_capabilities(["coding", "testing", "deployment", "debugging"])
    .with_metadata("specialty", json!("full-stack"))
    .with_metadata("languages", json!(["typescript", "python", "go"]))
}

fn analyst_agent() -> Agent {
    Agent::new("analyst-1", "Analysis Agent Gamma", AgentType::Analyst)
        .with_capabilities(["data-analysis", "reporting", "visualization", "insights"])
        .with_metadata("specialty", json!("business-intelligence"))
}

fn validator_agent() -> Agent {
    Agent::new("validator-1", "Validation Agent Delta", AgentType::Validator)
        .with_capabilities(["quality-assurance", "testing", "review", "compliance"])
        .with_metadata("specialty", json!("security-testing"))
        .with_metadata("certifications", json!(["iso-27001", "soc2"]))
}

fn supervisor_agent() -> Agent {
    Agent::new("supervisor-1", "Supervisor Agent Omega", AgentType::Supervisor)
        .with_capabilities(["coordination", "monitoring", "escalation", "decision-making"])
        .with_metadata("authority", json!("high"))
        .with_metadata("scope", json!("system-wide"))
}
