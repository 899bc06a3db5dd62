//! Iterative Research Loop (C7): an open-ended, round-bounded loop where
//! the orchestrator model repeatedly delegates to specialists until it
//! either declares completion or the round budget runs out.

use crate::error::Result;
use crate::types::{Message, ModelTurn};

/// Hard default round cap; overridden by `AppConfig::max_research_rounds`.
pub const DEFAULT_MAX_ROUNDS: usize = 12;

const SENTINEL_MIN_LEN: usize = 100;
const SYNTHESIS_MIN_LEN: usize = 200;
const SUBSTANTIAL_MIN_LEN: usize = 50;

const COMPLETION_SENTINELS: &[&str] = &[
    "final research findings:",
    "research complete:",
    "final answer:",
    "conclusion:",
    "in summary of all findings",
];

const SYNTHESIS_INDICATORS: &[&str] =
    &["based on", "in summary", "findings show", "analysis reveals"];

/// A candidate specialist available to the loop, with the keywords used to
/// filter it against the research objective.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Filter the raw, comma-separated candidate list down to agents that both
/// exist in the registry and plausibly match the objective.
pub fn filter_candidates(
    requested_names: &[String],
    registry: &crate::registry::AgentRegistry,
    objective: &str,
) -> Vec<Candidate> {
    let objective_lower = objective.to_lowercase();
    requested_names
        .iter()
        .filter_map(|name| registry.get(name.trim()))
        .filter(|entry| {
            entry.keywords.is_empty()
                || entry
                    .keywords
                    .iter()
                    .any(|k| objective_lower.contains(&k.to_lowercase()))
        })
        .map(|entry| Candidate {
            name: entry.name().to_string(),
            keywords: entry.keywords.clone(),
        })
        .collect()
}

/// Mutable state for one research session. Owned by the task driving the
/// loop; never shared across turns.
pub struct ResearchState {
    pub objective: String,
    pub candidates: Vec<Candidate>,
    pub history: Vec<Message>,
    pub round: usize,
    pub max_rounds: usize,
}

impl ResearchState {
    pub fn new(objective: impl Into<String>, candidates: Vec<Candidate>, max_rounds: usize) -> Self {
        let objective = objective.into();
        let seed = Message::user(format!(
            "Research objective: {objective}\n\nPlan and execute step-by-step using \
             delegate(agent, task) calls. When you have enough to answer, say so explicitly."
        ));
        Self {
            objective,
            candidates,
            history: vec![seed],
            round: 0,
            max_rounds,
        }
    }
}

fn contains_sentinel(text: &str) -> bool {
    if text.len() < SENTINEL_MIN_LEN {
        return false;
    }
    let lower = text.to_lowercase();
    COMPLETION_SENTINELS.iter().any(|s| lower.contains(s))
}

fn looks_like_synthesis(text: &str) -> bool {
    if text.len() <= SYNTHESIS_MIN_LEN {
        return false;
    }
    let lower = text.to_lowercase();
    SYNTHESIS_INDICATORS.iter().any(|s| lower.contains(s))
}

fn nudge_message() -> Message {
    Message::user(
        "What's your next step? Delegate to a specialist with delegate(agent, task), or state \
         your conclusion if you have enough information.",
    )
}

/// Builds the final "budget exhausted" answer from the last three
/// substantial (>50 char) assistant messages, oldest first.
fn budget_exhausted_answer(history: &[Message]) -> String {
    let substantial: Vec<&Message> = history
        .iter()
        .filter(|m| m.role == crate::types::MessageRole::Assistant && m.content.len() > SUBSTANTIAL_MIN_LEN)
        .collect();

    let last_three: Vec<&&Message> = substantial.iter().rev().take(3).collect();
    let mut ordered: Vec<String> = last_three
        .into_iter()
        .rev()
        .map(|m| m.prefixed_content())
        .collect();

    if ordered.is_empty() {
        ordered.push("no findings were accumulated".to_string());
    }

    format!(
        "Research reached maximum iterations without an explicit conclusion.\n\n{}",
        ordered.join("\n\n")
    )
}

/// Model call abstraction: `orchestrator::run_agent_turn` implements this
/// against the real HTTP client; tests supply a scripted stand-in.
#[async_trait::async_trait]
pub trait ResearchModel: Send + Sync {
    async fn next_action(&self, history: &[Message], candidates: &[Candidate]) -> Result<ModelTurn>;
}

/// Delegation abstraction over C3, keeping this module decoupled from
/// `transport`'s HTTP types.
#[async_trait::async_trait]
pub trait Delegate: Send + Sync {
    async fn call(&self, agent: &str, task: &str) -> Result<String>;
}

/// Drive the main loop to completion, returning the final answer text.
/// Cancellation is honored by the caller wrapping this future and dropping
/// it between rounds; there is no internal polling beyond the round cap.
pub async fn run(
    state: &mut ResearchState,
    model: &dyn ResearchModel,
    delegate: &dyn Delegate,
) -> Result<String> {
    while state.round < state.max_rounds {
        state.round += 1;

        let turn = model.next_action(&state.history, &state.candidates).await?;

        match turn {
            ModelTurn::FunctionCall { name, arguments } => {
                let agent = arguments
                    .get("agent")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let task = arguments
                    .get("task")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();

                state.history.push(Message::assistant(format!(
                    "{name}({{\"agent\":\"{agent}\",\"task\":\"{task}\"}})"
                )));

                let result = delegate.call(&agent, &task).await;
                let tool_text = match result {
                    Ok(text) => text,
                    Err(e) => format!("Error delegating to {agent}: {}", e.user_safe_message()),
                };
                state.history.push(Message::from_agent(agent, tool_text));
            }
            ModelTurn::Text(text) => {
                if contains_sentinel(&text) {
                    return Ok(text);
                }
                if looks_like_synthesis(&text) {
                    return Ok(text);
                }
                state.history.push(Message::assistant(text));
                state.history.push(nudge_message());
            }
        }
    }

    Ok(budget_exhausted_answer(&state.history))
}
