//! Response Synthesis (C8): combining one or more specialist/coordinator
//! responses into the single reply returned to the user.
//!
//! Grounded in the Python `_synthesize_responses` / `_llm_synthesize_responses`
//! / `_fallback_synthesis` trio: an ordered selection cascade, falling back
//! to verbatim concatenation when the model call itself cannot be trusted.

use crate::types::Message;
use std::collections::HashSet;

const COORDINATOR_NAME: &str = "Coordinator";
const VERBATIM_MIN_LEN: usize = 80;
const FALLBACK_MIN_BODY_LEN: usize = 10;

const SYNTHESIS_INDICATORS: &[&str] = crate::termination::SYNTHESIS_INDICATORS;

const DEFERRAL_KEYWORDS: &[&str] = &[
    "specialist",
    "defer",
    "better suited",
    "route this",
    "more appropriate",
];

/// One contribution to be synthesized: `agent_name` is `None` for the
/// Coordinator's own voice.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub agent_name: Option<String>,
    pub content: String,
}

impl Contribution {
    pub fn coordinator(content: impl Into<String>) -> Self {
        Self {
            agent_name: None,
            content: content.into(),
        }
    }

    pub fn specialist(agent_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            agent_name: Some(agent_name.into()),
            content: content.into(),
        }
    }

    fn name(&self) -> &str {
        self.agent_name.as_deref().unwrap_or(COORDINATOR_NAME)
    }
}

/// Drop later contributions from an agent already seen, keeping the first
/// (matched on the name before any formatting).
fn dedup_by_agent(contributions: Vec<Contribution>) -> Vec<Contribution> {
    let mut seen = HashSet::new();
    contributions
        .into_iter()
        .filter(|c| seen.insert(c.name().to_string()))
        .collect()
}

fn is_synthesis_like(text: &str) -> bool {
    let lower = text.to_lowercase();
    SYNTHESIS_INDICATORS.iter().any(|i| lower.contains(i))
}

/// What [`select`] decided, before any model call is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Use this text verbatim; no model call needed.
    Verbatim(String),
    /// Needs an LLM synthesis call over these (already-deduped) contributions.
    NeedsSynthesis,
}

/// Apply the ordered selection cascade to deduped contributions.
/// Returns `Verbatim` when a rule resolves without a model call.
pub fn select(contributions: &[Contribution]) -> Selection {
    if contributions.is_empty() {
        return Selection::Verbatim("No response generated".to_string());
    }

    let coordinator = contributions.iter().find(|c| c.agent_name.is_none());
    let specialists: Vec<&Contribution> =
        contributions.iter().filter(|c| c.agent_name.is_some()).collect();
    let unique_specialists: HashSet<&str> =
        specialists.iter().map(|c| c.name()).collect();

    if let Some(coord) = coordinator {
        let long_and_synthesizing =
            coord.content.len() > VERBATIM_MIN_LEN && is_synthesis_like(&coord.content);
        if long_and_synthesizing || unique_specialists.is_empty() {
            return Selection::Verbatim(coord.content.clone());
        }
    }

    if specialists.is_empty() {
        if let Some(coord) = coordinator {
            return Selection::Verbatim(coord.content.clone());
        }
    }

    if coordinator.is_none() && unique_specialists.len() == 1 {
        let only = specialists[0];
        return Selection::Verbatim(only.content.clone());
    }

    Selection::NeedsSynthesis
}

/// Concatenation fallback used when the LLM synthesis call itself fails.
/// Coordinator text is included only when it isn't just a deferral; each
/// specialist body is included only when its stripped content exceeds
/// [`FALLBACK_MIN_BODY_LEN`].
pub fn fallback_synthesis(contributions: &[Contribution]) -> String {
    let mut parts = Vec::new();

    for c in contributions {
        let trimmed = c.content.trim();
        match &c.agent_name {
            None => {
                let lower = trimmed.to_lowercase();
                let is_deferral = DEFERRAL_KEYWORDS.iter().any(|k| lower.contains(k));
                if !is_deferral && !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
            Some(name) => {
                if trimmed.len() > FALLBACK_MIN_BODY_LEN {
                    parts.push(format!("{name}: {trimmed}"));
                }
            }
        }
    }

    if parts.is_empty() {
        "No response generated".to_string()
    } else {
        parts.join("\n\n")
    }
}

/// Build the prompt handed to the synthesis model call. The model must not
/// name individual agents in its reply.
pub fn build_synthesis_prompt(contributions: &[Contribution]) -> String {
    let mut body = String::from(
        "Combine the following specialist findings into a single, coherent answer for the \
         user. Do not mention the specialists by name or describe who produced which part.\n\n",
    );
    for c in contributions {
        body.push_str(&format!("{}: {}\n\n", c.name(), c.content.trim()));
    }
    body
}

pub const SYNTHESIS_MAX_TOKENS: u32 = 1500;
pub const SYNTHESIS_TEMPERATURE: f32 = 0.3;

/// Full entry point: dedup, select, and return either a verbatim answer or
/// a prompt to run through the model (caller drives the actual call and
/// falls back to [`fallback_synthesis`] on failure).
pub fn synthesize(contributions: Vec<Contribution>) -> (Vec<Contribution>, Selection) {
    let deduped = dedup_by_agent(contributions);
    let selection = select(&deduped);
    (deduped, selection)
}

pub fn messages_to_contributions(messages: &[Message]) -> Vec<Contribution> {
    messages
        .iter()
        .filter(|m| m.role == crate::types::MessageRole::Assistant)
        .map(|m| match &m.agent_name {
            Some(name) => Contribution::specialist(name.clone(), m.content.clone()),
            None => Contribution::coordinator(m.content.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_contributions_yields_default_message() {
        assert_eq!(
            select(&[]),
            Selection::Verbatim("No response generated".to_string())
        );
    }

    #[test]
    fn long_synthesizing_coordinator_wins_verbatim() {
        let contributions = vec![
            Contribution::coordinator(
                "Based on the data shows that overall spend increased significantly across all regions this quarter.",
            ),
            Contribution::specialist("ADXAgent", "raw numbers here"),
        ];
        assert_eq!(
            select(&contributions),
            Selection::Verbatim(contributions[0].content.clone())
        );
    }

    #[test]
    fn coordinator_only_with_no_specialists_is_verbatim() {
        let contributions = vec![Contribution::coordinator("Sure, here's the answer: 42.")];
        assert_eq!(
            select(&contributions),
            Selection::Verbatim("Sure, here's the answer: 42.".to_string())
        );
    }

    #[test]
    fn exactly_one_specialist_no_coordinator_is_verbatim() {
        let contributions = vec![Contribution::specialist("ADXAgent", "there are 3 databases")];
        assert_eq!(
            select(&contributions),
            Selection::Verbatim("there are 3 databases".to_string())
        );
    }

    #[test]
    fn multiple_specialists_need_synthesis() {
        let contributions = vec![
            Contribution::specialist("ADXAgent", "3 databases found"),
            Contribution::specialist("DocumentAgent", "2 documents found"),
        ];
        assert_eq!(select(&contributions), Selection::NeedsSynthesis);
    }

    #[test]
    fn dedup_keeps_first_response_per_agent() {
        let contributions = vec![
            Contribution::specialist("ADXAgent", "first"),
            Contribution::specialist("ADXAgent", "second"),
        ];
        let deduped = dedup_by_agent(contributions);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].content, "first");
    }

    #[test]
    fn fallback_excludes_deferral_only_coordinator_text() {
        let contributions = vec![
            Contribution::coordinator("I'll let the specialist handle this, better suited for it."),
            Contribution::specialist("ADXAgent", "3 databases found in the cluster"),
        ];
        let result = fallback_synthesis(&contributions);
        assert!(!result.contains("better suited"));
        assert!(result.contains("ADXAgent: 3 databases found in the cluster"));
    }

    #[test]
    fn fallback_excludes_specialist_bodies_under_threshold() {
        let contributions = vec![
            Contribution::specialist("ADXAgent", "ok"),
            Contribution::specialist("DocumentAgent", "found 5 relevant documents in the archive"),
        ];
        let result = fallback_synthesis(&contributions);
        assert!(!result.contains("ADXAgent: ok"));
        assert!(result.contains("DocumentAgent: found 5 relevant documents in the archive"));
    }

    #[test]
    fn fallback_with_nothing_substantial_yields_default() {
        let contributions = vec![Contribution::specialist("ADXAgent", "ok")];
        assert_eq!(fallback_synthesis(&contributions), "No response generated");
    }

    #[test]
    fn synthesis_prompt_never_instructs_naming_but_lists_agents_internally() {
        let contributions = vec![Contribution::specialist("ADXAgent", "3 databases")];
        let prompt = build_synthesis_prompt(&contributions);
        assert!(prompt.contains("Do not mention the specialists by name"));
    }
}
