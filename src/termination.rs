//! Termination & Synthesis strategy, termination half (C5).
//!
//! Decides, after each agent turn in a multi-agent conversation, whether
//! the conversation is COMPLETE or should CONTINUE — combining a hard
//! iteration cap, phrase-based heuristics, and a model-assisted decision.

use crate::types::{Message, MessageRole};

/// Iterations beyond which the loop terminates unconditionally, regardless
/// of what the model or heuristics say. Fixed at 8 (Open Questions decision,
/// not the 8-12 range the distilled phrasing left open).
pub const MAX_ITERATIONS: usize = 8;

/// Phrases indicating the responder is about to delegate or consult rather
/// than answer directly.
pub const COORDINATION_PHRASES: &[&str] = &[
    "let me",
    "i'll",
    "i will",
    "need to",
    "going to",
    "will check",
    "will look",
    "will find",
    "will get",
    "will search",
    "will retrieve",
    "will query",
    "will calculate",
    "checking with",
    "consulting",
    "asking",
    "delegating",
];

/// Phrases indicating work is underway but not yet resolved.
pub const WORK_IN_PROGRESS_INDICATORS: &[&str] = &[
    "retrieving",
    "calculating",
    "waiting for",
    "processing",
    "looking up",
    "searching for",
    "gathering",
    "fetching",
];

/// Phrases indicating the response is drawing a conclusion from gathered
/// material rather than still gathering it.
pub const SYNTHESIS_INDICATORS: &[&str] = &[
    "based on",
    "according to",
    "the data shows",
    "the analysis",
    "the calculation",
    "the query",
    "the search",
    "the results",
    "combining",
    "together",
    "overall",
    "in summary",
    "to summarize",
    "from the",
    "using the",
    "with the",
];

/// Outcome of a termination check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Complete,
    Continue,
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

fn mentions_any_name(haystack: &str, names: &[String]) -> bool {
    let lower = haystack.to_lowercase();
    names.iter().any(|n| !n.is_empty() && lower.contains(&n.to_lowercase()))
}

/// Cheap phrase-based pre-check, applied before any model call.
///
/// Every branch here is a *continue* shortcut: a heuristic can never
/// decide a conversation is complete, only that it obviously isn't — the
/// only paths to `Decision::Complete` are the safety cap and the
/// model-assisted judge in [`decide`]. `specialist_names` and
/// `specialists_have_output` carry the context this function otherwise
/// couldn't derive from `latest` alone.
pub fn heuristic_decision(
    latest: &str,
    specialist_names: &[String],
    specialists_have_output: bool,
) -> Option<Decision> {
    let has_synthesis = contains_any(latest, SYNTHESIS_INDICATORS);
    let has_in_progress = contains_any(latest, WORK_IN_PROGRESS_INDICATORS);
    let has_coordination = contains_any(latest, COORDINATION_PHRASES);
    let mentions_specialist = mentions_any_name(latest, specialist_names);

    if has_in_progress && !has_synthesis {
        return Some(Decision::Continue);
    }
    if (has_coordination || mentions_specialist) && !has_synthesis {
        return Some(Decision::Continue);
    }
    if latest.trim().chars().count() < 80 {
        return Some(Decision::Continue);
    }
    if specialists_have_output && !has_synthesis && !mentions_specialist {
        return Some(Decision::Continue);
    }
    None
}

/// A function capable of asking the model whether the conversation is
/// complete. Implemented by `orchestrator::ask_model_is_complete`; kept as
/// a trait object here so termination logic stays independent of the HTTP
/// client used to reach the model.
#[async_trait::async_trait]
pub trait CompletionJudge: Send + Sync {
    async fn is_complete(&self, history: &[Message]) -> crate::error::Result<bool>;
}

/// Full termination check for iteration `iteration` (1-based) against
/// `history`. The safety cap always wins; heuristics short-circuit the
/// model call when decisive; otherwise the judge is consulted.
///
/// Preconditions the most-recent-message lookup enforces: specialists
/// never end a conversation, so a message attributed to one (via
/// `Message::from_agent`, `agent_name: Some(_)`) never satisfies this
/// check even though it carries `role: Assistant` — only a genuine
/// Coordinator turn (`agent_name: None`) can.
pub async fn decide(
    iteration: usize,
    history: &[Message],
    specialist_names: &[String],
    judge: &dyn CompletionJudge,
) -> crate::error::Result<Decision> {
    if iteration >= MAX_ITERATIONS {
        return Ok(Decision::Complete);
    }

    let Some(latest) = history
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::Assistant && m.agent_name.is_none())
    else {
        return Ok(Decision::Continue);
    };

    let specialists_have_output = history
        .iter()
        .any(|m| m.role == MessageRole::Assistant && m.agent_name.is_some());

    if let Some(decision) = heuristic_decision(&latest.content, specialist_names, specialists_have_output) {
        return Ok(decision);
    }

    let complete = judge.is_complete(history).await?;
    Ok(if complete {
        Decision::Complete
    } else {
        Decision::Continue
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    struct AlwaysComplete;
    #[async_trait::async_trait]
    impl CompletionJudge for AlwaysComplete {
        async fn is_complete(&self, _history: &[Message]) -> crate::error::Result<bool> {
            Ok(true)
        }
    }

    struct AlwaysContinue;
    #[async_trait::async_trait]
    impl CompletionJudge for AlwaysContinue {
        async fn is_complete(&self, _history: &[Message]) -> crate::error::Result<bool> {
            Ok(false)
        }
    }

    fn no_specialists() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn work_in_progress_without_synthesis_continues() {
        assert_eq!(
            heuristic_decision("Retrieving the latest figures now, still working", &no_specialists(), false),
            Some(Decision::Continue)
        );
    }

    #[test]
    fn coordination_phrase_without_synthesis_continues() {
        assert_eq!(
            heuristic_decision("Let me check with the billing agent about this one", &no_specialists(), false),
            Some(Decision::Continue)
        );
    }

    #[test]
    fn heuristics_never_return_complete() {
        // Even a long, synthesis-flavored, specialist-referencing message is
        // only ever a non-opinion (falls through to the judge) — the
        // heuristic layer itself never ends the conversation.
        let names = vec!["ADXAgent".to_string()];
        let text = "Based on the data shows from ADXAgent, the overall totals are now final \
                    and every figure has been reconciled across all regions this quarter.";
        assert_eq!(heuristic_decision(text, &names, true), None);
    }

    #[test]
    fn short_message_continues_regardless_of_content() {
        assert_eq!(
            heuristic_decision("Based on the data shows it.", &no_specialists(), false),
            Some(Decision::Continue)
        );
    }

    #[test]
    fn specialist_output_not_referenced_continues() {
        let names = vec!["ADXAgent".to_string()];
        let text = "Thank you all for the help today, this has been quite useful for my planning going forward for next week.";
        assert_eq!(
            heuristic_decision(text, &names, true),
            Some(Decision::Continue)
        );
    }

    #[test]
    fn specialist_output_referenced_by_name_has_no_heuristic_opinion() {
        let names = vec!["ADXAgent".to_string()];
        let text = "ADXAgent found three matching databases across the entire cluster for this particular request today.";
        assert_eq!(heuristic_decision(text, &names, true), None);
    }

    #[test]
    fn neutral_text_has_no_heuristic_opinion() {
        assert_eq!(
            heuristic_decision(
                "The sky is a particularly deep shade of blue again this afternoon, or so it seems to me.",
                &no_specialists(),
                false
            ),
            None
        );
    }

    #[tokio::test]
    async fn safety_cap_forces_complete_regardless_of_judge() {
        let history = vec![Message::assistant("still working on it")];
        let decision = decide(MAX_ITERATIONS, &history, &no_specialists(), &AlwaysContinue)
            .await
            .unwrap();
        assert_eq!(decision, Decision::Complete);
    }

    #[tokio::test]
    async fn decisive_heuristic_skips_judge_entirely() {
        let history = vec![Message::assistant("still retrieving the final figures now")];
        // AlwaysComplete would say Complete if consulted; the work-in-progress
        // heuristic must win with Continue first.
        let decision = decide(1, &history, &no_specialists(), &AlwaysComplete).await.unwrap();
        assert_eq!(decision, Decision::Continue);
    }

    #[tokio::test]
    async fn ambiguous_text_falls_through_to_judge() {
        let history = vec![Message::assistant(
            "The sky is a particularly deep shade of blue again this afternoon, or so it seems to me.",
        )];
        let decision = decide(1, &history, &no_specialists(), &AlwaysComplete).await.unwrap();
        assert_eq!(decision, Decision::Complete);

        let decision = decide(1, &history, &no_specialists(), &AlwaysContinue).await.unwrap();
        assert_eq!(decision, Decision::Continue);
    }

    #[tokio::test]
    async fn no_assistant_message_yet_continues_without_consulting_judge() {
        let history = vec![Message::user("hello")];
        let decision = decide(1, &history, &no_specialists(), &AlwaysComplete).await.unwrap();
        assert_eq!(decision, Decision::Continue);
    }

    #[tokio::test]
    async fn specialist_turn_is_never_mistaken_for_the_coordinators() {
        // A specialist's own turn carries role: Assistant but agent_name:
        // Some(_); it must not satisfy the "most recent Coordinator message"
        // precondition even though it is the most recent Assistant-role entry.
        let history = vec![
            Message::user("investigate the outage"),
            Message::from_agent(
                "ADXAgent",
                "Based on the data shows everything is nominal across the whole cluster today.",
            ),
        ];
        let decision = decide(1, &history, &no_specialists(), &AlwaysComplete).await.unwrap();
        assert_eq!(decision, Decision::Continue);
    }
}
