//! The orchestrator model client: every routing decision, research step,
//! termination check, and synthesis call in this crate funnels through one
//! `chat/completions`-shaped HTTP call, wrapped by C1.

use crate::activity::{ActivityBus, AgentActivityEvent};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::registry::AgentRegistry;
use crate::research::{Candidate, Delegate, ResearchModel};
use crate::resilience::ResilientCaller;
use crate::routing::{Action, ActionPlanner, Coordinator};
use crate::synthesis::{self, Contribution, Selection};
use crate::termination::CompletionJudge;
use crate::tokens::{self, TokenAccountant};
use crate::transport::{ClientCache, RequestContext, StreamEvent};
use crate::types::{Message, MessageRole, ModelTurn, OpenAIMessage, OpenAIRequest, OpenAIToolDef};
use crate::utils::{collect_turn, extract_json_loosely, parse_sse_stream};
use std::sync::Arc;

fn delegate_tool() -> OpenAIToolDef {
    OpenAIToolDef {
        kind: "function".to_string(),
        function: crate::types::OpenAIFunctionDef {
            name: "delegate".to_string(),
            description: "Delegate a task to one named specialist agent.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "agent": {"type": "string"},
                    "task": {"type": "string"}
                },
                "required": ["agent", "task"]
            }),
        },
    }
}

fn collaborate_tool() -> OpenAIToolDef {
    OpenAIToolDef {
        kind: "function".to_string(),
        function: crate::types::OpenAIFunctionDef {
            name: "collaborate".to_string(),
            description: "Run a fixed sequence of specialists on one task.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string"},
                    "agents": {"type": "string", "description": "comma- or arrow-separated agent names"}
                },
                "required": ["task", "agents"]
            }),
        },
    }
}

fn research_tool() -> OpenAIToolDef {
    OpenAIToolDef {
        kind: "function".to_string(),
        function: crate::types::OpenAIFunctionDef {
            name: "research".to_string(),
            description: "Open an iterative research session over candidate specialists."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "objective": {"type": "string"},
                    "agents": {"type": "string", "description": "comma-separated candidate agent names"}
                },
                "required": ["objective", "agents"]
            }),
        },
    }
}

/// Client for the single out-of-scope model provider, resilience-wrapped.
/// Implements every model-facing trait the runtime needs
/// ([`ActionPlanner`], [`ResearchModel`], [`CompletionJudge`]) so callers
/// can wire one value into C6/C7/C5.
pub struct OrchestratorClient {
    http: reqwest::Client,
    caller: Arc<ResilientCaller>,
    accountant: Arc<TokenAccountant>,
    base_url: String,
    api_key: String,
    model: String,
    agent_max_tokens: usize,
}

impl OrchestratorClient {
    pub fn new(config: &AppConfig, accountant: Arc<TokenAccountant>) -> Self {
        let caller = ResilientCaller::shared(config, accountant.clone());
        Self {
            http: reqwest::Client::new(),
            caller,
            accountant,
            base_url: config.model_endpoint.clone(),
            api_key: config.model_api_key.clone(),
            model: config.model_deployment_name.clone(),
            agent_max_tokens: config.agent_max_tokens,
        }
    }

    /// Trim `history` to this deployment's C2 budget before it goes into an
    /// outbound message list, logging the pre-call risk assessment whenever
    /// trimming actually happened.
    fn prepare_history(&self, history: &[Message]) -> Vec<Message> {
        let optimized = tokens::optimize_history(history, self.agent_max_tokens);
        if optimized.truncated {
            let risk = self
                .accountant
                .risk_assessment(tokens::estimate_list_tokens(&optimized.messages));
            tracing::warn!(
                level = ?risk.level,
                reasons = ?risk.reasons,
                budget = self.agent_max_tokens,
                "history truncated to fit token budget before model call"
            );
        }
        optimized.messages
    }

    async fn call(
        &self,
        context_label: &str,
        messages: Vec<OpenAIMessage>,
        tools: Option<Vec<OpenAIToolDef>>,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<ModelTurn> {
        let estimated: usize = messages
            .iter()
            .map(|m| tokens::estimate_text_tokens(m.content.as_deref().unwrap_or_default()))
            .sum();

        let url = format!("{}/chat/completions", self.base_url);
        let model = self.model.clone();
        let api_key = self.api_key.clone();
        let http = self.http.clone();

        self.caller
            .execute(context_label, estimated, move || {
                let http = http.clone();
                let url = url.clone();
                let model = model.clone();
                let api_key = api_key.clone();
                let messages = messages.clone();
                let tools = tools.clone();
                async move {
                    let request = OpenAIRequest {
                        model,
                        messages,
                        tools,
                        temperature: Some(temperature),
                        max_tokens,
                        stream: true,
                    };

                    let response = http
                        .post(&url)
                        .header("Authorization", format!("Bearer {api_key}"))
                        .header("Content-Type", "application/json")
                        .json(&request)
                        .send()
                        .await
                        .map_err(|e| Error::upstream_unavailable(e.to_string()))?;

                    if !response.status().is_success() {
                        let status = response.status();
                        return Err(Error::upstream_unavailable(format!(
                            "model endpoint returned HTTP {status}"
                        )));
                    }

                    collect_turn(parse_sse_stream(response)).await
                }
            })
            .await
    }

    /// Ask whether the conversation is COMPLETE or should CONTINUE (C5's
    /// model-assisted fallback once heuristics are ambiguous).
    async fn judge_completion(&self, history: &[Message]) -> Result<bool> {
        let mut messages = vec![OpenAIMessage {
            role: "system".to_string(),
            content: Some(
                "Read the conversation so far. Reply with exactly one word: COMPLETE if the \
                 task has been fully answered, or CONTINUE if more work remains."
                    .to_string(),
            ),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }];
        messages.extend(self.prepare_history(history).iter().map(message_to_openai));

        let turn = self.call("termination", messages, None, 0.0, Some(8)).await?;
        match turn {
            ModelTurn::Text(text) => Ok(text.to_uppercase().contains("COMPLETE")),
            ModelTurn::FunctionCall { .. } => Ok(false),
        }
    }

    /// Run C8's LLM synthesis call, falling back to concatenation if the
    /// call fails or returns an implausibly short answer.
    pub async fn synthesize(&self, contributions: Vec<Contribution>) -> String {
        let (deduped, selection) = synthesis::synthesize(contributions);
        match selection {
            Selection::Verbatim(text) => text,
            Selection::NeedsSynthesis => {
                let prompt = synthesis::build_synthesis_prompt(&deduped);
                let messages = vec![OpenAIMessage {
                    role: "user".to_string(),
                    content: Some(prompt),
                    tool_calls: None,
                    tool_call_id: None,
                    name: None,
                }];

                let result = self
                    .call(
                        "synthesis",
                        messages,
                        None,
                        synthesis::SYNTHESIS_TEMPERATURE,
                        Some(synthesis::SYNTHESIS_MAX_TOKENS),
                    )
                    .await;

                match result {
                    Ok(ModelTurn::Text(text)) if text.trim().len() >= 20 => text,
                    _ => synthesis::fallback_synthesis(&deduped),
                }
            }
        }
    }
}

fn message_to_openai(msg: &Message) -> OpenAIMessage {
    OpenAIMessage {
        role: match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
        .to_string(),
        content: Some(msg.prefixed_content()),
        tool_calls: None,
        tool_call_id: None,
        name: msg.agent_name.clone(),
    }
}

#[async_trait::async_trait]
impl ActionPlanner for OrchestratorClient {
    async fn plan(&self, message: &str, registry_description: &str) -> Result<Action> {
        let system = format!(
            "You are the routing coordinator. Available specialists:\n{registry_description}\n\n\
             Pick exactly one action: answer directly, or call delegate/collaborate/research."
        );
        let messages = vec![
            OpenAIMessage {
                role: "system".to_string(),
                content: Some(system),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            OpenAIMessage {
                role: "user".to_string(),
                content: Some(message.to_string()),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
        ];

        let tools = vec![delegate_tool(), collaborate_tool(), research_tool()];
        let turn = self.call("routing", messages, Some(tools), 0.2, Some(1024)).await?;

        match turn {
            ModelTurn::Text(text) => Ok(Action::DirectAnswer(text)),
            ModelTurn::FunctionCall { name, arguments } => parse_action(&name, &arguments),
        }
    }
}

fn parse_action(name: &str, arguments: &serde_json::Value) -> Result<Action> {
    let get = |key: &str| -> String {
        arguments.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string()
    };

    match name {
        "delegate" => Ok(Action::Delegate {
            agent: get("agent"),
            task: get("task"),
        }),
        "collaborate" => Ok(Action::Collaborate {
            task: get("task"),
            agents: crate::routing::parse_agent_list(&get("agents")),
        }),
        "research" => Ok(Action::Research {
            objective: get("objective"),
            agents: crate::routing::parse_agent_list(&get("agents")),
        }),
        other => Err(Error::parse(format!("model selected unknown action {other}"))),
    }
}

#[async_trait::async_trait]
impl ResearchModel for OrchestratorClient {
    async fn next_action(&self, history: &[Message], candidates: &[Candidate]) -> Result<ModelTurn> {
        let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
        let system = format!(
            "You are conducting iterative research. Available specialists for delegation: {}.\n\
             Call delegate(agent, task) to gather information, or respond with your conclusion \
             prefixed with \"FINAL RESEARCH FINDINGS:\" once you have enough.",
            names.join(", ")
        );
        let mut messages = vec![OpenAIMessage {
            role: "system".to_string(),
            content: Some(system),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }];
        messages.extend(self.prepare_history(history).iter().map(message_to_openai));

        self.call("research", messages, Some(vec![delegate_tool()]), 0.4, Some(2048))
            .await
    }
}

#[async_trait::async_trait]
impl CompletionJudge for OrchestratorClient {
    async fn is_complete(&self, history: &[Message]) -> Result<bool> {
        self.judge_completion(history).await
    }
}

/// The Coordinator's own voice in a fixed-sequence collaboration: reviews
/// the conversation after each specialist turn and produces a short
/// acknowledgment, follow-up, or synthesis — never offered any tools,
/// since C6's collaboration loop, not the model, decides when the
/// sequence ends.
#[async_trait::async_trait]
impl Coordinator for OrchestratorClient {
    async fn next_message(&self, history: &[Message]) -> Result<String> {
        let system = OpenAIMessage {
            role: "system".to_string(),
            content: Some(
                "You are the coordinator overseeing a fixed sequence of specialist turns. \
                 After each specialist's contribution, briefly acknowledge what it found, ask \
                 for anything still missing, or summarize once the answer is complete. Keep it \
                 to a few sentences and do not call any tools."
                    .to_string(),
            ),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        };
        let mut messages = vec![system];
        messages.extend(self.prepare_history(history).iter().map(message_to_openai));

        let turn = self.call("collaboration", messages, None, 0.3, Some(512)).await?;
        match turn {
            ModelTurn::Text(text) => Ok(text),
            ModelTurn::FunctionCall { .. } => Ok(String::new()),
        }
    }
}

/// Delegation to remote specialists over C3, accounted for by C2,
/// resilience-wrapped by C1 just like model calls, and observed by
/// whichever SSE listener is subscribed to this turn's session.
///
/// Remote clients are cached per delegated credential (falling back to a
/// single shared entry for plain requests) rather than built fresh per
/// call, so a turn carrying a forwarded token doesn't pay connection setup
/// on every specialist hop.
pub struct RegistryDelegate {
    registry: Arc<AgentRegistry>,
    client_cache: Arc<ClientCache>,
    caller: Arc<ResilientCaller>,
    ctx: RequestContext,
    activity: Arc<ActivityBus>,
}

const SHARED_CLIENT_KEY: &str = "__shared__";

impl RegistryDelegate {
    pub fn new(
        registry: Arc<AgentRegistry>,
        client_cache: Arc<ClientCache>,
        caller: Arc<ResilientCaller>,
        ctx: RequestContext,
        activity: Arc<ActivityBus>,
    ) -> Self {
        Self {
            registry,
            client_cache,
            caller,
            ctx,
            activity,
        }
    }

    fn publish(&self, agent: &str, action: &'static str, details: Option<String>) {
        if let Some(session_id) = &self.ctx.session_id {
            self.activity.publish(AgentActivityEvent {
                session_id: session_id.clone(),
                agent_name: agent.to_string(),
                action,
                details,
            });
        }
    }
}

#[async_trait::async_trait]
impl Delegate for RegistryDelegate {
    async fn call(&self, agent: &str, task: &str) -> Result<String> {
        let entry = self
            .registry
            .get(agent)
            .ok_or_else(|| Error::bad_request(format!("unknown agent: {agent}")))?;

        let estimated = tokens::estimate_text_tokens(task);
        let card = entry.card.clone();
        let task = task.to_string();
        let ctx = self.ctx.clone();
        let client_key = ctx.delegated_credential.clone().unwrap_or_else(|| SHARED_CLIENT_KEY.to_string());
        let client = self.client_cache.get_or_create(&client_key).await;

        self.publish(agent, "delegating", None);

        let result = self
            .caller
            .execute(agent, estimated, move || {
                let client = client.clone();
                let card = card.clone();
                let task = task.clone();
                let ctx = ctx.clone();
                async move {
                    let events = crate::transport::send_message_streaming(&client, &card, &task, None, &ctx).await?;
                    events
                        .into_iter()
                        .rev()
                        .find_map(|event| match event {
                            StreamEvent::End(content) => Some(content),
                            _ => None,
                        })
                        .ok_or_else(|| Error::parse(format!("{} stream ended without a content event", card.name)))
                }
            })
            .await;

        match &result {
            Ok(_) => self.publish(agent, "completed", None),
            Err(e) => self.publish(agent, "failed", Some(e.user_safe_message())),
        }

        result
    }
}

/// Extract a loosely-formatted JSON action payload from model narration
/// that didn't come back as a clean function call (some providers echo
/// JSON in prose despite being asked for structured output).
pub fn recover_action_from_text(text: &str) -> Option<Action> {
    let value = extract_json_loosely(text)?;
    let name = value.get("action").and_then(|v| v.as_str())?;
    parse_action(name, &value).ok()
}
