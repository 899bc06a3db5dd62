//! Public HTTP API, served by `axum`.
//!
//! Binds the routing host to the five documented endpoints: `/ask`,
//! `/chat/completions`, `/sse/agent-activity/{sessionId}`, and the
//! liveness trio `/status`, `/health`, `/ping`.

use crate::activity::ActivityBus;
use crate::config::AppConfig;
use crate::registry::AgentRegistry;
use crate::research::{Delegate, ResearchModel};
use crate::resilience::ResilientCaller;
use crate::routing::{self, ActionPlanner, Coordinator};
use crate::termination::CompletionJudge;
use crate::transport::{ClientCache, RequestContext};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const AGENT_ACTIVITY_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Shared application state threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<AgentRegistry>,
    pub caller: Arc<ResilientCaller>,
    pub orchestrator: Arc<crate::orchestrator::OrchestratorClient>,
    pub client_cache: Arc<ClientCache>,
    pub activity: Arc<ActivityBus>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ask", post(handle_ask))
        .route("/chat/completions", post(handle_chat_completions))
        .route("/sse/agent-activity/:session_id", get(handle_agent_activity))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .route("/ping", get(handle_ping))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(120)))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    question: String,
    response: String,
    #[serde(rename = "sessionId")]
    session_id: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Response {
    if request.question.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "question is required".to_string(),
            }),
        )
            .into_response();
    }

    let session_id = request.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let ctx = RequestContext::new().with_session_id(session_id.clone());

    match run_turn(&state, &request.question, &ctx).await {
        Ok(answer) => (
            StatusCode::OK,
            Json(AskResponse {
                question: request.question,
                response: answer,
                session_id,
                status: "ok",
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, session_id = %session_id, "ask handler failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: e.user_safe_message(),
                }),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsRequest {
    messages: Vec<ChatMessage>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "useRAG", default)]
    #[allow(dead_code)]
    use_rag: bool,
    #[serde(rename = "useMCPTools", default)]
    #[allow(dead_code)]
    use_mcp_tools: bool,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[allow(dead_code)]
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionsResponse {
    message: ChatResponseMessage,
    #[serde(rename = "agentInteractions")]
    agent_interactions: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatResponseMessage {
    id: String,
    role: &'static str,
    content: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    metadata: serde_json::Value,
}

async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionsRequest>,
) -> Response {
    let Some(last_user_message) = request.messages.iter().rev().map(|m| m.content.clone()).next()
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "messages must not be empty".to_string(),
            }),
        )
            .into_response();
    };

    let mut ctx = RequestContext::new();
    if let Some(session_id) = &request.session_id {
        ctx = ctx.with_session_id(session_id.clone());
    }
    if let Some(user_id) = &request.user_id {
        ctx = ctx.with_user_id(user_id.clone());
    }

    match run_turn(&state, &last_user_message, &ctx).await {
        Ok(answer) => (
            StatusCode::OK,
            Json(ChatCompletionsResponse {
                message: ChatResponseMessage {
                    id: uuid::Uuid::new_v4().to_string(),
                    role: "assistant",
                    content: answer,
                    timestamp: chrono::Utc::now(),
                    metadata: serde_json::json!({}),
                },
                agent_interactions: Vec::new(),
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "chat/completions handler failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: e.user_safe_message(),
                }),
            )
                .into_response()
        }
    }
}

async fn run_turn(
    state: &AppState,
    message: &str,
    ctx: &RequestContext,
) -> crate::error::Result<String> {
    let delegate = crate::orchestrator::RegistryDelegate::new(
        state.registry.clone(),
        state.client_cache.clone(),
        state.caller.clone(),
        ctx.clone(),
        state.activity.clone(),
    );

    routing::process_message(
        message,
        ctx,
        &state.registry,
        state.orchestrator.as_ref() as &dyn ActionPlanner,
        state.orchestrator.as_ref() as &dyn Coordinator,
        &delegate as &dyn Delegate,
        state.orchestrator.as_ref() as &dyn ResearchModel,
        state.orchestrator.as_ref() as &dyn CompletionJudge,
        state.config.max_research_rounds as usize,
    )
    .await
}

/// Streams this session's real delegation events from `state.activity`,
/// interleaved with a 30s heartbeat whenever nothing has happened recently.
/// Events for other sessions sharing the same broadcast channel are
/// filtered out rather than delivered.
async fn handle_agent_activity(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.activity.subscribe();
    let stream = stream::unfold((session_id, receiver), |(session_id, mut receiver)| async move {
        loop {
            tokio::select! {
                event = receiver.recv() => {
                    match event {
                        Ok(event) if event.session_id == session_id => {
                            let payload = serde_json::json!({
                                "event": "agent-activity",
                                "data": {
                                    "agentName": event.agent_name,
                                    "action": event.action,
                                    "status": "alive",
                                    "details": event.details,
                                },
                                "timestamp": chrono::Utc::now(),
                            });
                            return Some((
                                Ok(Event::default().json_data(payload).unwrap_or_default()),
                                (session_id, receiver),
                            ));
                        }
                        Ok(_) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
                    }
                }
                _ = tokio::time::sleep(AGENT_ACTIVITY_HEARTBEAT_INTERVAL) => {
                    let payload = serde_json::json!({
                        "event": "heartbeat",
                        "data": {
                            "agentName": serde_json::Value::Null,
                            "action": "heartbeat",
                            "status": "alive",
                            "details": serde_json::Value::Null,
                        },
                        "timestamp": chrono::Utc::now(),
                    });
                    return Some((
                        Ok(Event::default().json_data(payload).unwrap_or_default()),
                        (session_id, receiver),
                    ));
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
struct LivenessBody {
    status: &'static str,
}

async fn handle_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let circuit_state = format!("{:?}", state.caller.circuit_state().await);
    Json(serde_json::json!({
        "status": "ok",
        "registeredAgents": state.registry.list().len(),
        "circuitState": circuit_state,
    }))
}

async fn handle_health() -> Json<LivenessBody> {
    Json(LivenessBody { status: "healthy" })
}

async fn handle_ping() -> &'static str {
    "pong"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_request_rejects_missing_question_shape() {
        let request = AskRequest {
            question: "   ".to_string(),
            session_id: None,
        };
        assert!(request.question.trim().is_empty());
    }
}
