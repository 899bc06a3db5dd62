//! # Agent Orchestrator Core
//!
//! A multi-agent orchestration runtime: routes user turns across remote
//! specialist agents reachable over JSON-RPC, with resilient retry and
//! circuit-breaking, iterative research, and response synthesis.
//!
//! ## Architecture
//!
//! - **activity**: the live agent-activity broadcast feeding
//!   `/sse/agent-activity/{sessionId}`.
//! - **routing**: the Routing Host (C6) — entry point for a user turn,
//!   picking between a direct answer, a single delegation, a fixed
//!   collaboration, or an open-ended research session.
//! - **research**: the Iterative Research Loop (C7).
//! - **termination**: the COMPLETE/CONTINUE decision shared by C5's
//!   collaboration rounds and the research loop.
//! - **synthesis**: combines one or more specialist/coordinator responses
//!   into the single string returned to the caller (C8).
//! - **orchestrator**: the client for the out-of-scope model provider,
//!   implementing every model-facing trait the routing/research/
//!   termination/synthesis logic needs.
//! - **transport**: JSON-RPC 2.0 client and well-known-URI discovery for
//!   reaching remote specialists (C3).
//! - **registry**: the in-memory specialist catalog (C4).
//! - **resilience**: the circuit breaker, rate tracker, and retry loop
//!   every outbound call passes through (C1).
//! - **tokens**: character-class token estimation, history optimization,
//!   and usage accounting (C2).
//! - **config**: environment-driven runtime configuration.
//! - **error**: the crate-wide error taxonomy.
//! - **server**: the public `axum` HTTP API.
//! - **types**: conversation and OpenAI wire types shared everywhere.

mod activity;
mod config;
mod error;
mod orchestrator;
mod registry;
mod research;
mod resilience;
mod retry;
mod routing;
mod server;
mod synthesis;
mod termination;
mod transport;
mod types;
mod utils;

pub use activity::{ActivityBus, AgentActivityEvent};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use orchestrator::{OrchestratorClient, RegistryDelegate};
pub use registry::{AgentCard, AgentRegistry, AgentRegistryEntry};
pub use research::{Candidate, Delegate, ResearchModel, ResearchState};
pub use resilience::{CircuitStateKind, ResilientCaller};
pub use routing::{Action, ActionPlanner, Coordinator};
pub use server::{AppState, router};
pub use synthesis::{Contribution, Selection};
pub use termination::{CompletionJudge, Decision};
pub use tokens::TokenAccountant;
pub use transport::{ClientCache, RemoteAgentClient, RequestContext, discover_agents};
pub use types::{Message, MessageRole};

pub mod tokens;
