//! `orchestratord`: boots the orchestration runtime as an HTTP service.
//!
//! Loads configuration from the environment, discovers specialist agents
//! by probing their well-known agent cards, and serves the routing host
//! over `axum`.

use orchestrator_core::{
    ActivityBus, AgentRegistry, AppConfig, AppState, ClientCache, OrchestratorClient,
    ResilientCaller, TokenAccountant, discover_agents, router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const CLIENT_CACHE_CAPACITY: usize = 64;
const CLIENT_CACHE_TTL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = AppConfig::from_env()?;
    let bind_addr = config.server_bind_addr.clone();
    let specialist_base_urls = config.specialist_base_urls.clone();
    let config = Arc::new(config);

    let accountant = Arc::new(TokenAccountant::new());
    let caller = ResilientCaller::shared(&config, accountant.clone());
    let orchestrator = Arc::new(OrchestratorClient::new(&config, accountant));
    let client_cache = Arc::new(ClientCache::new(CLIENT_CACHE_CAPACITY, CLIENT_CACHE_TTL));
    let activity = Arc::new(ActivityBus::new());

    tracing::info!(count = specialist_base_urls.len(), "discovering specialist agents");
    let entries = discover_agents(&specialist_base_urls).await;
    let registry = Arc::new(AgentRegistry::from_entries(entries));
    tracing::info!(count = registry.list().len(), "specialist agents registered");

    let state = AppState {
        config,
        registry,
        caller,
        orchestrator,
        client_cache,
        activity,
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr.as_str()).await?;
    tracing::info!(addr = %bind_addr, "orchestratord listening");
    axum::serve(listener, app).await?;

    Ok(())
}
