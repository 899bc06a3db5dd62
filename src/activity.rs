//! Live agent-activity events for the `/sse/agent-activity/{sessionId}`
//! feed: a small broadcast bus that delegation actually publishes to,
//! instead of the heartbeat-only placeholder this endpoint started as.

use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// One observed step of a specialist delegation, scoped to the session
/// that triggered it.
#[derive(Debug, Clone, Serialize)]
pub struct AgentActivityEvent {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "agentName")]
    pub agent_name: String,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Process-wide broadcast of [`AgentActivityEvent`]s. Cheap to clone
/// (an `Arc` around a `tokio::sync::broadcast::Sender`); publishers that
/// outrun every subscriber simply drop the event rather than blocking.
pub struct ActivityBus {
    sender: broadcast::Sender<AgentActivityEvent>,
}

impl Default for ActivityBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish one event. No-op if nobody is currently subscribed.
    pub fn publish(&self, event: AgentActivityEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentActivityEvent> {
        self.sender.subscribe()
    }
}
