//! Core wire and conversation types.
//!
//! This module holds two layers: the conversation-level [`Message`]/
//! [`MessageRole`] types every component in this crate passes around, and
//! the OpenAI-chat-completions-shaped wire types the `orchestrator` module
//! serializes to/from when it talks to the out-of-scope model provider.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated, non-empty model name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelName(String);

impl ModelName {
    pub fn new(name: impl Into<String>) -> crate::error::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(crate::error::Error::config("model name cannot be empty"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated base URL with no trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseUrl(String);

impl BaseUrl {
    pub fn new(url: impl Into<String>) -> crate::error::Result<Self> {
        let url = url.into();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(crate::error::Error::config(format!(
                "base url must start with http:// or https://, got {url}"
            )));
        }
        Ok(Self(url.trim_end_matches('/').to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated sampling temperature in `[0.0, 2.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature(f32);

impl Temperature {
    pub fn new(value: f32) -> crate::error::Result<Self> {
        if !(0.0..=2.0).contains(&value) {
            return Err(crate::error::Error::config(format!(
                "temperature must be within [0.0, 2.0], got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Role of a message within a conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

/// A single turn in a conversation.
///
/// `agent_name` is set when the content originated from (or is addressed
/// to) a specific specialist rather than the Coordinator, matching the
/// `agentName:` prefix convention used throughout C5/C8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub agent_name: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            agent_name: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// An assistant message attributed to a named specialist, rendered
    /// downstream with the `agentName:` prefix convention.
    pub fn from_agent(agent_name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageRole::Assistant, content);
        msg.agent_name = Some(agent_name.into());
        msg
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Tool, content)
    }

    /// Render as `"agentName: content"` when attributed, else bare content —
    /// the convention C5/C8 parse back apart on the first `:`.
    pub fn prefixed_content(&self) -> String {
        match &self.agent_name {
            Some(name) => format!("{name}: {}", self.content),
            None => self.content.clone(),
        }
    }
}

// --- OpenAI chat-completions wire format, used by `orchestrator` for every
// --- call to the out-of-scope model provider. ---

#[derive(Debug, Clone, Serialize)]
pub struct OpenAIMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAIFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAIToolDef {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAIFunctionDef,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAIFunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAIToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChunk {
    pub choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChoice {
    pub delta: OpenAIDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAIDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAIToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIToolCallDelta {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<OpenAIFunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAIFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// A fully assembled, non-streaming response from one model call: either
/// narrative text, or exactly one structured function call.
#[derive(Debug, Clone)]
pub enum ModelTurn {
    Text(String),
    FunctionCall {
        name: String,
        arguments: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_name_rejects_blank() {
        assert!(ModelName::new("").is_err());
        assert!(ModelName::new("   ").is_err());
        assert!(ModelName::new("gpt-4o").is_ok());
    }

    #[test]
    fn base_url_requires_scheme_and_strips_trailing_slash() {
        assert!(BaseUrl::new("localhost:9000").is_err());
        let url = BaseUrl::new("https://specialists.example.com/").unwrap();
        assert_eq!(url.as_str(), "https://specialists.example.com");
    }

    #[test]
    fn temperature_bounds() {
        assert!(Temperature::new(-0.1).is_err());
        assert!(Temperature::new(2.1).is_err());
        assert!(Temperature::new(0.7).is_ok());
    }

    #[test]
    fn prefixed_content_round_trips_agent_name() {
        let msg = Message::from_agent("ADXAgent", "found 3 databases");
        assert_eq!(msg.prefixed_content(), "ADXAgent: found 3 databases");

        let plain = Message::assistant("hello");
        assert_eq!(plain.prefixed_content(), "hello");
    }
}
