//! Streaming utilities for SSE parsing and turn aggregation.
//!
//! The orchestrator model always resolves to exactly one [`ModelTurn`] per
//! call — plain narrative text, or a single structured function call
//! (`direct_answer`/`delegate`/`collaborate`/`research` at the routing
//! layer, `delegate` inside the research loop). This module turns the
//! OpenAI-compatible SSE chunk stream into that one value.

use crate::error::{Error, Result};
use crate::types::{ModelTurn, OpenAIChunk};
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Accumulates streaming deltas into one finished [`ModelTurn`].
///
/// Text and tool-call deltas are mutually exclusive in practice, but both
/// buffers are tracked independently; whichever has content when
/// `finish_reason` arrives wins, tool calls taking precedence since a
/// model that started a function call never backs out of it mid-stream.
pub struct TurnAggregator {
    text_buffer: String,
    tool_calls: HashMap<u32, PartialToolCall>,
}

impl Default for TurnAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnAggregator {
    pub fn new() -> Self {
        Self {
            text_buffer: String::new(),
            tool_calls: HashMap::new(),
        }
    }

    /// Feed one chunk; returns `Some(ModelTurn)` once a choice carries a
    /// `finish_reason`, `None` otherwise.
    pub fn process_chunk(&mut self, chunk: OpenAIChunk) -> Result<Option<ModelTurn>> {
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                self.text_buffer.push_str(&content);
            }

            if let Some(tool_calls) = choice.delta.tool_calls {
                for tool_call in tool_calls {
                    let entry = self.tool_calls.entry(tool_call.index).or_default();
                    if let Some(id) = tool_call.id {
                        entry.id = Some(id);
                    }
                    if let Some(function) = tool_call.function {
                        if let Some(name) = function.name {
                            entry.name = Some(name);
                        }
                        if let Some(args) = function.arguments {
                            entry.arguments.push_str(&args);
                        }
                    }
                }
            }

            if choice.finish_reason.is_some() {
                if let Some((_, partial)) = self.tool_calls.drain().next() {
                    let name = partial.name.unwrap_or_default();
                    let arguments: serde_json::Value = if partial.arguments.is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&partial.arguments)
                            .map_err(|e| Error::parse(format!("invalid tool call arguments: {e}")))?
                    };
                    self.text_buffer.clear();
                    return Ok(Some(ModelTurn::FunctionCall { name, arguments }));
                }

                let text = std::mem::take(&mut self.text_buffer);
                return Ok(Some(ModelTurn::Text(text)));
            }
        }

        Ok(None)
    }
}

/// Parse a raw HTTP streaming response into a stream of [`OpenAIChunk`]s,
/// per the `data: {...}` / `data: [DONE]` SSE protocol.
pub fn parse_sse_stream(
    body: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<OpenAIChunk>> + Send>> {
    let stream = body.bytes_stream().filter_map(move |result| async move {
        let bytes = match result.map_err(Error::Http) {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };

        let text = String::from_utf8_lossy(&bytes);

        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                if data == "[DONE]" {
                    continue;
                }
                let chunk: OpenAIChunk = match serde_json::from_str(data) {
                    Ok(c) => c,
                    Err(e) => {
                        return Some(Err(Error::parse(format!("invalid SSE chunk: {e}"))));
                    }
                };
                return Some(Ok(chunk));
            }
        }

        None
    });

    Box::pin(stream)
}

/// Drive an SSE stream to its one [`ModelTurn`], returning a parse error if
/// the stream ends without ever seeing a `finish_reason`.
pub async fn collect_turn(
    mut stream: Pin<Box<dyn Stream<Item = Result<OpenAIChunk>> + Send>>,
) -> Result<ModelTurn> {
    let mut aggregator = TurnAggregator::new();
    while let Some(chunk) = stream.next().await {
        if let Some(turn) = aggregator.process_chunk(chunk?)? {
            return Ok(turn);
        }
    }
    Err(Error::parse("stream ended without a finish_reason"))
}

/// Best-effort extraction of a JSON object from model output that may be
/// wrapped in prose or a markdown fence — models asked for structured
/// output sometimes narrate around it anyway.
pub fn extract_json_loosely(text: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }

    let fenced = text
        .split("```json")
        .nth(1)
        .or_else(|| text.split("```").nth(1));
    if let Some(candidate) = fenced {
        if let Ok(value) = serde_json::from_str(candidate.trim()) {
            return Some(value);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}
