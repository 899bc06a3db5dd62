//! Token Accounting (C2).
//!
//! Token counts are estimated from character classes rather than any
//! model-specific tokenizer, so the runtime never needs to vendor a
//! tokenizer for providers it does not control. The constants below are
//! load-bearing: they mirror the accounting the orchestrator model itself
//! was tuned against, not an arbitrary approximation.

use crate::types::{Message, MessageRole};
use std::collections::VecDeque;
use std::sync::Mutex;

const MESSAGE_OVERHEAD_TOKENS: f64 = 10.0;
const MESSAGE_LIST_OVERHEAD_TOKENS: f64 = 3.0;
const OVERHEAD_FACTOR: f64 = 1.1;

const SUMMARIZE_THRESHOLD_TOKENS: usize = 2000;
const FINAL_TRUNCATE_CHARS: usize = 500;
const SUMMARY_KEYWORDS: &[&str] = &["result", "error", "success", "found", "data", "analysis", "summary"];

const HIGH_RISK_TOKENS: usize = 20_000;
const MEDIUM_RISK_TOKENS: usize = 10_000;
const HIGH_TRUNCATION_RATE: f64 = 0.20;

/// Estimate the token cost of a single piece of text using a
/// character-class-weighted model: `ceil(1.1 * (alpha/4 + digit/2.5 + space/1 + symbol/3))`.
pub fn estimate_text_tokens(text: &str) -> usize {
    let (mut alpha, mut digit, mut space, mut symbol) = (0usize, 0usize, 0usize, 0usize);
    for c in text.chars() {
        if c.is_alphabetic() {
            alpha += 1;
        } else if c.is_ascii_digit() {
            digit += 1;
        } else if c.is_whitespace() {
            space += 1;
        } else {
            symbol += 1;
        }
    }
    let raw = alpha as f64 / 4.0 + digit as f64 / 2.5 + space as f64 / 1.0 + symbol as f64 / 3.0;
    (OVERHEAD_FACTOR * raw).ceil() as usize
}

/// Estimate the token cost of one message: content tokens plus role/name
/// overhead and the flat per-message structural overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let content_tokens = estimate_text_tokens(&message.content);
    let role_tokens = estimate_text_tokens(&message.role.to_string());
    let name_tokens = message
        .agent_name
        .as_deref()
        .map(estimate_text_tokens)
        .unwrap_or(0);
    content_tokens + role_tokens + name_tokens + MESSAGE_OVERHEAD_TOKENS as usize
}

/// Estimate the token cost of an entire message list, including the flat
/// per-message list overhead.
pub fn estimate_list_tokens(messages: &[Message]) -> usize {
    let per_message: usize = messages.iter().map(estimate_message_tokens).sum();
    let list_overhead = (messages.len() as f64 * MESSAGE_LIST_OVERHEAD_TOKENS).ceil() as usize;
    per_message + list_overhead
}

/// Result of the three-stage history-optimization cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedHistory {
    pub messages: Vec<Message>,
    pub truncated: bool,
}

/// Reduce `messages` to fit within `budget_tokens`, applying stages in order
/// and stopping as soon as the budget is met.
pub fn optimize_history(messages: &[Message], budget_tokens: usize) -> OptimizedHistory {
    if estimate_list_tokens(messages) <= budget_tokens {
        return OptimizedHistory {
            messages: messages.to_vec(),
            truncated: false,
        };
    }

    // Stage 1: keep all system messages + last 5, then greedily add earlier
    // messages newest-to-oldest until the budget is met.
    let stage1 = stage1_truncate(messages, budget_tokens);
    if estimate_list_tokens(&stage1) <= budget_tokens {
        return OptimizedHistory {
            messages: stage1,
            truncated: stage1.len() < messages.len(),
        };
    }

    // Stage 2: summarize any individual message over 2000 tokens.
    let stage2: Vec<Message> = stage1.iter().map(summarize_if_long).collect();
    if estimate_list_tokens(&stage2) <= budget_tokens {
        return OptimizedHistory {
            messages: stage2,
            truncated: true,
        };
    }

    // Stage 3: hard-truncate non-system content to 500 chars.
    let stage3: Vec<Message> = stage2
        .iter()
        .map(|m| {
            if m.role == MessageRole::System {
                m.clone()
            } else {
                hard_truncate(m)
            }
        })
        .collect();
    if estimate_list_tokens(&stage3) <= budget_tokens {
        return OptimizedHistory {
            messages: stage3,
            truncated: true,
        };
    }

    // Final fallback: system messages plus the last two.
    let mut fallback: Vec<Message> = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .cloned()
        .collect();
    fallback.extend(messages.iter().rev().take(2).rev().cloned());
    OptimizedHistory {
        messages: fallback,
        truncated: true,
    }
}

fn stage1_truncate(messages: &[Message], budget_tokens: usize) -> Vec<Message> {
    let last_five_start = messages.len().saturating_sub(5);
    let mut kept: Vec<bool> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| m.role == MessageRole::System || i >= last_five_start)
        .collect();

    let mut total: usize = messages
        .iter()
        .zip(kept.iter())
        .filter(|(_, &k)| k)
        .map(|(m, _)| estimate_message_tokens(m))
        .sum();

    for i in (0..last_five_start).rev() {
        if kept[i] {
            continue;
        }
        let cost = estimate_message_tokens(&messages[i]);
        if total + cost > budget_tokens {
            break;
        }
        kept[i] = true;
        total += cost;
    }

    messages
        .iter()
        .zip(kept.iter())
        .filter(|(_, &k)| k)
        .map(|(m, _)| m.clone())
        .collect()
}

fn summarize_if_long(message: &Message) -> Message {
    if estimate_message_tokens(message) <= SUMMARIZE_THRESHOLD_TOKENS {
        return message.clone();
    }
    let sentences: Vec<&str> = message
        .content
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.len() <= 2 {
        return message.clone();
    }

    let mut kept = Vec::new();
    kept.push(sentences[0]);
    for sentence in &sentences[1..sentences.len() - 1] {
        let lower = sentence.to_lowercase();
        if SUMMARY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            kept.push(sentence);
        }
    }
    kept.push(sentences[sentences.len() - 1]);

    let mut summarized = message.clone();
    summarized.content = kept.join(". ") + ".";
    summarized
}

fn hard_truncate(message: &Message) -> Message {
    if message.content.chars().count() <= FINAL_TRUNCATE_CHARS {
        return message.clone();
    }
    let truncated: String = message.content.chars().take(FINAL_TRUNCATE_CHARS).collect();
    let mut out = message.clone();
    out.content = format!("{truncated}[truncated]");
    out
}

/// Qualitative risk level for an upcoming call, derived from its estimated
/// size plus recent truncation pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub reasons: Vec<String>,
}

/// One entry in the bounded usage ledger.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub context_label: String,
    pub tokens_used: usize,
    pub max_tokens: usize,
    pub truncated: bool,
}

const USAGE_HISTORY_CAPACITY: usize = 1000;

/// Tracks estimated token usage across calls and supports pre-call risk
/// assessment. Shared process-wide behind an `Arc`.
pub struct TokenAccountant {
    history: Mutex<VecDeque<UsageRecord>>,
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenAccountant {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(USAGE_HISTORY_CAPACITY)),
        }
    }

    /// Record one completed call's usage, evicting the oldest entry once
    /// the buffer reaches capacity.
    pub fn record(&self, context_label: impl Into<String>, tokens_used: usize, max_tokens: usize, truncated: bool) {
        let mut history = self.history.lock().expect("usage history mutex poisoned");
        if history.len() >= USAGE_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(UsageRecord {
            timestamp: chrono::Utc::now(),
            context_label: context_label.into(),
            tokens_used,
            max_tokens,
            truncated,
        });
    }

    fn recent_truncation_rate(&self) -> f64 {
        let history = self.history.lock().expect("usage history mutex poisoned");
        if history.is_empty() {
            return 0.0;
        }
        let truncated = history.iter().filter(|r| r.truncated).count();
        truncated as f64 / history.len() as f64
    }

    /// Classify expected call size before dispatch. Never blocks a call;
    /// callers decide what to do with the assessment (log it, surface it).
    pub fn risk_assessment(&self, estimated_tokens: usize) -> RiskAssessment {
        let mut reasons = Vec::new();
        let mut level = RiskLevel::Low;

        if estimated_tokens > HIGH_RISK_TOKENS {
            level = RiskLevel::High;
            reasons.push(format!(
                "estimated {estimated_tokens} tokens exceeds high-risk threshold of {HIGH_RISK_TOKENS}; consider splitting the request"
            ));
        } else if estimated_tokens > MEDIUM_RISK_TOKENS {
            level = RiskLevel::Medium;
            reasons.push(format!(
                "estimated {estimated_tokens} tokens exceeds medium-risk threshold of {MEDIUM_RISK_TOKENS}; monitor closely"
            ));
        }

        let truncation_rate = self.recent_truncation_rate();
        if truncation_rate > HIGH_TRUNCATION_RATE {
            level = RiskLevel::High;
            reasons.push(format!(
                "recent truncation rate {:.0}% exceeds {:.0}%",
                truncation_rate * 100.0,
                HIGH_TRUNCATION_RATE * 100.0
            ));
        }

        RiskAssessment { level, reasons }
    }
}
