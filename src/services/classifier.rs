//! Pure request classification.
//!
//! Maps a chat request to a complexity tier using ordered pattern rules over
//! the request shape and the last user message. No I/O, no hidden state; the
//! pattern tables are compiled once at startup. Must stay cheap — it runs on
//! every request before routing.

use crate::api::models::ChatRequest;
use crate::core::catalog::Tier;
use crate::core::config::AppConfig;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Result of classifying one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub tier: Tier,
    /// In [0, 1].
    pub confidence: f64,
    pub reason: String,
    pub signals: BTreeSet<String>,
    pub tools_detected: bool,
    /// True only for Heartbeat/Simple without tools. Necessary but not
    /// sufficient for the executor to retry.
    pub safe_to_retry: bool,
}

const HEARTBEAT_MODEL_HINTS: [&str; 3] = ["heartbeat", "cron", "health"];

const ACK_WORDS: [&str; 30] = [
    "thanks", "thank you", "thx", "ty", "ok", "okay", "k", "kk", "alright", "sure", "yes", "no",
    "yep", "nope", "yeah", "nah", "got it", "sounds good", "cool", "great", "nice", "perfect",
    "awesome", "agreed", "right", "lol", "haha", "hehe", "lmao", "rofl",
];

const ACK_EMOJI: [char; 6] = ['👍', '🙏', '😊', '👌', '✅', '❤'];

lazy_static! {
    /// Fixed heartbeat phrases, optionally followed by punctuation.
    static ref HEARTBEAT_RE: Regex = Regex::new(
        r"^(?:ping|status|alive|check|heartbeat|hey|hi|hello|test|yo|are you (?:there|up|alive|ok|ready)|can you hear me|you there|testing)[.!?]*$"
    )
    .unwrap();

    /// Keywords that mark heavyweight engineering/reasoning asks.
    static ref FRONTIER_KEYWORDS_RE: Regex = Regex::new(
        r"(?:implement|architect|design|refactor|debug|optimize|prove|derive|analyze.{0,20}(?:code|system|architecture|algorithm))"
    )
    .unwrap();

    /// Keywords that mark substantial but conventional asks.
    static ref COMPLEX_KEYWORDS_RE: Regex = Regex::new(
        r"(?:explain|compare|analyze|research|summarize|evaluate|assess|review|write.{0,10}(?:essay|report|article|doc|documentation))"
    )
    .unwrap();
}

/// Heuristic token estimate: ceil(chars / 4), plus 4 per message envelope,
/// plus tool-call name and argument text. Deliberately avoids a real
/// tokenizer in the hot path.
pub fn estimate_tokens(request: &ChatRequest) -> u64 {
    let mut chars = 0usize;
    for message in &request.messages {
        chars += message.text().len();
        for tool_call in message.tool_calls.iter().flatten() {
            if let Some(function) = tool_call.get("function") {
                chars += function
                    .get("name")
                    .and_then(|n| n.as_str())
                    .map(|n| n.len())
                    .unwrap_or(0);
                chars += function
                    .get("arguments")
                    .and_then(|a| a.as_str())
                    .map(|a| a.len())
                    .unwrap_or(0);
            }
        }
    }
    let text_tokens = chars.div_ceil(4) as u64;
    text_tokens + 4 * request.messages.len() as u64
}

/// Conservative-mode tier clamp. The one-step bump applies first; the
/// direct-to-frontier override applies afterwards when confidence is very
/// low, so the two can compound in exactly one order.
pub(crate) fn apply_conservative(tier: Tier, confidence: f64, min_confidence: f64) -> Tier {
    let mut adjusted = tier;
    if confidence < min_confidence {
        adjusted = adjusted.bumped();
    }
    if confidence < 0.5 {
        adjusted = Tier::Frontier;
    }
    adjusted
}

fn strip_trailing_punct(text: &str) -> &str {
    text.trim_end_matches(['.', '!', '?'])
}

fn is_acknowledgment(text: &str) -> bool {
    ACK_WORDS.contains(&strip_trailing_punct(text))
}

fn is_emoji_only(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_whitespace() || ACK_EMOJI.contains(&c) || c == '\u{fe0f}')
}

/// Classify a request. Pure and deterministic.
pub fn classify(request: &ChatRequest, config: &AppConfig) -> ClassificationResult {
    let tools_detected = request.has_tools();
    let last_user = request.last_user_text().unwrap_or_default();
    let last_lower = last_user.to_lowercase();
    let message_count = request.messages.len();
    let estimated_tokens = estimate_tokens(request);

    let mut tier = Tier::Moderate;
    let mut confidence: f64 = 0.6;
    let mut reason = "general conversation".to_string();
    let mut signals: BTreeSet<String> = BTreeSet::new();

    // Rule 1: model-name hint
    let model_lower = request.model.to_lowercase();
    if HEARTBEAT_MODEL_HINTS.iter().any(|h| model_lower.contains(h)) {
        tier = Tier::Heartbeat;
        confidence = 0.85;
        reason = "model name suggests heartbeat traffic".to_string();
        signals.insert("model_name_hint".to_string());
    }

    // Rule 2: heartbeat message patterns
    if HEARTBEAT_RE.is_match(&last_lower) {
        tier = Tier::Heartbeat;
        confidence = 0.95;
        reason = "heartbeat pattern match".to_string();
        signals.insert("heartbeat_pattern".to_string());
    } else if tier == Tier::Moderate
        && !last_user.is_empty()
        && last_user.len() < 30
        && message_count <= 2
        && !tools_detected
    {
        tier = Tier::Heartbeat;
        confidence = 0.8;
        reason = "short message with shallow history".to_string();
        signals.insert("short_shallow".to_string());
    }

    // Rule 3: frontier signals override any tentative tier
    if tools_detected && request.tool_choice_active() {
        tier = Tier::Frontier;
        confidence = 0.9;
        reason = "tools with active tool_choice".to_string();
        signals.insert("tool_choice".to_string());
    } else if last_user.contains("```") {
        tier = Tier::Frontier;
        confidence = 0.85;
        reason = "fenced code block".to_string();
        signals.insert("code_block".to_string());
    } else if last_user.len() > 1000 && FRONTIER_KEYWORDS_RE.is_match(&last_lower) {
        tier = Tier::Frontier;
        confidence = 0.8;
        reason = "frontier keywords in long message".to_string();
        signals.insert("frontier_keywords".to_string());
    } else if estimated_tokens > 8000 {
        tier = Tier::Frontier;
        confidence = 0.75;
        reason = "estimated tokens above 8000".to_string();
        signals.insert("token_volume".to_string());
    } else if request.has_image_content() {
        tier = Tier::Frontier;
        confidence = 0.8;
        reason = "multimodal image content".to_string();
        signals.insert("multimodal".to_string());
    } else if tier == Tier::Moderate {
        // Rule 4: complex signals, only from the default tier
        if tools_detected {
            tier = Tier::Complex;
            confidence = 0.85;
            reason = "tools declared".to_string();
            signals.insert("tools_present".to_string());
        } else if (500..=1000).contains(&last_user.len())
            && COMPLEX_KEYWORDS_RE.is_match(&last_lower)
        {
            tier = Tier::Complex;
            confidence = 0.8;
            reason = "complex keywords in medium-length message".to_string();
            signals.insert("complex_keywords".to_string());
        } else if message_count > 8 {
            tier = Tier::Complex;
            confidence = 0.75;
            reason = "deep conversation history".to_string();
            signals.insert("deep_history".to_string());
        } else if (4000..=8000).contains(&estimated_tokens) {
            tier = Tier::Complex;
            confidence = 0.7;
            reason = "estimated tokens in 4000-8000".to_string();
            signals.insert("token_volume".to_string());
        }
    }

    // Rule 5: simple patterns, only from the default tier
    if tier == Tier::Moderate {
        if is_acknowledgment(&last_lower) || is_emoji_only(&last_user) {
            tier = Tier::Simple;
            confidence = 0.9;
            reason = "acknowledgment".to_string();
            signals.insert("acknowledgment".to_string());
        } else if last_user.len() < 80 && last_user.ends_with('?') && message_count <= 2 {
            tier = Tier::Simple;
            confidence = 0.8;
            reason = "short question with shallow history".to_string();
            signals.insert("short_question".to_string());
        }
    }

    // Tool-aware escalation: tool-bearing requests get at least Complex
    if config.tool_escalation && tools_detected && tier < Tier::Complex {
        tier = Tier::Complex;
        confidence = confidence.min(0.8);
        reason = "tools declared, escalated to complex".to_string();
        signals.insert("tool_escalation".to_string());
    }

    // Conservative mode: one-step bump first, then the direct-to-frontier
    // override. The order matters and is pinned by tests.
    if config.conservative {
        let clamped = apply_conservative(tier, confidence, config.min_confidence);
        if clamped != tier {
            signals.insert(if clamped == Tier::Frontier && confidence < 0.5 {
                "conservative_frontier".to_string()
            } else {
                "conservative_bump".to_string()
            });
        }
        tier = clamped;
    }

    let safe_to_retry = matches!(tier, Tier::Heartbeat | Tier::Simple) && !tools_detected;

    ClassificationResult {
        tier,
        confidence,
        reason,
        signals,
        tools_detected,
        safe_to_retry,
    }
}
