//! Static model catalog: pricing, capabilities, provider endpoints.
//!
//! The catalog is the single source of truth for what a model id costs, which
//! provider serves it, and how that provider is addressed and authenticated.
//! Lookups are best-effort for unregistered models; cost falls back to a
//! frontier-tier default so savings estimates err low.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Complexity tier a request can be classified into. Totally ordered;
/// escalation always moves strictly higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Heartbeat,
    Simple,
    Moderate,
    Complex,
    Frontier,
}

impl Tier {
    /// All tiers in ascending order.
    pub const ALL: [Tier; 5] = [
        Tier::Heartbeat,
        Tier::Simple,
        Tier::Moderate,
        Tier::Complex,
        Tier::Frontier,
    ];

    /// Tiers strictly above `self`, ascending.
    pub fn above(self) -> impl Iterator<Item = Tier> {
        Self::ALL.into_iter().filter(move |t| *t > self)
    }

    /// One step up, clamped at Frontier.
    pub fn bumped(self) -> Tier {
        match self {
            Tier::Heartbeat => Tier::Simple,
            Tier::Simple => Tier::Moderate,
            Tier::Moderate => Tier::Complex,
            Tier::Complex | Tier::Frontier => Tier::Frontier,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Heartbeat => "heartbeat",
            Tier::Simple => "simple",
            Tier::Moderate => "moderate",
            Tier::Complex => "complex",
            Tier::Frontier => "frontier",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAi,
    Google,
    DeepSeek,
    OpenRouter,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Anthropic,
        Provider::OpenAi,
        Provider::Google,
        Provider::DeepSeek,
        Provider::OpenRouter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::Google => "google",
            Provider::DeepSeek => "deepseek",
            Provider::OpenRouter => "openrouter",
        }
    }

    /// Environment variable carrying this provider's API key.
    pub fn key_env_var(self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Google => "GOOGLE_API_KEY",
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// Fixed default base URL for this provider's OpenAI-compatible API.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::Anthropic => "https://api.anthropic.com/v1",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Provider::DeepSeek => "https://api.deepseek.com/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    /// Path of the chat endpoint relative to the base URL.
    ///
    /// Anthropic's native API has no `/chat/completions`; the proxy sends the
    /// OpenAI-shaped body to `/messages`, which is not a 1:1 mapping. Callers
    /// log this gap at dispatch time.
    pub fn chat_path(self) -> &'static str {
        match self {
            Provider::Anthropic => "/messages",
            _ => "/chat/completions",
        }
    }

    /// Authentication headers for this provider.
    pub fn auth_headers(self, api_key: &str) -> Vec<(&'static str, String)> {
        match self {
            Provider::Anthropic => vec![
                ("x-api-key", api_key.to_string()),
                ("anthropic-version", "2023-06-01".to_string()),
            ],
            _ => vec![("authorization", format!("Bearer {}", api_key))],
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(Provider::Anthropic),
            "openai" => Ok(Provider::OpenAi),
            "google" => Ok(Provider::Google),
            "deepseek" => Ok(Provider::DeepSeek),
            "openrouter" => Ok(Provider::OpenRouter),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// A model in the catalog with pricing and capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Canonical `provider/model-name` id.
    pub id: String,
    pub provider: Provider,
    /// USD per million input tokens.
    pub input_cost_per_million: f64,
    /// USD per million output tokens.
    pub output_cost_per_million: f64,
    pub max_context: u64,
    pub tool_capable: bool,
    pub multimodal: bool,
    pub enabled: bool,
}

/// Pricing used for models the catalog does not know. Frontier-tier rates so
/// savings estimates are conservative.
pub const DEFAULT_INPUT_COST_PER_MILLION: f64 = 15.0;
pub const DEFAULT_OUTPUT_COST_PER_MILLION: f64 = 75.0;

fn entry(
    id: &str,
    provider: Provider,
    input: f64,
    output: f64,
    max_context: u64,
    tool_capable: bool,
    multimodal: bool,
) -> (String, ModelEntry) {
    (
        id.to_string(),
        ModelEntry {
            id: id.to_string(),
            provider,
            input_cost_per_million: input,
            output_cost_per_million: output,
            max_context,
            tool_capable,
            multimodal,
            enabled: true,
        },
    )
}

lazy_static! {
    /// Static table of known models, keyed by canonical id.
    pub static ref MODEL_CATALOG: HashMap<String, ModelEntry> = {
        use Provider::*;
        HashMap::from([
            // Anthropic
            entry("anthropic/claude-opus-4-1", Anthropic, 15.0, 75.0, 200_000, true, true),
            entry("anthropic/claude-sonnet-4-5", Anthropic, 3.0, 15.0, 200_000, true, true),
            entry("anthropic/claude-haiku-3-5", Anthropic, 0.8, 4.0, 200_000, true, true),
            // OpenAI
            entry("openai/gpt-4o", OpenAi, 2.5, 10.0, 128_000, true, true),
            entry("openai/gpt-4o-mini", OpenAi, 0.15, 0.6, 128_000, true, true),
            entry("openai/o3", OpenAi, 2.0, 8.0, 200_000, true, true),
            entry("openai/o3-mini", OpenAi, 1.1, 4.4, 200_000, true, false),
            // Google
            entry("google/gemini-2.5-pro", Google, 1.25, 10.0, 1_048_576, true, true),
            entry("google/gemini-2.5-flash", Google, 0.3, 2.5, 1_048_576, true, true),
            entry("google/gemini-2.5-flash-lite", Google, 0.1, 0.4, 1_048_576, true, true),
            // DeepSeek
            entry("deepseek/deepseek-chat", DeepSeek, 0.27, 1.1, 65_536, true, false),
            entry("deepseek/deepseek-reasoner", DeepSeek, 0.55, 2.19, 65_536, false, false),
            // OpenRouter (ids keep the vendor segment after the provider prefix)
            entry("openrouter/meta-llama/llama-3.1-70b-instruct", OpenRouter, 0.3, 0.3, 131_072, true, false),
            entry("openrouter/qwen/qwen-2.5-coder-32b-instruct", OpenRouter, 0.2, 0.2, 131_072, true, false),
        ])
    };
}

/// Resolve a model id to its catalog entry.
///
/// Resolution order: exact match, then bare-name match against the
/// `provider/name` form, then case-insensitive substring. The latter two are
/// best-effort for unregistered spellings.
pub fn lookup(model_id: &str) -> Option<&'static ModelEntry> {
    if let Some(found) = MODEL_CATALOG.get(model_id) {
        return Some(found);
    }

    let query_bare = bare_name(model_id);
    if let Some(found) = MODEL_CATALOG
        .values()
        .find(|e| bare_name(&e.id) == query_bare)
    {
        return Some(found);
    }

    let query_lower = model_id.to_lowercase();
    MODEL_CATALOG.values().find(|e| {
        let id_lower = e.id.to_lowercase();
        id_lower.contains(&query_lower) || query_lower.contains(&id_lower)
    })
}

/// Infer the provider for a model id.
///
/// A `provider/` prefix naming a known provider wins; otherwise the name is
/// matched against provider-specific substrings; otherwise openai.
pub fn provider_for(model_id: &str) -> Provider {
    if let Some((prefix, _)) = model_id.split_once('/') {
        if let Ok(provider) = prefix.parse::<Provider>() {
            return provider;
        }
    }

    let lower = model_id.to_lowercase();
    if lower.contains("claude") {
        Provider::Anthropic
    } else if lower.contains("gpt") || lower.contains("o1") || lower.contains("o3") {
        Provider::OpenAi
    } else if lower.contains("gemini") {
        Provider::Google
    } else if lower.contains("deepseek") {
        Provider::DeepSeek
    } else {
        Provider::OpenAi
    }
}

/// Strip a known-provider prefix, leaving the name the provider itself expects.
///
/// Unknown prefixes are left intact: OpenRouter-style `vendor/model` ids must
/// survive, and `openrouter/vendor/model` strips only the first segment.
pub fn bare_name(model_id: &str) -> &str {
    match model_id.split_once('/') {
        Some((prefix, rest)) if prefix.parse::<Provider>().is_ok() => rest,
        _ => model_id,
    }
}

/// Estimated USD cost of a call.
pub fn cost(model_id: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let (input_rate, output_rate) = match lookup(model_id) {
        Some(found) => (found.input_cost_per_million, found.output_cost_per_million),
        None => (
            DEFAULT_INPUT_COST_PER_MILLION,
            DEFAULT_OUTPUT_COST_PER_MILLION,
        ),
    };
    (input_tokens as f64 * input_rate + output_tokens as f64 * output_rate) / 1_000_000.0
}
