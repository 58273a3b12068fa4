//! Configuration management for the routing proxy.
//!
//! Configuration is layered: bundled defaults, then an optional user JSON
//! file, then environment variables. It is constructed once at startup and
//! validated; after that only `enabled`, `dry_run`, and the overrides table
//! change at runtime (through the admin surface, not through this module).

use crate::core::catalog::{Provider, Tier};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Per-tier model selection: the preferred model and a fallback used when the
/// primary's provider has no key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierModelConfig {
    pub primary: String,
    pub fallback: String,
}

/// The tier → model table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierModels {
    pub heartbeat: TierModelConfig,
    pub simple: TierModelConfig,
    pub moderate: TierModelConfig,
    pub complex: TierModelConfig,
    pub frontier: TierModelConfig,
}

impl TierModels {
    pub fn get(&self, tier: Tier) -> &TierModelConfig {
        match tier {
            Tier::Heartbeat => &self.heartbeat,
            Tier::Simple => &self.simple,
            Tier::Moderate => &self.moderate,
            Tier::Complex => &self.complex,
            Tier::Frontier => &self.frontier,
        }
    }
}

impl Default for TierModels {
    fn default() -> Self {
        let pair = |primary: &str, fallback: &str| TierModelConfig {
            primary: primary.to_string(),
            fallback: fallback.to_string(),
        };
        Self {
            heartbeat: pair("google/gemini-2.5-flash-lite", "openai/gpt-4o"),
            simple: pair("google/gemini-2.5-flash", "openai/gpt-4o-mini"),
            moderate: pair("deepseek/deepseek-chat", "openai/gpt-4o"),
            complex: pair("anthropic/claude-sonnet-4-5", "openai/gpt-4o"),
            frontier: pair("anthropic/claude-opus-4-1", "openai/gpt-4o"),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listen address
    pub host: String,

    /// Listen port
    pub port: u16,

    /// Optional token protecting `/v1/*` and `/api/*`; None means open on localhost
    pub auth_token: Option<String>,

    /// Initial routing state; false means every request passes through
    pub enabled: bool,

    /// Classify and log but do not change the routed model
    pub dry_run: bool,

    /// Verbose logging toggle
    pub debug: bool,

    /// Log prompt text into route records. Must default to false.
    pub log_content: bool,

    /// Per-provider API keys; empty string means "provider unavailable"
    pub api_keys: HashMap<Provider, String>,

    /// Tier → model table
    pub models: TierModels,

    /// Confidence floor for conservative-mode escalation
    pub min_confidence: f64,

    /// Bump low-confidence classifications one tier up
    pub conservative: bool,

    /// Raise tool-bearing requests to at least Complex
    pub tool_escalation: bool,

    /// Retries on top of the first attempt in the executor
    pub max_retries: u32,

    /// Wait between executor attempts
    pub retry_delay_ms: u64,

    /// Try the client's original model once after escalation is exhausted
    pub always_fallback_to_original: bool,

    /// Advisory retention horizon passed to the route-log sink
    pub retention_days: u32,

    /// Route-record JSONL destination
    pub log_path: PathBuf,

    /// Per-provider base URLs. Defaults to the fixed provider constants; only
    /// a user config file can override them (the test suite points these at a
    /// mock server).
    pub base_urls: HashMap<Provider, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let api_keys = Provider::ALL
            .into_iter()
            .map(|p| (p, String::new()))
            .collect();
        let base_urls = Provider::ALL
            .into_iter()
            .map(|p| (p, p.default_base_url().to_string()))
            .collect();
        Self {
            host: "127.0.0.1".to_string(),
            port: 8484,
            auth_token: None,
            enabled: true,
            dry_run: false,
            debug: false,
            log_content: false,
            api_keys,
            models: TierModels::default(),
            min_confidence: 0.7,
            conservative: false,
            tool_escalation: true,
            max_retries: 2,
            retry_delay_ms: 500,
            always_fallback_to_original: true,
            retention_days: 30,
            log_path: PathBuf::from("./logs/routes.jsonl"),
            base_urls,
        }
    }
}

impl AppConfig {
    /// Load configuration from all layers: defaults, then the optional user
    /// file (`$CLAWROUTE_CONFIG` or `./clawroute.json`), then environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var("CLAWROUTE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./clawroute.json"));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a user config file. Missing fields fall back to the bundled
    /// defaults via serde.
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Overlay recognized environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        for provider in Provider::ALL {
            if let Ok(key) = std::env::var(provider.key_env_var()) {
                self.api_keys.insert(provider, key);
            }
        }

        if let Ok(port) = std::env::var("CLAWROUTE_PORT") {
            self.port = port
                .parse::<u16>()
                .with_context(|| format!("CLAWROUTE_PORT is not a valid port: {}", port))?;
        }
        if let Ok(host) = std::env::var("CLAWROUTE_HOST") {
            self.host = host;
        }
        if let Ok(token) = std::env::var("CLAWROUTE_TOKEN") {
            self.auth_token = (!token.trim().is_empty()).then(|| token);
        }
        if let Ok(enabled) = std::env::var("CLAWROUTE_ENABLED") {
            self.enabled = str_to_bool(&enabled);
        }
        if let Ok(dry_run) = std::env::var("CLAWROUTE_DRY_RUN") {
            self.dry_run = str_to_bool(&dry_run);
        }
        if let Ok(debug) = std::env::var("CLAWROUTE_DEBUG") {
            self.debug = str_to_bool(&debug);
        }
        if let Ok(log_content) = std::env::var("CLAWROUTE_LOG_CONTENT") {
            self.log_content = str_to_bool(&log_content);
        }

        Ok(())
    }

    /// Enforce startup invariants. Violations are fatal.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("port must be in [1, 65535]");
        }
        if self.retention_days < 1 {
            bail!("retention_days must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            bail!("min_confidence must be within [0, 1], got {}", self.min_confidence);
        }
        for tier in Tier::ALL {
            let tier_config = self.models.get(tier);
            if tier_config.primary.trim().is_empty() || tier_config.fallback.trim().is_empty() {
                bail!("tier '{}' must configure both a primary and a fallback model", tier);
            }
        }
        if !Provider::ALL.into_iter().any(|p| self.has_key(p)) {
            bail!(
                "no provider API key configured; set at least one of {}",
                Provider::ALL
                    .map(|p| p.key_env_var())
                    .join(", ")
            );
        }
        Ok(())
    }

    /// Whether a usable (non-empty) key exists for the provider.
    pub fn has_key(&self, provider: Provider) -> bool {
        self.api_keys
            .get(&provider)
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }

    /// The provider's key, if usable.
    pub fn key_for(&self, provider: Provider) -> Option<&str> {
        self.api_keys
            .get(&provider)
            .map(|k| k.as_str())
            .filter(|k| !k.trim().is_empty())
    }

    /// Base URL for a provider, honoring user-file overrides.
    pub fn base_url(&self, provider: Provider) -> &str {
        self.base_urls
            .get(&provider)
            .map(|u| u.as_str())
            .unwrap_or_else(|| provider.default_base_url())
    }

    /// Serialize the configuration with every secret replaced by `[REDACTED]`.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(keys) = value.get_mut("api_keys").and_then(|k| k.as_object_mut()) {
            for (_, key) in keys.iter_mut() {
                if key.as_str().map(|k| !k.is_empty()).unwrap_or(false) {
                    *key = serde_json::Value::String("[REDACTED]".to_string());
                }
            }
        }
        if value
            .get("auth_token")
            .map(|t| !t.is_null())
            .unwrap_or(false)
        {
            value["auth_token"] = serde_json::Value::String("[REDACTED]".to_string());
        }
        value
    }
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
pub fn str_to_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
