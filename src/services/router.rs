//! Tier → model routing.
//!
//! Turns a classification into a concrete routing decision, honoring the
//! disabled/dry-run switches, global and session overrides, and per-provider
//! key availability. Pure with respect to I/O; the only mutation is the
//! session-override turn countdown.

use crate::api::models::ChatRequest;
use crate::core::catalog::{self, Tier};
use crate::core::config::AppConfig;
use crate::services::classifier::{estimate_tokens, ClassificationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Output tokens assumed when estimating request cost.
const OUTPUT_ESTIMATE_CAP: u64 = 4000;

/// A per-session forced model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOverride {
    pub model: String,
    /// None means unlimited turns.
    pub remaining_turns: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Live override state, mutated only through the admin surface and the
/// session turn countdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Overrides {
    pub global_force_model: Option<String>,
    pub sessions: HashMap<String, SessionOverride>,
}

/// The routing outcome for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub original_model: String,
    pub routed_model: String,
    pub tier: Tier,
    pub reason: String,
    pub confidence: f64,
    pub is_dry_run: bool,
    pub is_override: bool,
    pub is_passthrough: bool,
    pub estimated_savings_usd: f64,
    pub safe_to_retry: bool,
}

impl RoutingDecision {
    fn passthrough(
        original_model: &str,
        classification: &ClassificationResult,
        reason: String,
    ) -> Self {
        Self {
            original_model: original_model.to_string(),
            routed_model: original_model.to_string(),
            tier: classification.tier,
            reason,
            confidence: classification.confidence,
            is_dry_run: false,
            is_override: false,
            is_passthrough: true,
            estimated_savings_usd: 0.0,
            safe_to_retry: classification.safe_to_retry,
        }
    }
}

/// Produce a routing decision.
///
/// `session_id` comes from the `X-Session-Id` request header when present;
/// a firing session override consumes one of its remaining turns.
pub fn route(
    request: &ChatRequest,
    classification: &ClassificationResult,
    config: &AppConfig,
    enabled: bool,
    dry_run: bool,
    overrides: &mut Overrides,
    session_id: Option<&str>,
) -> RoutingDecision {
    let original_model = request.model.as_str();

    if !enabled {
        return RoutingDecision::passthrough(
            original_model,
            classification,
            "proxy disabled".to_string(),
        );
    }

    let mut is_override = false;
    let mut routed_model = None;
    let mut reason = String::new();

    if let Some(forced) = overrides.global_force_model.as_deref() {
        routed_model = Some(forced.to_string());
        reason = "global override".to_string();
        is_override = true;
    } else if let Some(session) = session_id.and_then(|id| consume_session(overrides, id)) {
        routed_model = Some(session.clone());
        reason = format!("session override ({})", session_id.unwrap_or_default());
        is_override = true;
    }

    let (routed_model, reason) = match routed_model {
        Some(model) => (model, reason),
        None => {
            let tier_config = config.models.get(classification.tier);
            if config.has_key(catalog::provider_for(&tier_config.primary)) {
                (
                    tier_config.primary.clone(),
                    format!("tier {} primary", classification.tier),
                )
            } else if config.has_key(catalog::provider_for(&tier_config.fallback)) {
                (
                    tier_config.fallback.clone(),
                    format!(
                        "tier {} fallback (no {} key)",
                        classification.tier,
                        catalog::provider_for(&tier_config.primary)
                    ),
                )
            } else {
                return RoutingDecision::passthrough(
                    original_model,
                    classification,
                    format!("no provider key for tier {}", classification.tier),
                );
            }
        }
    };

    if dry_run {
        return RoutingDecision {
            original_model: original_model.to_string(),
            routed_model: original_model.to_string(),
            tier: classification.tier,
            reason: format!("dry-run (would route to {})", routed_model),
            confidence: classification.confidence,
            is_dry_run: true,
            is_override,
            is_passthrough: false,
            estimated_savings_usd: 0.0,
            safe_to_retry: classification.safe_to_retry,
        };
    }

    let input_tokens = estimate_tokens(request);
    let output_tokens = request
        .max_tokens
        .unwrap_or(OUTPUT_ESTIMATE_CAP)
        .min(OUTPUT_ESTIMATE_CAP);
    let estimated_savings_usd = (catalog::cost(original_model, input_tokens, output_tokens)
        - catalog::cost(&routed_model, input_tokens, output_tokens))
    .max(0.0);

    RoutingDecision {
        original_model: original_model.to_string(),
        routed_model,
        tier: classification.tier,
        reason,
        confidence: classification.confidence,
        is_dry_run: false,
        is_override,
        is_passthrough: false,
        estimated_savings_usd,
        safe_to_retry: classification.safe_to_retry,
    }
}

/// Look up a session override, consuming one turn. Entries at zero turns are
/// removed and no longer fire.
fn consume_session(overrides: &mut Overrides, session_id: &str) -> Option<String> {
    let model = {
        let session = overrides.sessions.get_mut(session_id)?;
        match session.remaining_turns {
            Some(0) => None,
            Some(ref mut turns) => {
                *turns -= 1;
                Some(session.model.clone())
            }
            None => Some(session.model.clone()),
        }
    };
    if model.is_none()
        || overrides
            .sessions
            .get(session_id)
            .and_then(|s| s.remaining_turns)
            == Some(0)
    {
        overrides.sessions.remove(session_id);
    }
    model
}
