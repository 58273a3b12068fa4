//! Upstream execution: dispatch, validation, bounded retry and escalation.
//!
//! Three rules are load-bearing and must survive any refactor:
//!
//! 1. Once any byte of a streamed response reaches the client, no retry or
//!    switch-over happens. Pre-stream failures (bad status before the body is
//!    read) may still escalate.
//! 2. A response carrying tool calls is returned verbatim. Retrying could
//!    duplicate externally visible side-effects.
//! 3. When every attempt is exhausted and the client's original model has not
//!    been tried, it gets exactly one last chance before an error surfaces.

use crate::api::models::ChatRequest;
use crate::api::streaming::{self, StreamContext};
use crate::core::catalog::{self, Provider, Tier};
use crate::core::config::AppConfig;
use crate::core::error::{AppError, Result};
use crate::core::route_log::{RouteLog, RouteRecord};
use crate::services::classifier::estimate_tokens;
use crate::services::router::RoutingDecision;
use crate::services::validator::{self, Validation};
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Routing metadata attached to successful responses.
pub const HEADER_MODEL: &str = "x-clawroute-model";
pub const HEADER_TIER: &str = "x-clawroute-tier";
pub const HEADER_ESCALATED: &str = "x-clawroute-escalated";

/// Outcome of a non-streaming execution.
#[derive(Debug)]
pub struct ExecutionResult {
    pub decision: RoutingDecision,
    pub actual_model: String,
    pub final_tier: Tier,
    pub escalated: bool,
    pub escalation_chain: Vec<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub original_cost_usd: f64,
    pub actual_cost_usd: f64,
    pub savings_usd: f64,
    pub response_time_ms: u64,
    pub had_tool_calls: bool,
    pub status: u16,
    pub body: Bytes,
}

/// First strictly-higher tier with a usable provider key, with the model that
/// would serve it (primary preferred, fallback otherwise).
pub fn next_escalation(current: Tier, config: &AppConfig) -> Option<(Tier, String)> {
    for tier in current.above() {
        let tier_config = config.models.get(tier);
        if config.has_key(catalog::provider_for(&tier_config.primary)) {
            return Some((tier, tier_config.primary.clone()));
        }
        if config.has_key(catalog::provider_for(&tier_config.fallback)) {
            return Some((tier, tier_config.fallback.clone()));
        }
    }
    None
}

/// Send the request to the provider serving `model_id`, with the `model`
/// field replaced by the provider-local name.
async fn dispatch(
    client: &reqwest::Client,
    config: &AppConfig,
    request: &ChatRequest,
    model_id: &str,
) -> std::result::Result<reqwest::Response, reqwest::Error> {
    let provider = catalog::provider_for(model_id);
    let url = format!("{}{}", config.base_url(provider), provider.chat_path());

    if provider == Provider::Anthropic {
        tracing::warn!(
            model = model_id,
            "sending OpenAI-shaped body to anthropic /messages; the shapes are not 1:1"
        );
    }

    let body = request.to_provider_body(catalog::bare_name(model_id));
    let mut builder = client.post(&url).header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = config.key_for(provider) {
        for (name, value) in provider.auth_headers(key) {
            builder = builder.header(name, value);
        }
    }

    tracing::debug!(model = model_id, provider = %provider, url = %url, "dispatching upstream");
    builder.json(&body).send().await
}

/// Execute a routed request and produce the client response. Emits the route
/// record as a side effect (deferred to stream end for streamed responses).
pub async fn execute(
    client: &reqwest::Client,
    config: &AppConfig,
    route_log: &Arc<RouteLog>,
    request: &ChatRequest,
    decision: RoutingDecision,
    request_id: String,
) -> Result<Response> {
    if request.wants_stream() {
        execute_streaming(client, config, route_log, request, decision, request_id).await
    } else {
        let result =
            execute_non_streaming(client, config, request, &decision, &request_id).await?;
        route_log.record(build_record(&result, request, request_id, false));
        Ok(into_client_response(result))
    }
}

/// One pass-through dispatch of the client's originally requested model, used
/// by the fail-open path when the pipeline itself has died. No validation, no
/// retry, no record; whatever the provider returns is forwarded.
pub async fn passthrough_original(
    client: &reqwest::Client,
    config: &AppConfig,
    request: &ChatRequest,
    request_id: &str,
) -> Result<Response> {
    tracing::warn!(
        request_id = %request_id,
        model = %request.model,
        "fail-open pass-through dispatch"
    );
    let upstream = dispatch(client, config, request, &request.model).await?;
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Bounded retry loop for the non-streaming path.
async fn execute_non_streaming(
    client: &reqwest::Client,
    config: &AppConfig,
    request: &ChatRequest,
    decision: &RoutingDecision,
    request_id: &str,
) -> Result<ExecutionResult> {
    let started = Instant::now();
    let max_attempts = config.max_retries + 1;
    // Pass-through and dry-run dispatch the original model exactly once;
    // escalating them would defeat the point of those modes.
    let retry_allowed =
        decision.safe_to_retry && !decision.is_passthrough && !decision.is_dry_run;

    let mut current_model = decision.routed_model.clone();
    let mut current_tier = decision.tier;
    let mut chain = vec![current_model.clone()];
    let mut attempt = 0u32;
    let mut last_error: Option<String> = None;
    let mut last_invalid: Option<(u16, Bytes, Value, Validation)> = None;

    while attempt < max_attempts {
        attempt += 1;

        let upstream = match dispatch(client, config, request, &current_model).await {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::warn!(
                    request_id,
                    model = %current_model,
                    error = %e,
                    "upstream dispatch failed"
                );
                last_error = Some(e.to_string());
                if retry_allowed && attempt < max_attempts {
                    if let Some((tier, model)) = next_escalation(current_tier, config) {
                        current_tier = tier;
                        current_model = model;
                        chain.push(current_model.clone());
                        tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
                        continue;
                    }
                }
                break;
            }
        };

        let status = upstream.status().as_u16();
        let body = match upstream.bytes().await {
            Ok(body) => body,
            Err(e) => {
                last_error = Some(e.to_string());
                break;
            }
        };
        let parsed: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let verdict = validator::validate(status, &parsed, request, current_tier);

        if verdict.valid {
            return Ok(finish(
                decision, current_model, current_tier, chain, status, body, &parsed, verdict,
                request, started,
            ));
        }

        tracing::info!(
            request_id,
            model = %current_model,
            reason = %verdict.reason,
            "upstream response failed validation"
        );

        // Tool calls and unsafe classifications terminate the loop with the
        // response forwarded verbatim.
        if verdict.had_tool_calls || !retry_allowed {
            return Ok(finish(
                decision, current_model, current_tier, chain, status, body, &parsed, verdict,
                request, started,
            ));
        }

        last_invalid = Some((status, body, parsed, verdict));
        match next_escalation(current_tier, config) {
            Some((tier, model)) if attempt < max_attempts => {
                current_tier = tier;
                current_model = model;
                chain.push(current_model.clone());
                tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
            }
            _ => break,
        }
    }

    // Last chance: the client's own model, exactly once.
    if config.always_fallback_to_original && current_model != decision.original_model {
        tracing::info!(request_id = %request_id, model = %decision.original_model, "falling back to original model");
        chain.push(decision.original_model.clone());
        match dispatch(client, config, request, &decision.original_model).await {
            Ok(upstream) => {
                let status = upstream.status().as_u16();
                let body = upstream.bytes().await.map_err(AppError::Request)?;
                let parsed: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
                let verdict = validator::validate(status, &parsed, request, decision.tier);
                return Ok(finish(
                    decision,
                    decision.original_model.clone(),
                    decision.tier,
                    chain,
                    status,
                    body,
                    &parsed,
                    verdict,
                    request,
                    started,
                ));
            }
            Err(e) => {
                last_error = Some(e.to_string());
            }
        }
    }

    // No fallback possible: surface the last upstream body verbatim if one
    // exists, otherwise a normalized error.
    if let Some((status, body, parsed, verdict)) = last_invalid {
        return Ok(finish(
            decision, current_model, current_tier, chain, status, body, &parsed, verdict,
            request, started,
        ));
    }

    Err(AppError::Internal(
        last_error.unwrap_or_else(|| "all upstream attempts failed".to_string()),
    ))
}

/// Streaming path. Escalation is allowed only before a byte is read: a failed
/// connection or a non-OK status is a pre-stream failure; an OK status hands
/// the connection to the pump and commits.
async fn execute_streaming(
    client: &reqwest::Client,
    config: &AppConfig,
    route_log: &Arc<RouteLog>,
    request: &ChatRequest,
    decision: RoutingDecision,
    request_id: String,
) -> Result<Response> {
    let started = Instant::now();
    let max_attempts = config.max_retries + 1;
    let retry_allowed =
        decision.safe_to_retry && !decision.is_passthrough && !decision.is_dry_run;

    let mut current_model = decision.routed_model.clone();
    let mut current_tier = decision.tier;
    let mut chain = vec![current_model.clone()];
    let mut attempt = 0u32;
    let mut last_error: Option<String> = None;

    while attempt < max_attempts {
        attempt += 1;

        let outcome = dispatch(client, config, request, &current_model).await;
        match outcome {
            Ok(upstream) if upstream.status().is_success() => {
                let record = streaming_record(
                    &decision, &current_model, &chain, request, &request_id,
                );
                return Ok(streaming::sse_response(
                    upstream,
                    StreamContext {
                        record,
                        route_log: route_log.clone(),
                        started,
                        tier: current_tier,
                    },
                ));
            }
            Ok(upstream) => {
                let status = upstream.status().as_u16();
                tracing::warn!(
                    request_id = %request_id,
                    model = %current_model,
                    status,
                    "streaming dispatch returned error status before any bytes were sent"
                );
                last_error = Some(format!("http_error_{}", status));
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, model = %current_model, error = %e, "streaming dispatch failed");
                last_error = Some(e.to_string());
            }
        }

        if retry_allowed && attempt < max_attempts {
            if let Some((tier, model)) = next_escalation(current_tier, config) {
                current_tier = tier;
                current_model = model;
                chain.push(current_model.clone());
                tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
                continue;
            }
        }
        break;
    }

    if config.always_fallback_to_original && current_model != decision.original_model {
        chain.push(decision.original_model.clone());
        if let Ok(upstream) = dispatch(client, config, request, &decision.original_model).await {
            if upstream.status().is_success() {
                let record = streaming_record(
                    &decision,
                    &decision.original_model,
                    &chain,
                    request,
                    &request_id,
                );
                return Ok(streaming::sse_response(
                    upstream,
                    StreamContext {
                        record,
                        route_log: route_log.clone(),
                        started,
                        tier: decision.tier,
                    },
                ));
            }
            last_error = Some(format!("http_error_{}", upstream.status().as_u16()));
        }
    }

    Err(AppError::Internal(
        last_error.unwrap_or_else(|| "all upstream attempts failed".to_string()),
    ))
}

/// Assemble the non-streaming execution result with observed token usage.
#[allow(clippy::too_many_arguments)]
fn finish(
    decision: &RoutingDecision,
    actual_model: String,
    final_tier: Tier,
    chain: Vec<String>,
    status: u16,
    body: Bytes,
    parsed: &Value,
    verdict: Validation,
    request: &ChatRequest,
    started: Instant,
) -> ExecutionResult {
    let usage = parsed.get("usage");
    let input_tokens = usage
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(|t| t.as_u64())
        .unwrap_or_else(|| estimate_tokens(request));
    let output_tokens = usage
        .and_then(|u| u.get("completion_tokens"))
        .and_then(|t| t.as_u64())
        .unwrap_or(0);

    let original_cost_usd = catalog::cost(&decision.original_model, input_tokens, output_tokens);
    let actual_cost_usd = catalog::cost(&actual_model, input_tokens, output_tokens);
    let escalated = actual_model != decision.routed_model;

    ExecutionResult {
        actual_model,
        final_tier,
        escalated,
        escalation_chain: chain,
        input_tokens,
        output_tokens,
        original_cost_usd,
        actual_cost_usd,
        savings_usd: (original_cost_usd - actual_cost_usd).max(0.0),
        response_time_ms: started.elapsed().as_millis() as u64,
        had_tool_calls: verdict.had_tool_calls,
        status,
        body,
        decision: decision.clone(),
    }
}

/// Upstream body forwarded byte-for-byte, plus routing headers.
fn into_client_response(result: ExecutionResult) -> Response {
    let status = StatusCode::from_u16(result.status).unwrap_or(StatusCode::BAD_GATEWAY);
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(HEADER_MODEL, &result.actual_model)
        .header(HEADER_TIER, result.final_tier.as_str())
        .header(HEADER_ESCALATED, if result.escalated { "true" } else { "false" })
        .body(Body::from(result.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn build_record(
    result: &ExecutionResult,
    request: &ChatRequest,
    request_id: String,
    streamed: bool,
) -> RouteRecord {
    let decision = &result.decision;
    let mut record = RouteRecord::new(
        request_id,
        decision.original_model.clone(),
        decision.tier,
    );
    record.routed_model = decision.routed_model.clone();
    record.actual_model = result.actual_model.clone();
    record.reason = decision.reason.clone();
    record.confidence = decision.confidence;
    record.input_tokens = result.input_tokens;
    record.output_tokens = result.output_tokens;
    record.original_cost_usd = result.original_cost_usd;
    record.actual_cost_usd = result.actual_cost_usd;
    record.savings_usd = result.savings_usd;
    record.escalated = result.escalated;
    record.escalation_chain = result.escalation_chain.clone();
    record.response_time_ms = result.response_time_ms;
    record.had_tool_calls = result.had_tool_calls;
    record.is_dry_run = decision.is_dry_run;
    record.is_override = decision.is_override;
    record.is_passthrough = decision.is_passthrough;
    record.streamed = streamed;
    record.prompt = request.last_user_text();
    record
}

/// Record scaffold for a streamed response; the pump fills in token counts
/// and timing at stream end.
fn streaming_record(
    decision: &RoutingDecision,
    actual_model: &str,
    chain: &[String],
    request: &ChatRequest,
    request_id: &str,
) -> RouteRecord {
    let mut record = RouteRecord::new(
        request_id.to_string(),
        decision.original_model.clone(),
        decision.tier,
    );
    record.routed_model = decision.routed_model.clone();
    record.actual_model = actual_model.to_string();
    record.reason = decision.reason.clone();
    record.confidence = decision.confidence;
    record.escalated = actual_model != decision.routed_model;
    record.escalation_chain = chain.to_vec();
    record.is_dry_run = decision.is_dry_run;
    record.is_override = decision.is_override;
    record.is_passthrough = decision.is_passthrough;
    record.streamed = true;
    record.input_tokens = estimate_tokens(request);
    record.prompt = request.last_user_text();
    record
}
