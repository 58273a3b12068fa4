//! HTTP handlers for the proxy surface.
//!
//! `/v1/chat/completions` runs the full pipeline: classify, route, execute.
//! All three stages are wrapped fail-open: an internal failure in
//! classification, routing, or execution falls back to a single pass-through
//! dispatch of the client's original model, and only when even that fails
//! does a 500 surface.

use crate::api::models::ChatRequest;
use crate::core::config::AppConfig;
use crate::core::error::{AppError, Result};
use crate::core::route_log::RouteLog;
use crate::services::classifier::{self, ClassificationResult};
use crate::services::executor;
use crate::services::router::{self, Overrides, RoutingDecision};
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Response,
};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Shared application state.
///
/// The configuration is immutable after startup; the two switches and the
/// override table are the only runtime-mutable pieces, touched through the
/// admin surface.
pub struct AppState {
    pub config: AppConfig,
    pub enabled: AtomicBool,
    pub dry_run: AtomicBool,
    pub overrides: RwLock<Overrides>,
    pub http_client: reqwest::Client,
    pub route_log: Arc<RouteLog>,
}

impl AppState {
    pub fn new(config: AppConfig, http_client: reqwest::Client, route_log: Arc<RouteLog>) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            dry_run: AtomicBool::new(config.dry_run),
            overrides: RwLock::new(Overrides::default()),
            config,
            http_client,
            route_log,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run.load(Ordering::Relaxed)
    }
}

/// Handle chat completion requests, streaming and non-streaming.
///
/// This endpoint is compatible with the OpenAI Chat Completions API; unknown
/// request fields are forwarded to the provider unchanged.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let request_id = uuid::Uuid::new_v4().to_string();

    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid request body: {}", e)))?;

    let session_id = headers
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    tracing::debug!(
        request_id = %request_id,
        model = %request.model,
        messages = request.messages.len(),
        stream = request.wants_stream(),
        "handling chat completion"
    );

    // All three pipeline stages sit inside the fail-open wrapper: a defect in
    // classification, routing, or execution must not take the request down.
    // The two pure stages are caught synchronously here; the executor stage is
    // caught at its task boundary below.
    let decision = match catch_unwind(AssertUnwindSafe(|| {
        classify_and_route(&state, &request, session_id.as_deref())
    })) {
        Ok(decision) => decision,
        Err(_) => {
            tracing::error!(request_id = %request_id, "classifier/router panicked, failing open");
            passthrough_decision(&request)
        }
    };

    tracing::info!(
        request_id = %request_id,
        tier = %decision.tier,
        original = %decision.original_model,
        routed = %decision.routed_model,
        reason = %decision.reason,
        "routing decision"
    );

    let exec_state = state.clone();
    let exec_request = request.clone();
    let exec_request_id = request_id.clone();
    execute_fail_open(
        async move {
            executor::execute(
                &exec_state.http_client,
                &exec_state.config,
                &exec_state.route_log,
                &exec_request,
                decision,
                exec_request_id,
            )
            .await
        },
        state,
        request,
        request_id,
    )
    .await
}

/// Run the executor stage with panics caught at a task boundary.
///
/// A panic cannot be caught across an `.await`, so the executor future runs
/// on its own task; a panicked join is answered with exactly one pass-through
/// dispatch of the client's originally requested model, and only if that also
/// fails does an error surface.
pub async fn execute_fail_open<F>(
    task: F,
    state: Arc<AppState>,
    request: ChatRequest,
    request_id: String,
) -> Result<Response>
where
    F: Future<Output = Result<Response>> + Send + 'static,
{
    let mut handle = AbortOnDrop(tokio::spawn(task));
    match (&mut handle.0).await {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => {
            tracing::error!(
                request_id = %request_id,
                "executor panicked, failing open to original model"
            );
            executor::passthrough_original(
                &state.http_client,
                &state.config,
                &request,
                &request_id,
            )
            .await
        }
        Err(join_error) => Err(AppError::Internal(join_error.to_string())),
    }
}

/// Aborts the spawned executor task if the client goes away while the handler
/// is waiting on it, so an abandoned request does not keep an upstream call
/// alive.
struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn classify_and_route(
    state: &AppState,
    request: &ChatRequest,
    session_id: Option<&str>,
) -> RoutingDecision {
    let classification: ClassificationResult = classifier::classify(request, &state.config);
    let mut overrides = match state.overrides.write() {
        Ok(overrides) => overrides,
        Err(poisoned) => poisoned.into_inner(),
    };
    router::route(
        request,
        &classification,
        &state.config,
        state.is_enabled(),
        state.is_dry_run(),
        &mut overrides,
        session_id,
    )
}

/// The decision used when the pipeline itself failed: a plain pass-through.
fn passthrough_decision(request: &ChatRequest) -> RoutingDecision {
    RoutingDecision {
        original_model: request.model.clone(),
        routed_model: request.model.clone(),
        tier: crate::core::catalog::Tier::Moderate,
        reason: "fail-open passthrough".to_string(),
        confidence: 0.0,
        is_dry_run: false,
        is_override: false,
        is_passthrough: true,
        estimated_savings_usd: 0.0,
        safe_to_retry: false,
    }
}

/// Placeholder for the Anthropic-native messages surface, which the proxy
/// does not translate.
pub async fn messages_unsupported() -> AppError {
    AppError::UnsupportedFormat(
        "this proxy speaks the OpenAI chat-completions format; use /v1/chat/completions"
            .to_string(),
    )
}
