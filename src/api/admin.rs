//! Admin surface: health, stats, runtime switches, and overrides.
//!
//! Every mutator works on the live state only; nothing here rewrites the
//! config file. Secrets never leave the process: `/api/config` replaces every
//! key and the auth token with `[REDACTED]`.

use crate::api::handlers::AppState;
use crate::core::error::{AppError, Result};
use crate::services::router::SessionOverride;
use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "enabled": state.is_enabled(),
        "dryRun": state.is_dry_run(),
        "timestamp": Utc::now(),
    }))
}

/// `GET /stats` — aggregates from the route-log sink.
pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.route_log.stats())
}

/// `GET /api/config` — live configuration with secrets redacted.
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut value = state.config.redacted();
    value["enabled"] = json!(state.is_enabled());
    value["dry_run"] = json!(state.is_dry_run());
    if let Ok(overrides) = state.overrides.read() {
        value["overrides"] = serde_json::to_value(&*overrides).unwrap_or_default();
    }
    Json(value)
}

/// `POST /api/enable`
pub async fn enable(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.enabled.store(true, Ordering::Relaxed);
    tracing::info!("routing enabled");
    Json(json!({"enabled": true}))
}

/// `POST /api/disable`
pub async fn disable(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.enabled.store(false, Ordering::Relaxed);
    tracing::info!("routing disabled");
    Json(json!({"enabled": false}))
}

/// `POST /api/dry-run/enable`
pub async fn dry_run_enable(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.dry_run.store(true, Ordering::Relaxed);
    tracing::info!("dry-run enabled");
    Json(json!({"dryRun": true}))
}

/// `POST /api/dry-run/disable`
pub async fn dry_run_disable(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.dry_run.store(false, Ordering::Relaxed);
    tracing::info!("dry-run disabled");
    Json(json!({"dryRun": false}))
}

#[derive(Debug, Deserialize)]
pub struct GlobalOverrideBody {
    pub model: Option<String>,
    pub enabled: Option<bool>,
}

/// `POST /api/override/global` — `{model}` sets, `{enabled: false}` clears.
pub async fn set_global_override(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GlobalOverrideBody>,
) -> Result<impl IntoResponse> {
    let mut overrides = state
        .overrides
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if body.enabled == Some(false) {
        overrides.global_force_model = None;
        tracing::info!("global override cleared");
        return Ok(Json(json!({"globalForceModel": null})));
    }

    let model = body
        .model
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("'model' is required to set an override".to_string()))?;
    tracing::info!(model = %model, "global override set");
    overrides.global_force_model = Some(model.clone());
    Ok(Json(json!({"globalForceModel": model})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOverrideBody {
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub turns: Option<u64>,
}

/// `POST /api/override/session` — upsert a per-session forced model.
pub async fn set_session_override(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SessionOverrideBody>,
) -> Result<impl IntoResponse> {
    let session_id = body
        .session_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("'sessionId' is required".to_string()))?;
    let model = body
        .model
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("'model' is required".to_string()))?;

    let mut overrides = state
        .overrides
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    overrides.sessions.insert(
        session_id.clone(),
        SessionOverride {
            model: model.clone(),
            remaining_turns: body.turns,
            created_at: Utc::now(),
        },
    );
    tracing::info!(session = %session_id, model = %model, turns = ?body.turns, "session override set");
    Ok(Json(json!({
        "sessionId": session_id,
        "model": model,
        "remainingTurns": body.turns,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDeleteBody {
    pub session_id: Option<String>,
}

/// `DELETE /api/override/session`
pub async fn delete_session_override(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SessionDeleteBody>,
) -> Result<impl IntoResponse> {
    let session_id = body
        .session_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("'sessionId' is required".to_string()))?;
    let mut overrides = state
        .overrides
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let removed = overrides.sessions.remove(&session_id).is_some();
    tracing::info!(session = %session_id, removed, "session override removed");
    Ok(Json(json!({"sessionId": session_id, "removed": removed})))
}

/// Fallback for unknown routes: a normalized 404 body.
pub async fn not_found() -> AppError {
    AppError::NotFound
}
