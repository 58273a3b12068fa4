//! API layer: HTTP handlers, wire models, streaming, and the router wiring.

pub mod admin;
pub mod auth;
pub mod handlers;
pub mod models;
pub mod streaming;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use handlers::{chat_completions, messages_unsupported, AppState};
pub use models::{ChatMessage, ChatRequest};

/// Build the full application router over shared state.
///
/// `/v1/*` and `/api/*` sit behind the auth middleware; `/health` and
/// `/stats` stay open.
pub fn app_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(messages_unsupported))
        .route("/api/config", get(admin::get_config))
        .route("/api/enable", post(admin::enable))
        .route("/api/disable", post(admin::disable))
        .route("/api/dry-run/enable", post(admin::dry_run_enable))
        .route("/api/dry-run/disable", post(admin::dry_run_disable))
        .route("/api/override/global", post(admin::set_global_override))
        .route(
            "/api/override/session",
            post(admin::set_session_override).delete(admin::delete_session_override),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .merge(protected)
        .route("/health", get(admin::health))
        .route("/stats", get(admin::stats))
        .fallback(admin::not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
