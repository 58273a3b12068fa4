//! ClawRoute - a transparent routing proxy for LLM chat-completions traffic.
//!
//! Sits between an OpenAI-compatible client and a fleet of upstream providers.
//! Each request is cheaply classified into one of five complexity tiers, routed
//! to a tier-appropriate model, and executed with safe retry and escalation:
//!
//! - **Classification**: a pure sub-millisecond function over the request shape
//! - **Routing**: tier → model, honoring overrides, key availability, dry-run
//! - **Execution**: bounded retry/escalation that never duplicates tool
//!   side-effects and fails open to the client's originally requested model
//! - **Streaming**: byte-exact SSE pass-through with side-channel usage tracking
//!
//! # Architecture
//!
//! The codebase is organized into three layers:
//!
//! - [`core`]: configuration, errors, the model catalog, the route-log sink
//! - [`api`]: HTTP handlers, wire models, streaming, router wiring
//! - [`services`]: classifier, router, validator, executor

pub mod api;
pub mod core;
pub mod services;

// Re-export commonly used types for convenience
pub use crate::api::{app_router, AppState, ChatRequest};
pub use crate::core::{AppConfig, AppError, Provider, Result, RouteLog, Tier};
