//! ClawRoute proxy server - main entry point.
//!
//! Loads the layered configuration, initializes logging and the route-log
//! sink, and serves the proxy plus its admin surface on one listener.

use anyhow::{Context, Result};
use clawroute::core::catalog::{Provider, Tier};
use clawroute::core::route_log::RouteLog;
use clawroute::{app_router, AppConfig, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Load .env before reading any environment variables
    dotenvy::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_tracing();

    let config = AppConfig::load().context("configuration error")?;

    let http_client = create_http_client();
    let route_log = RouteLog::new(config.log_path.clone(), config.log_content);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;

    log_startup(&config);

    let state = Arc::new(AppState::new(config, http_client, route_log));
    let app = app_router(state);

    tracing::info!("ClawRoute listening on {}", addr);
    tracing::info!("proxy endpoint: POST /v1/chat/completions");
    tracing::info!("admin surface:  GET /health, GET /stats, /api/*");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Initialize tracing. `RUST_LOG` wins; otherwise `CLAWROUTE_DEBUG` raises
/// the crate to debug. Noisy HTTP internals stay at warn either way.
fn init_tracing() {
    let debug = std::env::var("CLAWROUTE_DEBUG")
        .map(|v| clawroute::core::config::str_to_bool(&v))
        .unwrap_or(false);

    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if debug {
            "info,clawroute=debug".to_string()
        } else {
            "info".to_string()
        }
    });
    let filter_str = format!("{},hyper=warn,h2=warn,reqwest=warn", base_filter);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter_str))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Create the shared HTTP client with connection pooling.
fn create_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .tcp_keepalive(std::time::Duration::from_secs(60))
        .build()
        .expect("Failed to build HTTP client")
}

/// Log key availability and the tier map at boot. Keys are shown only as
/// present or absent.
fn log_startup(config: &AppConfig) {
    let available: Vec<&str> = Provider::ALL
        .into_iter()
        .filter(|p| config.has_key(*p))
        .map(|p| p.as_str())
        .collect();
    tracing::info!(
        "providers with keys: {}",
        if available.is_empty() { "none".to_string() } else { available.join(", ") }
    );

    for tier in Tier::ALL {
        let tier_config = config.models.get(tier);
        tracing::info!(
            "  tier {:<9} -> {} (fallback {})",
            tier.as_str(),
            tier_config.primary,
            tier_config.fallback
        );
    }

    if config.dry_run {
        tracing::info!("dry-run is on: decisions are logged but requests pass through");
    }
    if !config.enabled {
        tracing::info!("routing is disabled: all requests pass through");
    }
}
