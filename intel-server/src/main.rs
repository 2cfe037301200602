//! Threat Intelligence Dashboard Server
//!
//! Query and presentation tier over the shared indicator store.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    INTEL SERVER                           │
//! ├───────────────────────────────────────────────────────────┤
//! │  ┌────────────┐  ┌──────────────┐  ┌───────────────────┐  │
//! │  │  HTML View │  │  JSON API    │  │  Telemetry        │  │
//! │  │  (table)   │  │  (filters)   │  │  (OTLP export)    │  │
//! │  └─────┬──────┘  └──────┬───────┘  └───────────────────┘  │
//! │        └────────────────┼                                 │
//! │                         ▼                                 │
//! │                  ┌─────────────┐                          │
//! │                  │ PostgreSQL  │ ◄── feed-service writes  │
//! │                  └─────────────┘                          │
//! └───────────────────────────────────────────────────────────┘
//! ```

mod config;
mod db;
mod error;
mod handlers;
mod models;
mod telemetry;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    // Initialize telemetry (logging, traces, metrics)
    let telemetry = telemetry::Telemetry::init(&config);

    tracing::info!("Threat Intel Server starting...");
    tracing::info!(
        "Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );

    // Initialize database pool
    let pool = db::create_pool(&config.database_url).await?;

    // Apply schema
    db::ensure_schema(&pool).await?;

    // Build application state
    let state = AppState {
        pool,
        metrics: telemetry.http_metrics(&config),
        config: config.clone(),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    telemetry.shutdown();
    Ok(())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: config::Config,
    pub metrics: telemetry::HttpMetrics,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::ui::index))
        .route("/health", get(handlers::health::check))
        .route("/api/v1/indicators", get(handlers::indicators::list))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    tracing::info!("Shutdown signal received");
}
