//! HTTP gateway for PhysioGold.
//!
//! Serves the embedded single-page chat UI and the v1 session API it talks
//! to. Each browser tab creates its own session; nothing is persisted.
//!
//! Built on Axum.

pub mod api_v1;
pub mod frontend;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use physiogold_config::AppConfig;
use physiogold_providers::GeminiFactory;

/// Build the full router: health, v1 API, and the embedded frontend.
///
/// Layers applied:
/// - CORS limited to the configured local origin
/// - Request body limit of `gateway.max_upload_bytes`
/// - HTTP trace logging
pub fn build_router(config: &AppConfig, api_state: api_v1::SharedApiState) -> Router {
    let origins: Vec<HeaderValue> = [
        format!("http://{}:{}", config.gateway.host, config.gateway.port),
        format!("http://localhost:{}", config.gateway.port),
    ]
    .iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(api_state))
        .merge(frontend::frontend_router())
        .layer(DefaultBodyLimit::max(config.gateway.max_upload_bytes))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the HTTP server and run until Ctrl+C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let factory = Arc::new(GeminiFactory::from_settings(&config.provider));
    let api_state = Arc::new(api_v1::ApiState::new(&config, factory));
    let app = build_router(&config, api_state);

    info!(
        addr = %addr,
        max_sessions = config.gateway.max_sessions,
        timeout_secs = config.provider.timeout_secs,
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
