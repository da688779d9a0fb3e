//! HTTP admin API for Dashkeep.
//!
//! Exposes the assignment lifecycle as REST endpoints under `/v1` plus an
//! unauthenticated `/health` check.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, StatusCode, request::Parts},
    middleware::{self, Next},
    response::Json,
    routing::get,
};
use serde::Serialize;
use std::future::Future;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub use api_v1::{ApiState, SharedApiState};

/// Build the full router: `/health` plus the `/v1` API.
///
/// Layers applied:
/// - Bearer token authentication on all /v1 routes
/// - CORS limited to local origins
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedApiState) -> Router {
    let v1 = api_v1::v1_router(state.clone())
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(is_local_origin))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn is_local_origin(origin: &HeaderValue, _parts: &Parts) -> bool {
    let origin = origin.as_bytes();
    origin.starts_with(b"http://localhost") || origin.starts_with(b"http://127.0.0.1")
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn serve(
    config: &dashkeep_config::AppConfig,
    state: SharedApiState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    if !config.admin_auth_enabled() {
        warn!("No admin tokens configured, the /v1 API is open to anyone who can reach {addr}");
    }

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting with v1 API");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Gateway stopped");
    Ok(())
}

// --- Handlers ---

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

/// Authentication middleware for the /v1 API.
///
/// Requires a valid `Authorization: Bearer <token>` header whenever
/// admin tokens are configured.
async fn auth_middleware(
    State(state): State<SharedApiState>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if state.admin_tokens.is_empty() {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match auth_header {
        Some(token) if state.admin_tokens.iter().any(|t| t == token) => Ok(next.run(req).await),
        _ => {
            warn!("Unauthorized request to /v1 API, missing or invalid bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
