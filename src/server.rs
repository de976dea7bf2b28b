/// Health and metrics endpoint for the worker process
use crate::{
    context::AppContext,
    db,
    error::{LinkError, LinkResult},
    metrics,
};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Build the `/health` + `/metrics` router
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

/// Health check handler; pings the database
async fn health_check(State(ctx): State<AppContext>) -> (StatusCode, Json<serde_json::Value>) {
    match db::test_connection(&ctx.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
    }
}

async fn metrics_handler() -> String {
    metrics::render_metrics()
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Bind the metrics listener
pub async fn bind(addr: SocketAddr) -> LinkResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| LinkError::Internal(format!("Failed to bind to {}: {}", addr, e)))
}

/// Serve `/health` and `/metrics` on an already bound listener
pub async fn serve_metrics(listener: TcpListener, ctx: AppContext) -> LinkResult<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Metrics endpoint listening on {}", addr);
    }

    axum::serve(listener, build_router(ctx))
        .await
        .map_err(|e| LinkError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
