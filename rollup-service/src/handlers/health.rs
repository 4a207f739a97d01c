use crate::services::get_metrics;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "rollup-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// The controller store gates readiness. The stats cache is reported but
/// never makes the service unready, since every cache miss falls back to
/// the store.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let cache = match state.cache.health_check().await {
        Ok(_) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Stats cache health check failed");
            "unavailable"
        }
    };

    match state.controllers.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ready", "cache": cache })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "cache": cache, "error": e.to_string() })),
            )
        }
    }
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
