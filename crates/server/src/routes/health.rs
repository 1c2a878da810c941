use axum::Json;
use budgetsync_api::HealthResponse;

/// GET /health — server liveness check. No auth, no envelope.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
