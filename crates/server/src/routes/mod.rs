pub mod analytics;
pub mod auth;
pub mod budgets;
pub mod categories;
pub mod health;
pub mod payment_methods;
pub mod reflections;
pub mod sharing;
pub mod sync;
pub mod transactions;
pub mod users;

use axum::Json;
use budgetsync_api::{ApiResponse, OkResponse};

use crate::error::ApiErr;

/// Handler result wrapped in the success envelope.
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiErr>;

pub fn envelope<T>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::ok(data))
}

pub fn done() -> Json<ApiResponse<OkResponse>> {
    envelope(OkResponse { ok: true })
}
