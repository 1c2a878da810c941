pub mod config;
pub mod error;
pub mod identity;
pub mod permissions;
pub mod reconcile;
pub mod routes;
pub mod sharing;
pub mod storage;

#[cfg(test)]
mod test_support;

use axum::{
    Router,
    extract::{FromRef, Request, State},
    http::HeaderValue,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use std::any::Any;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any as AnyOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use config::AppConfig;
use error::ApiErr;
use identity::IdentityVerifier;
use storage::Db;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: AppConfig,
    pub identity: IdentityVerifier,
}

impl FromRef<AppState> for Db {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for IdentityVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.identity.clone()
    }
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!("handler panicked: {detail}");
    ApiErr::internal("internal server error").into_response()
}

/// Abort handlers that run past `limit` with a 503 envelope.
async fn enforce_timeout(State(limit): State<Duration>, req: Request, next: Next) -> Response {
    let uri = req.uri().clone();
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(%uri, ?limit, "request timed out");
            ApiErr::unavailable("request timed out").into_response()
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(AnyOrigin).allow_headers(AnyOrigin);
    if allowed_origins.is_empty() {
        return layer.allow_origin(AnyOrigin);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Auth
        .route("/auth/onboarding", post(routes::auth::onboarding))
        .route("/auth/me", get(routes::auth::me))
        // Users
        .route(
            "/users/me",
            get(routes::users::get_me)
                .put(routes::users::update_me)
                .delete(routes::users::delete_me),
        )
        // Categories
        .route(
            "/categories",
            get(routes::categories::list).post(routes::categories::create),
        )
        .route("/categories/system", get(routes::categories::list_system))
        .route(
            "/categories/{id}",
            put(routes::categories::update).delete(routes::categories::delete),
        )
        // Budgets
        .route(
            "/budgets",
            get(routes::budgets::list).post(routes::budgets::create),
        )
        .route("/budgets/month/{month}", get(routes::budgets::get_by_month))
        .route(
            "/budgets/categories/{id}",
            put(routes::budgets::update_category).delete(routes::budgets::delete_category),
        )
        .route(
            "/budgets/{id}",
            get(routes::budgets::get)
                .put(routes::budgets::update)
                .delete(routes::budgets::delete),
        )
        .route(
            "/budgets/{id}/categories",
            get(routes::budgets::list_categories).post(routes::budgets::add_category),
        )
        // Transactions
        .route(
            "/transactions",
            get(routes::transactions::list).post(routes::transactions::create),
        )
        .route(
            "/transactions/{id}",
            get(routes::transactions::get)
                .put(routes::transactions::update)
                .delete(routes::transactions::delete),
        )
        // Payment methods
        .route(
            "/payment-methods",
            get(routes::payment_methods::list).post(routes::payment_methods::create),
        )
        .route(
            "/payment-methods/{id}",
            get(routes::payment_methods::get)
                .put(routes::payment_methods::update)
                .delete(routes::payment_methods::delete),
        )
        // Reflections
        .route("/reflections", post(routes::reflections::create))
        .route("/reflections/templates", get(routes::reflections::templates))
        .route("/reflections/month/{month}", get(routes::reflections::get_by_month))
        .route(
            "/reflections/{id}",
            get(routes::reflections::get)
                .put(routes::reflections::update)
                .delete(routes::reflections::delete),
        )
        // Analytics
        .route("/analytics/dashboard/{month}", get(routes::analytics::dashboard))
        .route("/analytics/spending/{month}", get(routes::analytics::spending))
        .route("/analytics/trends", get(routes::analytics::trends))
        .route(
            "/analytics/category/{category_id}",
            get(routes::analytics::category_report),
        )
        // Sharing
        .route("/sharing/invite", post(routes::sharing::invite))
        .route("/sharing/invitations", get(routes::sharing::my_invitations))
        .route(
            "/sharing/invitations/{id}",
            axum::routing::delete(routes::sharing::cancel),
        )
        .route(
            "/sharing/invitations/{id}/respond",
            put(routes::sharing::respond),
        )
        .route("/sharing/budgets/{budget_id}", get(routes::sharing::budget_access))
        .route(
            "/sharing/budgets/{budget_id}/invitations",
            get(routes::sharing::budget_invitations),
        )
        .route(
            "/sharing/access/{id}",
            axum::routing::delete(routes::sharing::revoke),
        )
        .route("/sharing/shared-with-me", get(routes::sharing::shared_with_me))
        // Sync
        .route("/sync/push", post(routes::sync::push))
        .route("/sync/pull", post(routes::sync::pull))
        .route("/sync/status", get(routes::sync::status))
        .route("/sync/resolve-conflict", post(routes::sync::resolve_conflict))
        .route("/sync/operations", get(routes::sync::operations))
        .route("/sync/cleanup", post(routes::sync::cleanup))
}

/// Full application: `/health` plus everything under `/api`, with the
/// transport layers applied.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    let timeout = state.config.request_timeout;

    Router::new()
        .route("/health", get(routes::health::health))
        .nest("/api", api_routes())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(timeout, enforce_timeout))
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            let request_id = req
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                request_id,
            )
        }))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
