use axum::extract::State;
use chrono::Utc;

use budgetsync_api::{
    ResolveConflictRequest, ResolveConflictResponse, SyncCleanupRequest, SyncCleanupResponse,
    SyncOperationRecord, SyncOperationsQuery, SyncPullRequest, SyncPullResponse, SyncPushRequest,
    SyncPushResponse, SyncStatusResponse,
};

use crate::config::AppConfig;
use crate::error::{ApiJson, ApiQuery};
use crate::reconcile;
use crate::routes::auth::AuthUser;
use crate::routes::{ApiResult, envelope};
use crate::storage::Db;

/// POST /api/sync/push — apply a batch of offline mutations in order.
pub async fn push(
    State(db): State<Db>,
    State(config): State<AppConfig>,
    user: AuthUser,
    ApiJson(req): ApiJson<SyncPushRequest>,
) -> ApiResult<SyncPushResponse> {
    let conn = db.conn();
    let response = reconcile::push(
        &conn,
        &user.user_id,
        &req.operations,
        config.sync_push_max_operations,
        Utc::now(),
    )?;
    Ok(envelope(response))
}

/// POST /api/sync/pull — records changed since `lastSyncTime`.
pub async fn pull(
    State(db): State<Db>,
    State(config): State<AppConfig>,
    user: AuthUser,
    ApiJson(req): ApiJson<SyncPullRequest>,
) -> ApiResult<SyncPullResponse> {
    let conn = db.conn();
    let response = reconcile::pull(
        &conn,
        &user.user_id,
        req.last_sync_time.as_deref(),
        config.sync_pull_limit,
        Utc::now(),
    )?;
    Ok(envelope(response))
}

/// GET /api/sync/status
pub async fn status(State(db): State<Db>, user: AuthUser) -> ApiResult<SyncStatusResponse> {
    let conn = db.conn();
    Ok(envelope(reconcile::status(&conn, &user.user_id)?))
}

/// POST /api/sync/resolve-conflict
pub async fn resolve_conflict(
    State(db): State<Db>,
    user: AuthUser,
    ApiJson(req): ApiJson<ResolveConflictRequest>,
) -> ApiResult<ResolveConflictResponse> {
    let mut conn = db.conn();
    let response = reconcile::resolve_conflict(&mut conn, &user.user_id, &req, Utc::now())?;
    Ok(envelope(response))
}

/// GET /api/sync/operations?status=
pub async fn operations(
    State(db): State<Db>,
    user: AuthUser,
    ApiQuery(q): ApiQuery<SyncOperationsQuery>,
) -> ApiResult<Vec<SyncOperationRecord>> {
    let conn = db.conn();
    Ok(envelope(reconcile::list_operations(&conn, &user.user_id, q.status.as_deref())?))
}

/// POST /api/sync/cleanup — drop settled operations older than N days.
pub async fn cleanup(
    State(db): State<Db>,
    user: AuthUser,
    ApiJson(req): ApiJson<SyncCleanupRequest>,
) -> ApiResult<SyncCleanupResponse> {
    let conn = db.conn();
    Ok(envelope(reconcile::cleanup(&conn, &user.user_id, req.older_than_days, Utc::now())?))
}
