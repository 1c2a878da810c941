//! Sync bookkeeping query builders: persisted operations and per-user state.

use sea_query::{Alias, Asterisk, Expr, Func, Order, Query, SimpleExpr, SqliteQueryBuilder};

use super::Built;
use super::tables::{SyncOperations, SyncState};

const OPERATION_COLUMNS: [SyncOperations; 12] = [
    SyncOperations::Id,
    SyncOperations::TableName,
    SyncOperations::RecordId,
    SyncOperations::Operation,
    SyncOperations::LocalPayload,
    SyncOperations::ServerPayload,
    SyncOperations::Status,
    SyncOperations::Resolution,
    SyncOperations::ErrorMessage,
    SyncOperations::CreatedAt,
    SyncOperations::ResolvedAt,
    SyncOperations::UserId,
];

// ── Operations ─────────────────────────────────────────────────────────────

/// Values for a persisted operation.
#[derive(Debug)]
pub struct NewOperation<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub table: &'a str,
    pub record_id: &'a str,
    pub operation: &'a str,
    pub local_payload: &'a str,
    pub server_payload: Option<&'a str>,
    pub status: &'a str,
    pub error: Option<&'a str>,
}

pub fn insert_operation(op: &NewOperation<'_>, now: &str) -> Built {
    Query::insert()
        .into_table(SyncOperations::Table)
        .columns([
            SyncOperations::Id,
            SyncOperations::UserId,
            SyncOperations::TableName,
            SyncOperations::RecordId,
            SyncOperations::Operation,
            SyncOperations::LocalPayload,
            SyncOperations::ServerPayload,
            SyncOperations::Status,
            SyncOperations::ErrorMessage,
            SyncOperations::CreatedAt,
        ])
        .values_panic([
            op.id.into(),
            op.user_id.into(),
            op.table.into(),
            op.record_id.into(),
            op.operation.into(),
            op.local_payload.into(),
            op.server_payload.map(str::to_string).into(),
            op.status.into(),
            op.error.map(str::to_string).into(),
            now.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// An operation by id, regardless of owner. The caller checks `user_id`
/// (last column).
pub fn get_operation(id: &str) -> Built {
    Query::select()
        .columns(OPERATION_COLUMNS)
        .from(SyncOperations::Table)
        .and_where(Expr::col(SyncOperations::Id).eq(id))
        .build(SqliteQueryBuilder)
}

/// A user's operations, oldest first, optionally filtered by status.
pub fn list_operations(user_id: &str, status: Option<&str>) -> Built {
    let mut q = Query::select();
    q.columns(OPERATION_COLUMNS)
        .from(SyncOperations::Table)
        .and_where(Expr::col(SyncOperations::UserId).eq(user_id));
    if let Some(status) = status {
        q.and_where(Expr::col(SyncOperations::Status).eq(status));
    }
    q.order_by(SyncOperations::CreatedAt, Order::Asc)
        .build(SqliteQueryBuilder)
}

/// Record the outcome of a resolution attempt.
pub fn settle_operation(
    id: &str,
    status: &str,
    resolution: &str,
    error: Option<&str>,
    resolved_at: Option<&str>,
) -> Built {
    Query::update()
        .table(SyncOperations::Table)
        .value(SyncOperations::Status, status)
        .value(SyncOperations::Resolution, resolution)
        .value(SyncOperations::ErrorMessage, error.map(str::to_string))
        .value(SyncOperations::ResolvedAt, resolved_at.map(str::to_string))
        .and_where(Expr::col(SyncOperations::Id).eq(id))
        .build(SqliteQueryBuilder)
}

/// Operation counts per status for a user. Row order: status, count.
pub fn count_by_status(user_id: &str) -> Built {
    Query::select()
        .column(SyncOperations::Status)
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("count"))
        .from(SyncOperations::Table)
        .and_where(Expr::col(SyncOperations::UserId).eq(user_id))
        .group_by_col(SyncOperations::Status)
        .build(SqliteQueryBuilder)
}

/// Delete a user's settled operations created or resolved before `cutoff`.
pub fn delete_settled(user_id: &str, cutoff: &str) -> Built {
    Query::delete()
        .from_table(SyncOperations::Table)
        .and_where(Expr::col(SyncOperations::UserId).eq(user_id))
        .and_where(Expr::col(SyncOperations::Status).is_in(["resolved", "applied"]))
        .and_where(
            Expr::expr(Func::coalesce([
                SimpleExpr::from(Expr::col(SyncOperations::ResolvedAt)),
                SimpleExpr::from(Expr::col(SyncOperations::CreatedAt)),
            ]))
            .lt(cutoff),
        )
        .build(SqliteQueryBuilder)
}

// ── Per-user state ─────────────────────────────────────────────────────────

pub fn get_last_sync(user_id: &str) -> Built {
    Query::select()
        .column(SyncState::LastSyncAt)
        .from(SyncState::Table)
        .and_where(Expr::col(SyncState::UserId).eq(user_id))
        .build(SqliteQueryBuilder)
}

/// Upsert the user's last sync instant.
pub fn set_last_sync(user_id: &str, at: &str) -> Built {
    let sql = concat!(
        "INSERT INTO \"sync_state\" (\"user_id\", \"last_sync_at\") VALUES (?, ?) ",
        "ON CONFLICT(\"user_id\") DO UPDATE SET \"last_sync_at\" = excluded.\"last_sync_at\"",
    )
    .to_string();
    (sql, sea_query::Values(vec![user_id.into(), at.into()]))
}
