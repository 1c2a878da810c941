//! Table-generic builders for syncable records.
//!
//! Column lists come from [`SyncTable::fields`]; every SELECT returns the
//! bookkeeping columns first (see [`META_COLUMNS`]) followed by the data
//! fields in layout order.

use sea_query::{Alias, Expr, Order, Query, SelectStatement, SimpleExpr, SqliteQueryBuilder};

use super::Built;
use crate::SyncTable;
use crate::records::{FieldValue, SyncField};

/// Leading columns of every record SELECT, in row order.
pub const META_COLUMNS: [&str; 6] = [
    "id",
    "user_id",
    "revision",
    "created_at",
    "updated_at",
    "deleted_at",
];

fn col(name: &str) -> Alias {
    Alias::new(name)
}

fn select_columns(table: SyncTable) -> SelectStatement {
    let mut q = Query::select();
    q.columns(META_COLUMNS.iter().map(|c| col(c)))
        .columns(table.fields().iter().map(|f| col(f.column)))
        .from(col(table.as_str()));
    q
}

/// A record by id, tombstoned or not, whoever owns it.
pub fn select(table: SyncTable, id: &str) -> Built {
    select_columns(table)
        .and_where(Expr::col(col("id")).eq(id))
        .build(SqliteQueryBuilder)
}

/// A user's records (tombstones included) changed after `since` and
/// strictly before `before`, in `(updated_at, id)` order, at most `limit`
/// rows.
pub fn changed_since(
    table: SyncTable,
    user_id: &str,
    since: Option<&str>,
    before: &str,
    limit: u64,
) -> Built {
    let mut q = select_columns(table);
    q.and_where(Expr::col(col("user_id")).eq(user_id));
    if let Some(since) = since {
        q.and_where(Expr::col(col("updated_at")).gt(since));
    }
    q.and_where(Expr::col(col("updated_at")).lt(before));
    q.order_by(col("updated_at"), Order::Asc)
        .order_by(col("id"), Order::Asc)
        .limit(limit)
        .build(SqliteQueryBuilder)
}

/// Every record of a user stamped exactly `updated_at`.
pub fn changed_at(table: SyncTable, user_id: &str, updated_at: &str) -> Built {
    select_columns(table)
        .and_where(Expr::col(col("user_id")).eq(user_id))
        .and_where(Expr::col(col("updated_at")).eq(updated_at))
        .order_by(col("id"), Order::Asc)
        .build(SqliteQueryBuilder)
}

/// Insert a record at revision 1.
pub fn insert(
    table: SyncTable,
    id: &str,
    user_id: &str,
    fields: Vec<(&'static SyncField, FieldValue)>,
    now: &str,
) -> Built {
    let mut columns = vec![col("id"), col("user_id"), col("created_at"), col("updated_at")];
    let mut values: Vec<SimpleExpr> = vec![id.into(), user_id.into(), now.into(), now.into()];
    for (f, v) in fields {
        columns.push(col(f.column));
        values.push(sea_query::Value::from(v).into());
    }
    Query::insert()
        .into_table(col(table.as_str()))
        .columns(columns)
        .values_panic(values)
        .build(SqliteQueryBuilder)
}

/// Write the given fields, bump the revision and clear any tombstone.
pub fn update(
    table: SyncTable,
    id: &str,
    fields: Vec<(&'static SyncField, FieldValue)>,
    now: &str,
) -> Built {
    let mut q = Query::update();
    q.table(col(table.as_str()))
        .value(col("updated_at"), now)
        .value(col("deleted_at"), Option::<String>::None)
        .value(col("revision"), Expr::col(col("revision")).add(1));
    for (f, v) in fields {
        q.value(col(f.column), sea_query::Value::from(v));
    }
    q.and_where(Expr::col(col("id")).eq(id))
        .build(SqliteQueryBuilder)
}

/// Tombstone a record and bump its revision.
pub fn tombstone(table: SyncTable, id: &str, now: &str) -> Built {
    Query::update()
        .table(col(table.as_str()))
        .value(col("deleted_at"), now)
        .value(col("updated_at"), now)
        .value(col("revision"), Expr::col(col("revision")).add(1))
        .and_where(Expr::col(col("id")).eq(id))
        .build(SqliteQueryBuilder)
}
