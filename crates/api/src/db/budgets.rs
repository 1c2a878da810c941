//! Budget and budget-category query builders.

use sea_query::{Alias, Asterisk, Expr, Func, Query, SqliteQueryBuilder};

use super::Built;
use super::tables::{BudgetCategories, Budgets};

/// Budget columns plus `spent` (sum of live expense transactions). Row order:
/// id, user_id, name, month, total_limit, revision, created_at, updated_at, spent.
const BUDGET_SELECT: &str = concat!(
    "SELECT b.\"id\", b.\"user_id\", b.\"name\", b.\"month\", b.\"total_limit\", ",
    "b.\"revision\", b.\"created_at\", b.\"updated_at\", ",
    "COALESCE((SELECT SUM(t.\"amount\") FROM \"transactions\" t ",
    "WHERE t.\"budget_id\" = b.\"id\" AND t.\"deleted_at\" IS NULL ",
    "AND t.\"transaction_type\" = 'expense'), 0) AS \"spent\" ",
    "FROM \"budgets\" b ",
);

/// A live budget with spending totals.
pub fn get(id: &str) -> Built {
    let sql = format!("{BUDGET_SELECT}WHERE b.\"id\" = ? AND b.\"deleted_at\" IS NULL");
    (sql, sea_query::Values(vec![id.into()]))
}

/// All live budgets owned by a user, newest month first.
pub fn list_for_user(user_id: &str) -> Built {
    let sql = format!(
        "{BUDGET_SELECT}WHERE b.\"user_id\" = ? AND b.\"deleted_at\" IS NULL ORDER BY b.\"month\" DESC"
    );
    (sql, sea_query::Values(vec![user_id.into()]))
}

/// The user's live budget for a month (`YYYY-MM-01`).
pub fn get_by_month(user_id: &str, month: &str) -> Built {
    let sql = format!(
        "{BUDGET_SELECT}WHERE b.\"user_id\" = ? AND b.\"month\" = ? AND b.\"deleted_at\" IS NULL"
    );
    (sql, sea_query::Values(vec![user_id.into(), month.into()]))
}

/// Owner id of a live budget. Drives the permission resolver.
pub fn owner_of(id: &str) -> Built {
    Query::select()
        .column(Budgets::UserId)
        .from(Budgets::Table)
        .and_where(Expr::col(Budgets::Id).eq(id))
        .and_where(Expr::col(Budgets::DeletedAt).is_null())
        .build(SqliteQueryBuilder)
}

/// Count the user's live budgets for a month.
pub fn month_taken(user_id: &str, month: &str) -> Built {
    Query::select()
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("count"))
        .from(Budgets::Table)
        .and_where(Expr::col(Budgets::UserId).eq(user_id))
        .and_where(Expr::col(Budgets::Month).eq(month))
        .and_where(Expr::col(Budgets::DeletedAt).is_null())
        .build(SqliteQueryBuilder)
}

pub fn insert(
    id: &str,
    user_id: &str,
    name: Option<&str>,
    month: &str,
    total_limit: f64,
    now: &str,
) -> Built {
    Query::insert()
        .into_table(Budgets::Table)
        .columns([
            Budgets::Id,
            Budgets::UserId,
            Budgets::Name,
            Budgets::Month,
            Budgets::TotalLimit,
            Budgets::CreatedAt,
            Budgets::UpdatedAt,
        ])
        .values_panic([
            id.into(),
            user_id.into(),
            name.map(str::to_string).into(),
            month.into(),
            total_limit.into(),
            now.into(),
            now.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// Update the given fields and bump the revision.
pub fn update(id: &str, name: Option<&str>, total_limit: Option<f64>, now: &str) -> Built {
    let mut q = Query::update();
    q.table(Budgets::Table)
        .value(Budgets::UpdatedAt, now)
        .value(Budgets::Revision, Expr::col(Budgets::Revision).add(1));
    if let Some(name) = name {
        q.value(Budgets::Name, name);
    }
    if let Some(limit) = total_limit {
        q.value(Budgets::TotalLimit, limit);
    }
    q.and_where(Expr::col(Budgets::Id).eq(id))
        .build(SqliteQueryBuilder)
}

pub fn soft_delete(id: &str, now: &str) -> Built {
    Query::update()
        .table(Budgets::Table)
        .value(Budgets::DeletedAt, now)
        .value(Budgets::UpdatedAt, now)
        .value(Budgets::Revision, Expr::col(Budgets::Revision).add(1))
        .and_where(Expr::col(Budgets::Id).eq(id))
        .build(SqliteQueryBuilder)
}

// ── Budget categories ──────────────────────────────────────────────────────

/// Allocations of a budget. Row order: id, budget_id, category_id,
/// category name, color, limit_amount, spent.
pub fn list_categories(budget_id: &str) -> Built {
    let sql = concat!(
        "SELECT bc.\"id\", bc.\"budget_id\", bc.\"category_id\", c.\"name\", c.\"color\", ",
        "bc.\"limit_amount\", ",
        "COALESCE((SELECT SUM(t.\"amount\") FROM \"transactions\" t ",
        "WHERE t.\"budget_id\" = bc.\"budget_id\" AND t.\"category_id\" = bc.\"category_id\" ",
        "AND t.\"deleted_at\" IS NULL AND t.\"transaction_type\" = 'expense'), 0) ",
        "FROM \"budget_categories\" bc ",
        "INNER JOIN \"categories\" c ON c.\"id\" = bc.\"category_id\" ",
        "WHERE bc.\"budget_id\" = ? ",
        "ORDER BY c.\"name\" ASC",
    )
    .to_string();
    (sql, sea_query::Values(vec![budget_id.into()]))
}

/// Single allocation with the same row order as [`list_categories`].
pub fn get_category(id: &str) -> Built {
    let sql = concat!(
        "SELECT bc.\"id\", bc.\"budget_id\", bc.\"category_id\", c.\"name\", c.\"color\", ",
        "bc.\"limit_amount\", ",
        "COALESCE((SELECT SUM(t.\"amount\") FROM \"transactions\" t ",
        "WHERE t.\"budget_id\" = bc.\"budget_id\" AND t.\"category_id\" = bc.\"category_id\" ",
        "AND t.\"deleted_at\" IS NULL AND t.\"transaction_type\" = 'expense'), 0) ",
        "FROM \"budget_categories\" bc ",
        "INNER JOIN \"categories\" c ON c.\"id\" = bc.\"category_id\" ",
        "WHERE bc.\"id\" = ?",
    )
    .to_string();
    (sql, sea_query::Values(vec![id.into()]))
}

pub fn insert_category(id: &str, budget_id: &str, category_id: &str, limit: f64, now: &str) -> Built {
    Query::insert()
        .into_table(BudgetCategories::Table)
        .columns([
            BudgetCategories::Id,
            BudgetCategories::BudgetId,
            BudgetCategories::CategoryId,
            BudgetCategories::LimitAmount,
            BudgetCategories::CreatedAt,
            BudgetCategories::UpdatedAt,
        ])
        .values_panic([
            id.into(),
            budget_id.into(),
            category_id.into(),
            limit.into(),
            now.into(),
            now.into(),
        ])
        .build(SqliteQueryBuilder)
}

pub fn update_category_limit(id: &str, limit: f64, now: &str) -> Built {
    Query::update()
        .table(BudgetCategories::Table)
        .value(BudgetCategories::LimitAmount, limit)
        .value(BudgetCategories::UpdatedAt, now)
        .and_where(Expr::col(BudgetCategories::Id).eq(id))
        .build(SqliteQueryBuilder)
}

pub fn delete_category(id: &str) -> Built {
    Query::delete()
        .from_table(BudgetCategories::Table)
        .and_where(Expr::col(BudgetCategories::Id).eq(id))
        .build(SqliteQueryBuilder)
}
