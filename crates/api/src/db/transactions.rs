//! Transaction query builders, including the analytics aggregates.

use sea_query::{
    Alias, Asterisk, Expr, Func, Order, Query, SelectStatement, SimpleExpr, SqliteQueryBuilder,
};

use super::Built;
use super::tables::Transactions;

const TRANSACTION_COLUMNS: [Transactions; 16] = [
    Transactions::Id,
    Transactions::UserId,
    Transactions::BudgetId,
    Transactions::CategoryId,
    Transactions::PaymentMethodId,
    Transactions::Amount,
    Transactions::TransactionType,
    Transactions::IsTransfer,
    Transactions::TransferToId,
    Transactions::Description,
    Transactions::TransactionDate,
    Transactions::IsRecurring,
    Transactions::RecurrencePattern,
    Transactions::Revision,
    Transactions::CreatedAt,
    Transactions::UpdatedAt,
];

/// List filter. When `budget_id` is set the listing covers every
/// collaborator's transactions in that budget; otherwise only `user_id`'s.
#[derive(Debug, Default)]
pub struct TransactionFilter<'a> {
    pub user_id: &'a str,
    pub budget_id: Option<&'a str>,
    pub category_id: Option<&'a str>,
    /// Inclusive `YYYY-MM-DD`.
    pub start_date: Option<&'a str>,
    /// Inclusive `YYYY-MM-DD`.
    pub end_date: Option<&'a str>,
}

fn apply_filter(q: &mut SelectStatement, f: &TransactionFilter<'_>) {
    q.and_where(Expr::col(Transactions::DeletedAt).is_null());
    match f.budget_id {
        Some(budget_id) => q.and_where(Expr::col(Transactions::BudgetId).eq(budget_id)),
        None => q.and_where(Expr::col(Transactions::UserId).eq(f.user_id)),
    };
    if let Some(category_id) = f.category_id {
        q.and_where(Expr::col(Transactions::CategoryId).eq(category_id));
    }
    if let Some(start) = f.start_date {
        q.and_where(Expr::col(Transactions::TransactionDate).gte(start));
    }
    if let Some(end) = f.end_date {
        q.and_where(Expr::col(Transactions::TransactionDate).lte(end));
    }
}

pub fn list(f: &TransactionFilter<'_>, limit: u32, offset: u32) -> Built {
    let mut q = Query::select();
    q.columns(TRANSACTION_COLUMNS).from(Transactions::Table);
    apply_filter(&mut q, f);
    q.order_by(Transactions::TransactionDate, Order::Desc)
        .order_by(Transactions::CreatedAt, Order::Desc)
        .limit(u64::from(limit))
        .offset(u64::from(offset))
        .build(SqliteQueryBuilder)
}

pub fn count(f: &TransactionFilter<'_>) -> Built {
    let mut q = Query::select();
    q.expr_as(Func::count(Expr::col(Asterisk)), Alias::new("count"))
        .from(Transactions::Table);
    apply_filter(&mut q, f);
    q.build(SqliteQueryBuilder)
}

/// A live transaction by id.
pub fn get(id: &str) -> Built {
    Query::select()
        .columns(TRANSACTION_COLUMNS)
        .from(Transactions::Table)
        .and_where(Expr::col(Transactions::Id).eq(id))
        .and_where(Expr::col(Transactions::DeletedAt).is_null())
        .build(SqliteQueryBuilder)
}

/// The most recent live transactions of a user.
pub fn recent(user_id: &str, limit: u64) -> Built {
    Query::select()
        .columns(TRANSACTION_COLUMNS)
        .from(Transactions::Table)
        .and_where(Expr::col(Transactions::UserId).eq(user_id))
        .and_where(Expr::col(Transactions::DeletedAt).is_null())
        .order_by(Transactions::TransactionDate, Order::Desc)
        .order_by(Transactions::CreatedAt, Order::Desc)
        .limit(limit)
        .build(SqliteQueryBuilder)
}

/// Values for a new transaction row.
#[derive(Debug)]
pub struct NewTransaction<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub budget_id: Option<&'a str>,
    pub category_id: Option<&'a str>,
    pub payment_method_id: Option<&'a str>,
    pub amount: f64,
    pub transaction_type: &'a str,
    pub transfer_to_id: Option<&'a str>,
    pub description: Option<&'a str>,
    pub transaction_date: &'a str,
    pub is_recurring: bool,
    pub recurrence_pattern: Option<String>,
}

pub fn insert(t: &NewTransaction<'_>, now: &str) -> Built {
    let opt = |s: Option<&str>| s.map(str::to_string);
    Query::insert()
        .into_table(Transactions::Table)
        .columns([
            Transactions::Id,
            Transactions::UserId,
            Transactions::BudgetId,
            Transactions::CategoryId,
            Transactions::PaymentMethodId,
            Transactions::Amount,
            Transactions::TransactionType,
            Transactions::IsTransfer,
            Transactions::TransferToId,
            Transactions::Description,
            Transactions::TransactionDate,
            Transactions::IsRecurring,
            Transactions::RecurrencePattern,
            Transactions::CreatedAt,
            Transactions::UpdatedAt,
        ])
        .values_panic([
            t.id.into(),
            t.user_id.into(),
            opt(t.budget_id).into(),
            opt(t.category_id).into(),
            opt(t.payment_method_id).into(),
            t.amount.into(),
            t.transaction_type.into(),
            (t.transaction_type == "transfer").into(),
            opt(t.transfer_to_id).into(),
            opt(t.description).into(),
            t.transaction_date.into(),
            t.is_recurring.into(),
            t.recurrence_pattern.clone().into(),
            now.into(),
            now.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// Field changes for an update; `None` leaves a field unchanged.
#[derive(Debug, Default)]
pub struct TransactionChanges<'a> {
    pub category_id: Option<&'a str>,
    pub payment_method_id: Option<&'a str>,
    pub amount: Option<f64>,
    pub transaction_type: Option<&'a str>,
    pub description: Option<&'a str>,
    pub transaction_date: Option<&'a str>,
    pub is_recurring: Option<bool>,
    pub recurrence_pattern: Option<String>,
}

pub fn update(id: &str, c: &TransactionChanges<'_>, now: &str) -> Built {
    let mut q = Query::update();
    q.table(Transactions::Table)
        .value(Transactions::UpdatedAt, now)
        .value(Transactions::Revision, Expr::col(Transactions::Revision).add(1));
    if let Some(v) = c.category_id {
        q.value(Transactions::CategoryId, v);
    }
    if let Some(v) = c.payment_method_id {
        q.value(Transactions::PaymentMethodId, v);
    }
    if let Some(v) = c.amount {
        q.value(Transactions::Amount, v);
    }
    if let Some(v) = c.transaction_type {
        q.value(Transactions::TransactionType, v);
        q.value(Transactions::IsTransfer, v == "transfer");
    }
    if let Some(v) = c.description {
        q.value(Transactions::Description, v);
    }
    if let Some(v) = c.transaction_date {
        q.value(Transactions::TransactionDate, v);
    }
    if let Some(v) = c.is_recurring {
        q.value(Transactions::IsRecurring, v);
    }
    if let Some(v) = &c.recurrence_pattern {
        q.value(Transactions::RecurrencePattern, v.as_str());
    }
    q.and_where(Expr::col(Transactions::Id).eq(id))
        .build(SqliteQueryBuilder)
}

pub fn soft_delete(id: &str, now: &str) -> Built {
    Query::update()
        .table(Transactions::Table)
        .value(Transactions::DeletedAt, now)
        .value(Transactions::UpdatedAt, now)
        .value(Transactions::Revision, Expr::col(Transactions::Revision).add(1))
        .and_where(Expr::col(Transactions::Id).eq(id))
        .build(SqliteQueryBuilder)
}

// ── Analytics ──────────────────────────────────────────────────────────────

/// Totals per transaction type in `[start, end)`.
/// Row order: transaction_type, total, count.
pub fn totals_by_type(user_id: &str, start: &str, end: &str) -> Built {
    let sql = concat!(
        "SELECT \"transaction_type\", COALESCE(SUM(\"amount\"), 0), COUNT(*) ",
        "FROM \"transactions\" ",
        "WHERE \"user_id\" = ? AND \"deleted_at\" IS NULL ",
        "AND \"transaction_date\" >= ? AND \"transaction_date\" < ? ",
        "GROUP BY \"transaction_type\"",
    )
    .to_string();
    (
        sql,
        sea_query::Values(vec![user_id.into(), start.into(), end.into()]),
    )
}

/// Expense totals per category in `[start, end)`, largest first. The limit
/// comes from the budget allocation for that month when one exists.
/// Row order: category_id, name, color, spent, limit.
pub fn spending_by_category(user_id: &str, start: &str, end: &str) -> Built {
    let sql = concat!(
        "SELECT t.\"category_id\", COALESCE(c.\"name\", 'Uncategorized'), ",
        "COALESCE(c.\"color\", '#6B7280'), SUM(t.\"amount\"), ",
        "(SELECT bc.\"limit_amount\" FROM \"budget_categories\" bc ",
        "INNER JOIN \"budgets\" b ON b.\"id\" = bc.\"budget_id\" ",
        "WHERE bc.\"category_id\" = t.\"category_id\" AND b.\"user_id\" = ? ",
        "AND b.\"month\" = ? AND b.\"deleted_at\" IS NULL) ",
        "FROM \"transactions\" t ",
        "LEFT JOIN \"categories\" c ON c.\"id\" = t.\"category_id\" ",
        "WHERE t.\"user_id\" = ? AND t.\"deleted_at\" IS NULL ",
        "AND t.\"transaction_type\" = 'expense' ",
        "AND t.\"transaction_date\" >= ? AND t.\"transaction_date\" < ? ",
        "GROUP BY t.\"category_id\" ",
        "ORDER BY SUM(t.\"amount\") DESC",
    )
    .to_string();
    (
        sql,
        sea_query::Values(vec![
            user_id.into(),
            start.into(),
            user_id.into(),
            start.into(),
            end.into(),
        ]),
    )
}

/// Expense total and count for one category, optionally within inclusive dates.
/// Row order: total, count.
pub fn category_totals(
    user_id: &str,
    category_id: &str,
    start: Option<&str>,
    end: Option<&str>,
) -> Built {
    let mut q = Query::select();
    q.expr(Func::coalesce([
        SimpleExpr::from(Func::sum(Expr::col(Transactions::Amount))),
        Expr::val(0.0).into(),
    ]))
    .expr(Func::count(Expr::col(Asterisk)))
    .from(Transactions::Table)
    .and_where(Expr::col(Transactions::UserId).eq(user_id))
    .and_where(Expr::col(Transactions::CategoryId).eq(category_id))
    .and_where(Expr::col(Transactions::TransactionType).eq("expense"))
    .and_where(Expr::col(Transactions::DeletedAt).is_null());
    if let Some(start) = start {
        q.and_where(Expr::col(Transactions::TransactionDate).gte(start));
    }
    if let Some(end) = end {
        q.and_where(Expr::col(Transactions::TransactionDate).lte(end));
    }
    q.build(SqliteQueryBuilder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_filter_replaces_owner_filter() {
        let f = TransactionFilter {
            user_id: "u1",
            budget_id: Some("b1"),
            ..Default::default()
        };
        let (sql, values) = list(&f, 50, 0);
        assert!(sql.contains(r#""budget_id" = ?"#));
        assert!(!sql.contains(r#""user_id" = ?"#));
        assert!(values.0.contains(&"b1".into()));
    }

    #[test]
    fn date_bounds_are_inclusive() {
        let f = TransactionFilter {
            user_id: "u1",
            start_date: Some("2025-01-01"),
            end_date: Some("2025-01-31"),
            ..Default::default()
        };
        let (sql, _) = count(&f);
        assert!(sql.contains(r#""transaction_date" >= ?"#));
        assert!(sql.contains(r#""transaction_date" <= ?"#));
    }
}
