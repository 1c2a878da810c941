use axum::extract::State;
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;

use budgetsync_api::service::{
    format_month, month_range, parse_budget_month, parse_date, trailing_months, trend_months,
};
use budgetsync_api::{
    CategoryReport, CategorySpending, DashboardResponse, DateRangeQuery, PermissionLevel,
    ServiceError, SpendingResponse, TrendPoint, TrendsQuery, TrendsResponse, db,
};

use crate::error::{ApiErr, ApiPath, ApiQuery};
use crate::routes::auth::AuthUser;
use crate::routes::{ApiResult, envelope};
use crate::storage::{
    Db, budget_from_row, category_from_row, db_err, query_all, query_one, transaction_from_row,
};

const TOP_CATEGORIES: usize = 5;
const RECENT_TRANSACTIONS: u64 = 5;

#[derive(Debug, Default, PartialEq)]
struct MonthTotals {
    income: f64,
    expenses: f64,
    count: i64,
}

fn month_totals(conn: &Connection, user_id: &str, month: NaiveDate) -> Result<MonthTotals, ServiceError> {
    let (start, end) = month_range(month);
    let rows: Vec<(String, f64, i64)> = query_all(
        conn,
        &db::transactions::totals_by_type(user_id, &start, &end),
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .map_err(db_err("month totals"))?;

    let mut totals = MonthTotals::default();
    for (kind, total, count) in rows {
        match kind.as_str() {
            "income" => totals.income += total,
            "expense" => totals.expenses += total,
            _ => {}
        }
        totals.count += count;
    }
    Ok(totals)
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        (part / whole * 10_000.0).round() / 100.0
    } else {
        0.0
    }
}

fn spending_by_category(
    conn: &Connection,
    user_id: &str,
    month: NaiveDate,
) -> Result<(f64, Vec<CategorySpending>), ServiceError> {
    let (start, end) = month_range(month);
    let rows: Vec<(Option<String>, String, String, f64, Option<f64>)> = query_all(
        conn,
        &db::transactions::spending_by_category(user_id, &start, &end),
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
    )
    .map_err(db_err("spending by category"))?;

    let total: f64 = rows.iter().map(|r| r.3).sum();
    let categories = rows
        .into_iter()
        .map(|(category_id, category_name, color, spent, limit)| CategorySpending {
            category_id,
            category_name,
            color,
            spent,
            limit,
            percentage: percentage(spent, total),
        })
        .collect();
    Ok((total, categories))
}

/// GET /api/analytics/dashboard/{month}
pub async fn dashboard(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(month): ApiPath<String>,
) -> ApiResult<DashboardResponse> {
    let month = parse_budget_month(&month)?;
    let conn = db.conn();

    let budget = query_one(
        &conn,
        &db::budgets::get_by_month(&user.user_id, &format_month(month)),
        |row| budget_from_row(row, PermissionLevel::Owner),
    )
    .map_err(db_err("load budget by month"))?;
    let totals = month_totals(&conn, &user.user_id, month)?;
    let (_, mut top_categories) = spending_by_category(&conn, &user.user_id, month)?;
    top_categories.truncate(TOP_CATEGORIES);
    let recent_transactions = query_all(
        &conn,
        &db::transactions::recent(&user.user_id, RECENT_TRANSACTIONS),
        transaction_from_row,
    )
    .map_err(db_err("recent transactions"))?;

    Ok(envelope(DashboardResponse {
        month: format_month(month),
        budget,
        total_income: totals.income,
        total_expenses: totals.expenses,
        net: totals.income - totals.expenses,
        transaction_count: totals.count,
        top_categories,
        recent_transactions,
    }))
}

/// GET /api/analytics/spending/{month}
pub async fn spending(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(month): ApiPath<String>,
) -> ApiResult<SpendingResponse> {
    let month = parse_budget_month(&month)?;
    let conn = db.conn();
    let (total, categories) = spending_by_category(&conn, &user.user_id, month)?;
    Ok(envelope(SpendingResponse {
        month: format_month(month),
        total,
        categories,
    }))
}

/// GET /api/analytics/trends?months=N — income and expenses for the last N
/// months, oldest first, ending with the current month.
pub async fn trends(
    State(db): State<Db>,
    user: AuthUser,
    ApiQuery(q): ApiQuery<TrendsQuery>,
) -> ApiResult<TrendsResponse> {
    let count = trend_months(q.months)?;
    let conn = db.conn();
    let months = trailing_months(Utc::now().date_naive(), count)
        .into_iter()
        .map(|month| -> Result<TrendPoint, ServiceError> {
            let totals = month_totals(&conn, &user.user_id, month)?;
            Ok(TrendPoint {
                month: month.format("%Y-%m").to_string(),
                income: totals.income,
                expenses: totals.expenses,
                net: totals.income - totals.expenses,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(envelope(TrendsResponse { months }))
}

/// GET /api/analytics/category/{categoryId}?startDate&endDate
pub async fn category_report(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(category_id): ApiPath<String>,
    ApiQuery(q): ApiQuery<DateRangeQuery>,
) -> ApiResult<CategoryReport> {
    let start = q
        .start_date
        .as_deref()
        .map(|d| parse_date("startDate", d).map(|d| d.format("%Y-%m-%d").to_string()))
        .transpose()?;
    let end = q
        .end_date
        .as_deref()
        .map(|d| parse_date("endDate", d).map(|d| d.format("%Y-%m-%d").to_string()))
        .transpose()?;

    let conn = db.conn();
    let category = query_one(
        &conn,
        &db::categories::get_usable(&category_id, &user.user_id),
        category_from_row,
    )
    .map_err(db_err("load category"))?
    .ok_or_else(|| ApiErr::not_found("category not found"))?;

    let (total, transaction_count): (f64, i64) = query_one(
        &conn,
        &db::transactions::category_totals(&user.user_id, &category_id, start.as_deref(), end.as_deref()),
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .map_err(db_err("category totals"))?
    .unwrap_or((0.0, 0));

    Ok(envelope(CategoryReport {
        category_id,
        category_name: category.name,
        start_date: start,
        end_date: end,
        total,
        transaction_count,
        average: if transaction_count > 0 {
            total / transaction_count as f64
        } else {
            0.0
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_to_two_places_and_handles_zero() {
        assert_eq!(percentage(1.0, 3.0), 33.33);
        assert_eq!(percentage(5.0, 0.0), 0.0);
        assert_eq!(percentage(50.0, 50.0), 100.0);
    }
}
