//! Reflection query builders.

use sea_query::{Expr, Order, Query, SqliteQueryBuilder};

use super::Built;
use super::tables::{ReflectionTemplates, Reflections};

const REFLECTION_COLUMNS: [Reflections; 8] = [
    Reflections::Id,
    Reflections::UserId,
    Reflections::BudgetId,
    Reflections::OverallRating,
    Reflections::IsPrivate,
    Reflections::Notes,
    Reflections::CreatedAt,
    Reflections::UpdatedAt,
];

pub fn get(id: &str) -> Built {
    Query::select()
        .columns(REFLECTION_COLUMNS)
        .from(Reflections::Table)
        .and_where(Expr::col(Reflections::Id).eq(id))
        .build(SqliteQueryBuilder)
}

pub fn get_by_budget(budget_id: &str) -> Built {
    Query::select()
        .columns(REFLECTION_COLUMNS)
        .from(Reflections::Table)
        .and_where(Expr::col(Reflections::BudgetId).eq(budget_id))
        .build(SqliteQueryBuilder)
}

pub fn insert(
    id: &str,
    user_id: &str,
    budget_id: &str,
    overall_rating: Option<i64>,
    is_private: bool,
    notes: Option<&str>,
    now: &str,
) -> Built {
    Query::insert()
        .into_table(Reflections::Table)
        .columns([
            Reflections::Id,
            Reflections::UserId,
            Reflections::BudgetId,
            Reflections::OverallRating,
            Reflections::IsPrivate,
            Reflections::Notes,
            Reflections::CreatedAt,
            Reflections::UpdatedAt,
        ])
        .values_panic([
            id.into(),
            user_id.into(),
            budget_id.into(),
            overall_rating.into(),
            is_private.into(),
            notes.map(str::to_string).into(),
            now.into(),
            now.into(),
        ])
        .build(SqliteQueryBuilder)
}

pub fn update(
    id: &str,
    overall_rating: Option<i64>,
    is_private: Option<bool>,
    notes: Option<&str>,
    now: &str,
) -> Built {
    let mut q = Query::update();
    q.table(Reflections::Table).value(Reflections::UpdatedAt, now);
    if let Some(v) = overall_rating {
        q.value(Reflections::OverallRating, v);
    }
    if let Some(v) = is_private {
        q.value(Reflections::IsPrivate, v);
    }
    if let Some(v) = notes {
        q.value(Reflections::Notes, v);
    }
    q.and_where(Expr::col(Reflections::Id).eq(id))
        .build(SqliteQueryBuilder)
}

pub fn delete(id: &str) -> Built {
    Query::delete()
        .from_table(Reflections::Table)
        .and_where(Expr::col(Reflections::Id).eq(id))
        .build(SqliteQueryBuilder)
}

pub fn list_templates() -> Built {
    Query::select()
        .columns([ReflectionTemplates::Id, ReflectionTemplates::Prompt])
        .from(ReflectionTemplates::Table)
        .order_by(ReflectionTemplates::SortOrder, Order::Asc)
        .build(SqliteQueryBuilder)
}
