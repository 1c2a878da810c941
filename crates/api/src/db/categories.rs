//! Category query builders.

use sea_query::{Cond, Expr, Order, Query, SqliteQueryBuilder};

use super::Built;
use super::tables::Categories;

const CATEGORY_COLUMNS: [Categories; 10] = [
    Categories::Id,
    Categories::UserId,
    Categories::Name,
    Categories::Icon,
    Categories::Color,
    Categories::IsSystem,
    Categories::DefaultLimit,
    Categories::Revision,
    Categories::CreatedAt,
    Categories::UpdatedAt,
];

/// System categories plus the user's own, system first.
pub fn list_for_user(user_id: &str) -> Built {
    Query::select()
        .columns(CATEGORY_COLUMNS)
        .from(Categories::Table)
        .cond_where(
            Cond::any()
                .add(Expr::col(Categories::IsSystem).eq(true))
                .add(Expr::col(Categories::UserId).eq(user_id)),
        )
        .and_where(Expr::col(Categories::DeletedAt).is_null())
        .order_by(Categories::IsSystem, Order::Desc)
        .order_by(Categories::Name, Order::Asc)
        .build(SqliteQueryBuilder)
}

pub fn list_system() -> Built {
    Query::select()
        .columns(CATEGORY_COLUMNS)
        .from(Categories::Table)
        .and_where(Expr::col(Categories::IsSystem).eq(true))
        .order_by(Categories::Name, Order::Asc)
        .build(SqliteQueryBuilder)
}

/// Find a live category the user may file things under: a system category
/// or one of their own.
pub fn get_usable(id: &str, user_id: &str) -> Built {
    Query::select()
        .columns(CATEGORY_COLUMNS)
        .from(Categories::Table)
        .and_where(Expr::col(Categories::Id).eq(id))
        .and_where(Expr::col(Categories::DeletedAt).is_null())
        .cond_where(
            Cond::any()
                .add(Expr::col(Categories::IsSystem).eq(true))
                .add(Expr::col(Categories::UserId).eq(user_id)),
        )
        .build(SqliteQueryBuilder)
}

/// Find a live category by id.
pub fn get(id: &str) -> Built {
    Query::select()
        .columns(CATEGORY_COLUMNS)
        .from(Categories::Table)
        .and_where(Expr::col(Categories::Id).eq(id))
        .and_where(Expr::col(Categories::DeletedAt).is_null())
        .build(SqliteQueryBuilder)
}

pub fn insert(
    id: &str,
    user_id: &str,
    name: &str,
    icon: Option<&str>,
    color: &str,
    default_limit: Option<f64>,
    now: &str,
) -> Built {
    Query::insert()
        .into_table(Categories::Table)
        .columns([
            Categories::Id,
            Categories::UserId,
            Categories::Name,
            Categories::Icon,
            Categories::Color,
            Categories::DefaultLimit,
            Categories::CreatedAt,
            Categories::UpdatedAt,
        ])
        .values_panic([
            id.into(),
            user_id.into(),
            name.into(),
            icon.map(str::to_string).into(),
            color.into(),
            default_limit.into(),
            now.into(),
            now.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// Update the given fields and bump the revision.
pub fn update(
    id: &str,
    name: Option<&str>,
    icon: Option<&str>,
    color: Option<&str>,
    default_limit: Option<f64>,
    now: &str,
) -> Built {
    let mut q = Query::update();
    q.table(Categories::Table)
        .value(Categories::UpdatedAt, now)
        .value(Categories::Revision, Expr::col(Categories::Revision).add(1));
    if let Some(name) = name {
        q.value(Categories::Name, name);
    }
    if let Some(icon) = icon {
        q.value(Categories::Icon, icon);
    }
    if let Some(color) = color {
        q.value(Categories::Color, color);
    }
    if let Some(limit) = default_limit {
        q.value(Categories::DefaultLimit, limit);
    }
    q.and_where(Expr::col(Categories::Id).eq(id))
        .build(SqliteQueryBuilder)
}

pub fn soft_delete(id: &str, now: &str) -> Built {
    Query::update()
        .table(Categories::Table)
        .value(Categories::DeletedAt, now)
        .value(Categories::UpdatedAt, now)
        .value(Categories::Revision, Expr::col(Categories::Revision).add(1))
        .and_where(Expr::col(Categories::Id).eq(id))
        .build(SqliteQueryBuilder)
}
