//! User query builders.

use sea_query::{Alias, Asterisk, Cond, Expr, Func, Query, SqliteQueryBuilder};

use super::Built;
use super::tables::Users;

/// Column order shared by every user SELECT below.
const USER_COLUMNS: [Users; 7] = [
    Users::Id,
    Users::Email,
    Users::Name,
    Users::Currency,
    Users::CreatedAt,
    Users::UpdatedAt,
    Users::EmailVerified,
];

/// Find a live user by internal id.
pub fn get_by_id(user_id: &str) -> Built {
    Query::select()
        .columns(USER_COLUMNS)
        .from(Users::Table)
        .and_where(Expr::col(Users::Id).eq(user_id))
        .and_where(Expr::col(Users::DeletedAt).is_null())
        .build(SqliteQueryBuilder)
}

/// Find a live user by identity-provider subject.
pub fn get_by_external_id(external_id: &str) -> Built {
    Query::select()
        .columns(USER_COLUMNS)
        .from(Users::Table)
        .and_where(Expr::col(Users::ExternalId).eq(external_id))
        .and_where(Expr::col(Users::DeletedAt).is_null())
        .build(SqliteQueryBuilder)
}

/// Count users (live or tombstoned) holding a subject, or holding a
/// verified email when the new one is verified too. Self-declared emails
/// never block anyone.
pub fn identity_taken(external_id: &str, email: &str, email_verified: bool) -> Built {
    let mut cond = Cond::any().add(Expr::col(Users::ExternalId).eq(external_id));
    if email_verified {
        cond = cond.add(
            Expr::col(Users::Email)
                .eq(email)
                .and(Expr::col(Users::EmailVerified).eq(true)),
        );
    }
    Query::select()
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("count"))
        .from(Users::Table)
        .cond_where(cond)
        .build(SqliteQueryBuilder)
}

/// Insert a freshly onboarded user.
pub fn insert(
    id: &str,
    external_id: &str,
    email: &str,
    email_verified: bool,
    name: &str,
    currency: &str,
    now: &str,
) -> Built {
    Query::insert()
        .into_table(Users::Table)
        .columns([
            Users::Id,
            Users::ExternalId,
            Users::Email,
            Users::EmailVerified,
            Users::Name,
            Users::Currency,
            Users::CreatedAt,
            Users::UpdatedAt,
        ])
        .values_panic([
            id.into(),
            external_id.into(),
            email.into(),
            email_verified.into(),
            name.into(),
            currency.into(),
            now.into(),
            now.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// Update profile fields; `None` leaves a field unchanged.
pub fn update_profile(user_id: &str, name: Option<&str>, currency: Option<&str>, now: &str) -> Built {
    let mut q = Query::update();
    q.table(Users::Table).value(Users::UpdatedAt, now);
    if let Some(name) = name {
        q.value(Users::Name, name);
    }
    if let Some(currency) = currency {
        q.value(Users::Currency, currency);
    }
    q.and_where(Expr::col(Users::Id).eq(user_id))
        .build(SqliteQueryBuilder)
}

/// Tombstone a user. The row stays so their subject cannot re-onboard.
pub fn soft_delete(user_id: &str, now: &str) -> Built {
    Query::update()
        .table(Users::Table)
        .value(Users::DeletedAt, now)
        .value(Users::UpdatedAt, now)
        .and_where(Expr::col(Users::Id).eq(user_id))
        .and_where(Expr::col(Users::DeletedAt).is_null())
        .build(SqliteQueryBuilder)
}
