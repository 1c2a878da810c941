//! Budget sharing query builders: invitations and access grants.

use sea_query::{Alias, Asterisk, Expr, Func, Order, Query, SqliteQueryBuilder};

use super::Built;
use super::tables::{ShareAccess, ShareInvitations};

const INVITATION_COLUMNS: [ShareInvitations; 9] = [
    ShareInvitations::Id,
    ShareInvitations::BudgetId,
    ShareInvitations::OwnerId,
    ShareInvitations::RecipientEmail,
    ShareInvitations::Permission,
    ShareInvitations::Status,
    ShareInvitations::CreatedAt,
    ShareInvitations::RespondedAt,
    ShareInvitations::ExpiresAt,
];

// ── Invitations ────────────────────────────────────────────────────────────

pub fn insert_invitation(
    id: &str,
    budget_id: &str,
    owner_id: &str,
    recipient_email: &str,
    permission: &str,
    created_at: &str,
    expires_at: &str,
) -> Built {
    Query::insert()
        .into_table(ShareInvitations::Table)
        .columns([
            ShareInvitations::Id,
            ShareInvitations::BudgetId,
            ShareInvitations::OwnerId,
            ShareInvitations::RecipientEmail,
            ShareInvitations::Permission,
            ShareInvitations::CreatedAt,
            ShareInvitations::ExpiresAt,
        ])
        .values_panic([
            id.into(),
            budget_id.into(),
            owner_id.into(),
            recipient_email.into(),
            permission.into(),
            created_at.into(),
            expires_at.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// Lookup an invitation by id.
pub fn get_invitation(id: &str) -> Built {
    Query::select()
        .columns(INVITATION_COLUMNS)
        .from(ShareInvitations::Table)
        .and_where(Expr::col(ShareInvitations::Id).eq(id))
        .build(SqliteQueryBuilder)
}

/// All invitations for one budget, newest first.
pub fn list_for_budget(budget_id: &str) -> Built {
    Query::select()
        .columns(INVITATION_COLUMNS)
        .from(ShareInvitations::Table)
        .and_where(Expr::col(ShareInvitations::BudgetId).eq(budget_id))
        .order_by(ShareInvitations::CreatedAt, Order::Desc)
        .build(SqliteQueryBuilder)
}

/// Pending, unexpired invitations addressed to an email, with budget and
/// owner details. Row order: the invitation columns, then budget name,
/// budget month, owner name.
pub fn list_pending_for_email(email: &str, now: &str) -> Built {
    let sql = concat!(
        "SELECT i.\"id\", i.\"budget_id\", i.\"owner_id\", i.\"recipient_email\", ",
        "i.\"permission\", i.\"status\", i.\"created_at\", i.\"responded_at\", i.\"expires_at\", ",
        "b.\"name\", b.\"month\", u.\"name\" ",
        "FROM \"share_invitations\" i ",
        "INNER JOIN \"budgets\" b ON b.\"id\" = i.\"budget_id\" ",
        "INNER JOIN \"users\" u ON u.\"id\" = i.\"owner_id\" ",
        "WHERE i.\"recipient_email\" = ? ",
        "AND i.\"status\" = 'pending' ",
        "AND i.\"expires_at\" > ? ",
        "AND b.\"deleted_at\" IS NULL ",
        "ORDER BY i.\"created_at\" DESC",
    )
    .to_string();
    (sql, sea_query::Values(vec![email.into(), now.into()]))
}

/// Count pending, unexpired invitations for the same budget and email.
pub fn pending_duplicate(budget_id: &str, email: &str, now: &str) -> Built {
    Query::select()
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("count"))
        .from(ShareInvitations::Table)
        .and_where(Expr::col(ShareInvitations::BudgetId).eq(budget_id))
        .and_where(Expr::col(ShareInvitations::RecipientEmail).eq(email))
        .and_where(Expr::col(ShareInvitations::Status).eq("pending"))
        .and_where(Expr::col(ShareInvitations::ExpiresAt).gt(now))
        .build(SqliteQueryBuilder)
}

/// Move a pending invitation to a terminal status. Matches nothing once the
/// invitation has left `pending`.
pub fn settle_invitation(id: &str, status: &str, responded_at: &str) -> Built {
    Query::update()
        .table(ShareInvitations::Table)
        .value(ShareInvitations::Status, status)
        .value(ShareInvitations::RespondedAt, responded_at)
        .and_where(Expr::col(ShareInvitations::Id).eq(id))
        .and_where(Expr::col(ShareInvitations::Status).eq("pending"))
        .build(SqliteQueryBuilder)
}

pub fn delete_invitation(id: &str) -> Built {
    Query::delete()
        .from_table(ShareInvitations::Table)
        .and_where(Expr::col(ShareInvitations::Id).eq(id))
        .build(SqliteQueryBuilder)
}

// ── Access grants ──────────────────────────────────────────────────────────

pub fn insert_access(
    id: &str,
    budget_id: &str,
    owner_id: &str,
    shared_with_id: &str,
    permission: &str,
    created_at: &str,
) -> Built {
    Query::insert()
        .into_table(ShareAccess::Table)
        .columns([
            ShareAccess::Id,
            ShareAccess::BudgetId,
            ShareAccess::OwnerId,
            ShareAccess::SharedWithId,
            ShareAccess::Permission,
            ShareAccess::CreatedAt,
        ])
        .values_panic([
            id.into(),
            budget_id.into(),
            owner_id.into(),
            shared_with_id.into(),
            permission.into(),
            created_at.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// Granted permission of a user on a budget.
pub fn access_level(budget_id: &str, user_id: &str) -> Built {
    Query::select()
        .column(ShareAccess::Permission)
        .from(ShareAccess::Table)
        .and_where(Expr::col(ShareAccess::BudgetId).eq(budget_id))
        .and_where(Expr::col(ShareAccess::SharedWithId).eq(user_id))
        .build(SqliteQueryBuilder)
}

/// Lookup a grant by id. Row order: id, budget_id, owner_id.
pub fn get_access(id: &str) -> Built {
    Query::select()
        .columns([ShareAccess::Id, ShareAccess::BudgetId, ShareAccess::OwnerId])
        .from(ShareAccess::Table)
        .and_where(Expr::col(ShareAccess::Id).eq(id))
        .build(SqliteQueryBuilder)
}

pub fn delete_access(id: &str) -> Built {
    Query::delete()
        .from_table(ShareAccess::Table)
        .and_where(Expr::col(ShareAccess::Id).eq(id))
        .build(SqliteQueryBuilder)
}

/// Whether a live user with this verified email already holds a grant on
/// the budget.
pub fn email_has_access(budget_id: &str, email: &str) -> Built {
    let sql = concat!(
        "SELECT COUNT(*) FROM \"share_access\" a ",
        "INNER JOIN \"users\" u ON u.\"id\" = a.\"shared_with_id\" ",
        "WHERE a.\"budget_id\" = ? AND u.\"email\" = ? AND u.\"email_verified\" = 1 ",
        "AND u.\"deleted_at\" IS NULL",
    )
    .to_string();
    (sql, sea_query::Values(vec![budget_id.into(), email.into()]))
}

/// Grants on a budget with collaborator identity. Row order: id, budget_id,
/// owner_id, shared_with_id, permission, created_at, email, name.
pub fn list_access(budget_id: &str) -> Built {
    let sql = concat!(
        "SELECT a.\"id\", a.\"budget_id\", a.\"owner_id\", a.\"shared_with_id\", ",
        "a.\"permission\", a.\"created_at\", u.\"email\", u.\"name\" ",
        "FROM \"share_access\" a ",
        "INNER JOIN \"users\" u ON u.\"id\" = a.\"shared_with_id\" ",
        "WHERE a.\"budget_id\" = ? ",
        "ORDER BY a.\"created_at\" ASC",
    )
    .to_string();
    (sql, sea_query::Values(vec![budget_id.into()]))
}

/// Live budgets shared with a user. Row order: access id, budget id, budget
/// name, month, total_limit, permission, owner id, owner name, shared at.
pub fn shared_with(user_id: &str) -> Built {
    let sql = concat!(
        "SELECT a.\"id\", b.\"id\", b.\"name\", b.\"month\", b.\"total_limit\", ",
        "a.\"permission\", a.\"owner_id\", u.\"name\", a.\"created_at\" ",
        "FROM \"share_access\" a ",
        "INNER JOIN \"budgets\" b ON b.\"id\" = a.\"budget_id\" ",
        "INNER JOIN \"users\" u ON u.\"id\" = a.\"owner_id\" ",
        "WHERE a.\"shared_with_id\" = ? AND b.\"deleted_at\" IS NULL ",
        "ORDER BY b.\"month\" DESC",
    )
    .to_string();
    (sql, sea_query::Values(vec![user_id.into()]))
}
