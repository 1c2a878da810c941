//! Fixtures shared by the unit tests.

use rusqlite::Connection;
use uuid::Uuid;

use budgetsync_api::db;

use crate::storage::execute;

pub const T0: &str = "2025-01-01T00:00:00.000Z";

/// Insert a user whose subject is `sub|<email>`. Returns the user id.
pub fn seed_user(conn: &Connection, email: &str) -> String {
    let id = Uuid::new_v4().to_string();
    let name = email.split('@').next().unwrap_or(email);
    execute(
        conn,
        &db::users::insert(&id, &format!("sub|{email}"), email, true, name, "USD", T0),
    )
    .unwrap();
    id
}

/// Insert a user whose email was typed in rather than taken from a token.
pub fn seed_unverified_user(conn: &Connection, email: &str) -> String {
    let id = Uuid::new_v4().to_string();
    execute(
        conn,
        &db::users::insert(&id, &format!("self|{id}"), email, false, "self", "USD", T0),
    )
    .unwrap();
    id
}

/// Insert a budget for `month` (`YYYY-MM-01`) with a 5000 limit.
pub fn seed_budget(conn: &Connection, owner: &str, month: &str) -> String {
    let id = Uuid::new_v4().to_string();
    execute(
        conn,
        &db::budgets::insert(&id, owner, Some("Monthly"), month, 5000.0, T0),
    )
    .unwrap();
    id
}

/// Grant `permission` on a budget directly, bypassing invitations.
pub fn grant(conn: &Connection, budget: &str, owner: &str, user: &str, permission: &str) -> String {
    let id = Uuid::new_v4().to_string();
    execute(
        conn,
        &db::sharing::insert_access(&id, budget, owner, user, permission, T0),
    )
    .unwrap();
    id
}
