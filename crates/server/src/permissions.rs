//! Effective permission of a user on a budget.
//!
//! The owner always has [`PermissionLevel::Owner`]; anyone else has the level
//! stored on their access grant, or [`PermissionLevel::None`]. Nothing is
//! cached: every request recomputes, so revocations apply immediately.

use rusqlite::Connection;

use budgetsync_api::service::has_sufficient_permission;
use budgetsync_api::{PermissionLevel, ServiceError, db};

use crate::storage::{db_err, query_one};

/// Resolve the caller's level on a live budget. Unknown or tombstoned
/// budgets are `NotFound`.
pub fn resolve(
    conn: &Connection,
    user_id: &str,
    budget_id: &str,
) -> Result<PermissionLevel, ServiceError> {
    let owner: String = query_one(conn, &db::budgets::owner_of(budget_id), |row| row.get(0))
        .map_err(db_err("lookup budget owner"))?
        .ok_or_else(|| ServiceError::NotFound("budget not found".into()))?;

    if owner == user_id {
        return Ok(PermissionLevel::Owner);
    }

    let granted: Option<String> =
        query_one(conn, &db::sharing::access_level(budget_id, user_id), |row| row.get(0))
            .map_err(db_err("lookup budget access"))?;

    Ok(granted
        .as_deref()
        .and_then(PermissionLevel::parse_grant)
        .unwrap_or(PermissionLevel::None))
}

/// Resolve and fail with `Forbidden` when the caller's level is below
/// `required`. Returns the resolved level.
pub fn require_minimum(
    conn: &Connection,
    required: PermissionLevel,
    user_id: &str,
    budget_id: &str,
) -> Result<PermissionLevel, ServiceError> {
    let actual = resolve(conn, user_id, budget_id)?;
    if has_sufficient_permission(actual, required) {
        Ok(actual)
    } else {
        tracing::debug!(user_id, budget_id, %actual, %required, "access denied");
        Err(ServiceError::Forbidden(format!(
            "{required} access to this budget is required"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Db;
    use crate::test_support::{grant, seed_budget, seed_user};

    #[test]
    fn owner_short_circuits_access_rows() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        assert_eq!(resolve(&conn, &alice, &budget).unwrap(), PermissionLevel::Owner);
        grant(&conn, &budget, &alice, &bob, "view");
        assert_eq!(resolve(&conn, &bob, &budget).unwrap(), PermissionLevel::View);
        assert_eq!(resolve(&conn, &alice, &budget).unwrap(), PermissionLevel::Owner);
    }

    #[test]
    fn unshared_is_none_not_an_error() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let carol = seed_user(&conn, "carol@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        assert_eq!(resolve(&conn, &carol, &budget).unwrap(), PermissionLevel::None);
    }

    #[test]
    fn missing_and_deleted_budgets_are_not_found() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        assert!(matches!(
            resolve(&conn, &alice, "nope"),
            Err(ServiceError::NotFound(_))
        ));
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        crate::storage::execute(&conn, &db::budgets::soft_delete(&budget, "2025-01-02T00:00:00.000Z"))
            .unwrap();
        assert!(matches!(
            resolve(&conn, &alice, &budget),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn require_minimum_compares_levels() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        grant(&conn, &budget, &alice, &bob, "edit");

        assert!(require_minimum(&conn, PermissionLevel::View, &bob, &budget).is_ok());
        assert!(require_minimum(&conn, PermissionLevel::Edit, &bob, &budget).is_ok());
        assert!(matches!(
            require_minimum(&conn, PermissionLevel::Owner, &bob, &budget),
            Err(ServiceError::Forbidden(_))
        ));
        assert!(require_minimum(&conn, PermissionLevel::Owner, &alice, &budget).is_ok());
    }
}
