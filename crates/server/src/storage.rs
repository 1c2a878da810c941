use anyhow::{Context, Result};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{Connection, OptionalExtension, Row, params_from_iter};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use budgetsync_api::db::Built;
use budgetsync_api::db::migrations::MIGRATIONS;
use budgetsync_api::{
    Budget, BudgetCategory, Category, Invitation, InvitationStatus, PaymentMethod,
    PaymentMethodType, PermissionLevel, Reflection, ServiceError, ShareAccess, SharedBudget,
    SyncOperationRecord, SyncStatus, Transaction, TransactionType, User,
};

/// Shared database state
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Check out the connection. Never hold the guard across an `.await`.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves SQLite itself consistent.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fresh in-memory database with all migrations applied.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Initialize the database: open connection, enable WAL, run migrations
pub fn init_db(db_path: &Path) -> Result<Db> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let conn = Connection::open(db_path).context("opening SQLite database")?;

    // Enable WAL mode for better concurrent read performance
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;

    Db::prepare(conn)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;

        if !already_applied {
            conn.execute_batch(sql)
                .with_context(|| format!("running migration {name}"))?;
            conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])?;
            tracing::info!("Applied migration: {name}");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Query helpers
// ---------------------------------------------------------------------------

/// Convert `sea_query::Values` into rusqlite bind parameters.
pub fn bind(values: &sea_query::Values) -> Vec<SqlValue> {
    use sea_query::Value as Sq;
    values
        .0
        .iter()
        .map(|v| {
            let bound = match v {
                Sq::Bool(b) => b.map(|b| SqlValue::Integer(i64::from(b))),
                Sq::TinyInt(n) => n.map(|n| SqlValue::Integer(n.into())),
                Sq::SmallInt(n) => n.map(|n| SqlValue::Integer(n.into())),
                Sq::Int(n) => n.map(|n| SqlValue::Integer(n.into())),
                Sq::BigInt(n) => n.map(SqlValue::Integer),
                Sq::TinyUnsigned(n) => n.map(|n| SqlValue::Integer(n.into())),
                Sq::SmallUnsigned(n) => n.map(|n| SqlValue::Integer(n.into())),
                Sq::Unsigned(n) => n.map(|n| SqlValue::Integer(n.into())),
                Sq::BigUnsigned(n) => {
                    n.map(|n| SqlValue::Integer(i64::try_from(n).unwrap_or(i64::MAX)))
                }
                Sq::Float(f) => f.map(|f| SqlValue::Real(f.into())),
                Sq::Double(f) => f.map(SqlValue::Real),
                Sq::String(s) => s.as_deref().map(|s| SqlValue::Text(s.clone())),
                Sq::Char(c) => c.map(|c| SqlValue::Text(c.to_string())),
                Sq::Bytes(b) => b.as_deref().map(|b| SqlValue::Blob(b.clone())),
                #[allow(unreachable_patterns)]
                _ => None,
            };
            bound.unwrap_or(SqlValue::Null)
        })
        .collect()
}

/// Execute a built statement, returning the number of affected rows.
pub fn execute(conn: &Connection, (sql, values): &Built) -> rusqlite::Result<usize> {
    conn.execute(sql, params_from_iter(bind(values)))
}

/// Run a built query and map the first row, if any.
pub fn query_one<T>(
    conn: &Connection,
    (sql, values): &Built,
    f: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Option<T>> {
    conn.query_row(sql, params_from_iter(bind(values)), f)
        .optional()
}

/// Run a built query and map every row.
pub fn query_all<T>(
    conn: &Connection,
    (sql, values): &Built,
    f: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(bind(values)), f)?;
    rows.collect()
}

/// Run a `COUNT(*)` query.
pub fn count(conn: &Connection, built: &Built) -> rusqlite::Result<i64> {
    Ok(query_one(conn, built, |row| row.get::<_, i64>(0))?.unwrap_or(0))
}

/// Build a closure that classifies a rusqlite error. Busy/locked databases
/// are retryable (`Unavailable`); everything else is `Internal`.
pub fn db_err(context: &str) -> impl FnOnce(rusqlite::Error) -> ServiceError + '_ {
    move |e| match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
            tracing::warn!("{context}: {e}");
            ServiceError::Unavailable("database is busy, retry later".into())
        }
        _ => ServiceError::from_db(context)(e),
    }
}

pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn parse_col<T>(row: &Row<'_>, idx: usize, parse: impl FnOnce(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("unexpected value {raw:?}").into())
    })
}

fn json_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Map a row from `db::users` selects.
pub fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        currency: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        email_verified: row.get(6)?,
    })
}

pub fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        icon: row.get(3)?,
        color: row.get(4)?,
        is_system: row.get(5)?,
        default_limit: row.get(6)?,
        revision: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Map a row from `db::budgets` selects. `permission` is the caller's level.
pub fn budget_from_row(row: &Row<'_>, permission: PermissionLevel) -> rusqlite::Result<Budget> {
    let total_limit: f64 = row.get(4)?;
    let spent: f64 = row.get(8)?;
    Ok(Budget {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        month: row.get(3)?,
        total_limit,
        revision: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        spent,
        remaining: total_limit - spent,
        permission,
    })
}

pub fn budget_category_from_row(row: &Row<'_>) -> rusqlite::Result<BudgetCategory> {
    Ok(BudgetCategory {
        id: row.get(0)?,
        budget_id: row.get(1)?,
        category_id: row.get(2)?,
        category_name: row.get(3)?,
        color: row.get(4)?,
        limit_amount: row.get(5)?,
        spent: row.get(6)?,
    })
}

pub fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        budget_id: row.get(2)?,
        category_id: row.get(3)?,
        payment_method_id: row.get(4)?,
        amount: row.get(5)?,
        transaction_type: parse_col(row, 6, TransactionType::parse)?,
        is_transfer: row.get(7)?,
        transfer_to_id: row.get(8)?,
        description: row.get(9)?,
        transaction_date: row.get(10)?,
        is_recurring: row.get(11)?,
        recurrence_pattern: json_col(row, 12)?,
        revision: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

pub fn payment_method_from_row(row: &Row<'_>) -> rusqlite::Result<PaymentMethod> {
    Ok(PaymentMethod {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        method_type: parse_col(row, 3, PaymentMethodType::parse)?,
        last_four: row.get(4)?,
        brand: row.get(5)?,
        is_default: row.get(6)?,
        is_active: row.get(7)?,
        credit_limit: row.get(8)?,
        current_balance: row.get(9)?,
        revision: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

pub fn reflection_from_row(row: &Row<'_>) -> rusqlite::Result<Reflection> {
    Ok(Reflection {
        id: row.get(0)?,
        user_id: row.get(1)?,
        budget_id: row.get(2)?,
        overall_rating: row.get(3)?,
        is_private: row.get(4)?,
        notes: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Map the nine invitation columns; joined details are left empty.
pub fn invitation_from_row(row: &Row<'_>) -> rusqlite::Result<Invitation> {
    Ok(Invitation {
        id: row.get(0)?,
        budget_id: row.get(1)?,
        owner_id: row.get(2)?,
        recipient_email: row.get(3)?,
        permission: parse_col(row, 4, PermissionLevel::parse_grant)?,
        status: parse_col(row, 5, InvitationStatus::parse)?,
        created_at: row.get(6)?,
        responded_at: row.get(7)?,
        expires_at: row.get(8)?,
        budget_name: None,
        budget_month: None,
        owner_name: None,
    })
}

/// Map a row from `db::sharing::list_pending_for_email`.
pub fn invitation_with_details_from_row(row: &Row<'_>) -> rusqlite::Result<Invitation> {
    let mut inv = invitation_from_row(row)?;
    inv.budget_name = row.get(9)?;
    inv.budget_month = row.get(10)?;
    inv.owner_name = row.get(11)?;
    Ok(inv)
}

pub fn access_from_row(row: &Row<'_>) -> rusqlite::Result<ShareAccess> {
    Ok(ShareAccess {
        id: row.get(0)?,
        budget_id: row.get(1)?,
        owner_id: row.get(2)?,
        shared_with_id: row.get(3)?,
        permission: parse_col(row, 4, PermissionLevel::parse_grant)?,
        created_at: row.get(5)?,
        email: row.get(6)?,
        name: row.get(7)?,
    })
}

pub fn shared_budget_from_row(row: &Row<'_>) -> rusqlite::Result<SharedBudget> {
    Ok(SharedBudget {
        access_id: row.get(0)?,
        budget_id: row.get(1)?,
        budget_name: row.get(2)?,
        month: row.get(3)?,
        total_limit: row.get(4)?,
        permission: parse_col(row, 5, PermissionLevel::parse_grant)?,
        owner_id: row.get(6)?,
        owner_name: row.get(7)?,
        shared_at: row.get(8)?,
    })
}

/// Map a row from `db::sync` operation selects. Returns the owner alongside.
pub fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<(SyncOperationRecord, String)> {
    let record = SyncOperationRecord {
        id: row.get(0)?,
        table: row.get(1)?,
        record_id: row.get(2)?,
        operation: row.get(3)?,
        local_data: json_col(row, 4)?.unwrap_or(serde_json::Value::Null),
        server_data: json_col(row, 5)?,
        status: parse_col(row, 6, SyncStatus::parse)?,
        resolution: row.get(7)?,
        error: row.get(8)?,
        created_at: row.get(9)?,
        resolved_at: row.get(10)?,
    };
    Ok((record, row.get(11)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("budgetsync.db");
        drop(init_db(&path).unwrap());
        let db = init_db(&path).unwrap();
        let applied: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
    }

    #[test]
    fn system_categories_are_seeded() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let cats = query_all(
            &conn,
            &budgetsync_api::db::categories::list_system(),
            category_from_row,
        )
        .unwrap();
        assert!(!cats.is_empty());
        assert!(cats.iter().all(|c| c.is_system && c.user_id.is_none()));
    }

    #[test]
    fn bind_maps_bools_to_integers() {
        let values = sea_query::Values(vec![true.into(), Option::<String>::None.into(), 7i64.into()]);
        assert_eq!(
            bind(&values),
            vec![SqlValue::Integer(1), SqlValue::Null, SqlValue::Integer(7)]
        );
    }
}
