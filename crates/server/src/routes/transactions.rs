use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;

use budgetsync_api::db::transactions::{NewTransaction, TransactionChanges, TransactionFilter};
use budgetsync_api::service::{
    format_timestamp, page_limit, parse_date, record_id, validate_transaction_amount,
};
use budgetsync_api::{
    ApiResponse, CreateTransactionRequest, OkResponse, PermissionLevel, ServiceError, Transaction,
    TransactionListQuery, TransactionListResponse, TransactionType, UpdateTransactionRequest, db,
};

use crate::error::{ApiErr, ApiJson, ApiPath, ApiQuery};
use crate::permissions::require_minimum;
use crate::routes::auth::AuthUser;
use crate::routes::{ApiResult, done, envelope};
use crate::storage::{
    Db, category_from_row, count, db_err, execute, is_constraint_violation,
    payment_method_from_row, query_all, query_one, transaction_from_row,
};

fn load_transaction(conn: &Connection, id: &str) -> Result<Transaction, ApiErr> {
    query_one(conn, &db::transactions::get(id), transaction_from_row)
        .map_err(db_err("load transaction"))?
        .ok_or_else(|| ApiErr::not_found("transaction not found"))
}

/// Transactions filed under a budget follow that budget's permissions. An
/// author keeps access to their own entry once its budget is deleted.
fn authorize(
    conn: &Connection,
    user_id: &str,
    tx: &Transaction,
    required: PermissionLevel,
) -> Result<(), ApiErr> {
    match tx.budget_id.as_deref() {
        Some(budget) => match require_minimum(conn, required, user_id, budget) {
            Ok(_) => Ok(()),
            Err(ServiceError::NotFound(_)) if tx.user_id == user_id => Ok(()),
            Err(ServiceError::NotFound(_)) => Err(ApiErr::not_found("transaction not found")),
            Err(e) => Err(e.into()),
        },
        None if tx.user_id == user_id => Ok(()),
        None => Err(ApiErr::not_found("transaction not found")),
    }
}

fn check_category(conn: &Connection, user_id: &str, category_id: &str) -> Result<(), ApiErr> {
    query_one(conn, &db::categories::get_usable(category_id, user_id), category_from_row)
        .map_err(db_err("load category"))?
        .map(|_| ())
        .ok_or_else(|| ApiErr::not_found("category not found"))
}

fn check_payment_method(conn: &Connection, user_id: &str, method_id: &str) -> Result<(), ApiErr> {
    query_one(conn, &db::payment_methods::get(method_id), payment_method_from_row)
        .map_err(db_err("load payment method"))?
        .filter(|m| m.user_id == user_id)
        .map(|_| ())
        .ok_or_else(|| ApiErr::not_found("payment method not found"))
}

fn parse_type(raw: &str) -> Result<TransactionType, ApiErr> {
    TransactionType::parse(raw.trim())
        .ok_or_else(|| ApiErr::bad_request("type must be one of: expense, income, transfer"))
}

fn normalize_date(field: &str, raw: &str) -> Result<String, ApiErr> {
    Ok(parse_date(field, raw)?.format("%Y-%m-%d").to_string())
}

/// GET /api/transactions — filtered, newest first, paginated.
///
/// With `budget`, lists every collaborator's entries in that budget (view
/// access required); otherwise only the caller's own.
pub async fn list(
    State(db): State<Db>,
    user: AuthUser,
    ApiQuery(q): ApiQuery<TransactionListQuery>,
) -> ApiResult<TransactionListResponse> {
    let start = q.start_date.as_deref().map(|d| normalize_date("startDate", d)).transpose()?;
    let end = q.end_date.as_deref().map(|d| normalize_date("endDate", d)).transpose()?;
    let limit = page_limit(q.limit);
    let offset = q.offset.unwrap_or(0);

    let conn = db.conn();
    if let Some(budget) = q.budget.as_deref() {
        require_minimum(&conn, PermissionLevel::View, &user.user_id, budget)?;
    }
    let filter = TransactionFilter {
        user_id: &user.user_id,
        budget_id: q.budget.as_deref(),
        category_id: q.category.as_deref(),
        start_date: start.as_deref(),
        end_date: end.as_deref(),
    };
    let transactions = query_all(
        &conn,
        &db::transactions::list(&filter, limit, offset),
        transaction_from_row,
    )
    .map_err(db_err("list transactions"))?;
    let total = count(&conn, &db::transactions::count(&filter)).map_err(db_err("count transactions"))?;

    Ok(envelope(TransactionListResponse {
        transactions,
        total,
        limit,
        offset,
    }))
}

/// POST /api/transactions
pub async fn create(
    State(db): State<Db>,
    user: AuthUser,
    ApiJson(req): ApiJson<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Transaction>>), ApiErr> {
    let id = record_id(req.id.as_deref())?;
    let amount = validate_transaction_amount(req.amount)?;
    let kind = match req.transaction_type.as_deref() {
        Some(raw) => parse_type(raw)?,
        None => TransactionType::Expense,
    };
    if kind == TransactionType::Transfer && req.transfer_to_id.is_none() {
        return Err(ApiErr::bad_request("transferToId is required for transfers"));
    }
    let date = normalize_date("transactionDate", &req.transaction_date)?;

    let conn = db.conn();
    if let Some(budget) = req.budget_id.as_deref() {
        require_minimum(&conn, PermissionLevel::Edit, &user.user_id, budget)?;
    }
    if let Some(category) = req.category_id.as_deref() {
        check_category(&conn, &user.user_id, category)?;
    }
    for method in [req.payment_method_id.as_deref(), req.transfer_to_id.as_deref()]
        .into_iter()
        .flatten()
    {
        check_payment_method(&conn, &user.user_id, method)?;
    }

    let new = NewTransaction {
        id: &id,
        user_id: &user.user_id,
        budget_id: req.budget_id.as_deref(),
        category_id: req.category_id.as_deref(),
        payment_method_id: req.payment_method_id.as_deref(),
        amount,
        transaction_type: kind.as_str(),
        transfer_to_id: req.transfer_to_id.as_deref(),
        description: req.description.as_deref(),
        transaction_date: &date,
        is_recurring: req.is_recurring,
        recurrence_pattern: req.recurrence_pattern.as_ref().map(|p| p.to_string()),
    };
    execute(&conn, &db::transactions::insert(&new, &format_timestamp(Utc::now()))).map_err(|e| {
        if is_constraint_violation(&e) {
            ApiErr::conflict("a record with this id already exists")
        } else {
            ApiErr::from(db_err("insert transaction")(e))
        }
    })?;

    Ok((StatusCode::CREATED, envelope(load_transaction(&conn, &id)?)))
}

/// GET /api/transactions/{id}
pub async fn get(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Transaction> {
    let conn = db.conn();
    let tx = load_transaction(&conn, &id)?;
    authorize(&conn, &user.user_id, &tx, PermissionLevel::View)?;
    Ok(envelope(tx))
}

/// PUT /api/transactions/{id}
pub async fn update(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<UpdateTransactionRequest>,
) -> ApiResult<Transaction> {
    let amount = req.amount.map(validate_transaction_amount).transpose()?;
    let kind = req.transaction_type.as_deref().map(parse_type).transpose()?;
    let date = req
        .transaction_date
        .as_deref()
        .map(|d| normalize_date("transactionDate", d))
        .transpose()?;

    let conn = db.conn();
    let current = load_transaction(&conn, &id)?;
    authorize(&conn, &user.user_id, &current, PermissionLevel::Edit)?;
    if kind == Some(TransactionType::Transfer) && current.transfer_to_id.is_none() {
        return Err(ApiErr::bad_request("transferToId is required for transfers"));
    }
    if let Some(category) = req.category_id.as_deref() {
        check_category(&conn, &user.user_id, category)?;
    }
    if let Some(method) = req.payment_method_id.as_deref() {
        check_payment_method(&conn, &user.user_id, method)?;
    }

    let changes = TransactionChanges {
        category_id: req.category_id.as_deref(),
        payment_method_id: req.payment_method_id.as_deref(),
        amount,
        transaction_type: kind.as_ref().map(TransactionType::as_str),
        description: req.description.as_deref(),
        transaction_date: date.as_deref(),
        is_recurring: req.is_recurring,
        recurrence_pattern: req.recurrence_pattern.as_ref().map(|p| p.to_string()),
    };
    execute(&conn, &db::transactions::update(&id, &changes, &format_timestamp(Utc::now())))
        .map_err(db_err("update transaction"))?;
    Ok(envelope(load_transaction(&conn, &id)?))
}

/// DELETE /api/transactions/{id}
pub async fn delete(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<OkResponse> {
    let conn = db.conn();
    let current = load_transaction(&conn, &id)?;
    authorize(&conn, &user.user_id, &current, PermissionLevel::Edit)?;
    execute(&conn, &db::transactions::soft_delete(&id, &format_timestamp(Utc::now())))
        .map_err(db_err("delete transaction"))?;
    Ok(done())
}
