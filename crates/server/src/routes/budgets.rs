use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;

use budgetsync_api::service::{
    format_month, format_timestamp, parse_budget_month, record_id, validate_amount, validate_name,
};
use budgetsync_api::{
    AddBudgetCategoryRequest, ApiResponse, Budget, BudgetCategory, CreateBudgetRequest,
    OkResponse, PermissionLevel, UpdateBudgetCategoryRequest, UpdateBudgetRequest, db,
};

use crate::error::{ApiErr, ApiJson, ApiPath};
use crate::permissions::require_minimum;
use crate::routes::auth::AuthUser;
use crate::routes::{ApiResult, done, envelope};
use crate::storage::{
    Db, budget_category_from_row, budget_from_row, category_from_row, count, db_err, execute,
    is_constraint_violation, query_all, query_one,
};

fn load_budget(conn: &Connection, id: &str, permission: PermissionLevel) -> Result<Budget, ApiErr> {
    query_one(conn, &db::budgets::get(id), |row| budget_from_row(row, permission))
        .map_err(db_err("load budget"))?
        .ok_or_else(|| ApiErr::not_found("budget not found"))
}

fn load_allocation(conn: &Connection, id: &str) -> Result<BudgetCategory, ApiErr> {
    query_one(conn, &db::budgets::get_category(id), budget_category_from_row)
        .map_err(db_err("load budget category"))?
        .ok_or_else(|| ApiErr::not_found("budget category not found"))
}

// ---------------------------------------------------------------------------
// Budgets
// ---------------------------------------------------------------------------

/// GET /api/budgets — budgets the caller owns, newest month first.
pub async fn list(State(db): State<Db>, user: AuthUser) -> ApiResult<Vec<Budget>> {
    let conn = db.conn();
    let budgets = query_all(&conn, &db::budgets::list_for_user(&user.user_id), |row| {
        budget_from_row(row, PermissionLevel::Owner)
    })
    .map_err(db_err("list budgets"))?;
    Ok(envelope(budgets))
}

/// POST /api/budgets — one budget per user and month.
pub async fn create(
    State(db): State<Db>,
    user: AuthUser,
    ApiJson(req): ApiJson<CreateBudgetRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Budget>>), ApiErr> {
    let id = record_id(req.id.as_deref())?;
    let month = format_month(parse_budget_month(&req.month)?);
    let total_limit = validate_amount("totalLimit", req.total_limit)?;
    let name = req.name.as_deref().map(|n| validate_name("name", n)).transpose()?;

    let conn = db.conn();
    let taken = count(&conn, &db::budgets::month_taken(&user.user_id, &month))
        .map_err(db_err("check budget month"))?;
    if taken > 0 {
        return Err(ApiErr::conflict("a budget already exists for this month"));
    }

    execute(
        &conn,
        &db::budgets::insert(
            &id,
            &user.user_id,
            name.as_deref(),
            &month,
            total_limit,
            &format_timestamp(Utc::now()),
        ),
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            ApiErr::conflict("a budget already exists for this month or id")
        } else {
            ApiErr::from(db_err("insert budget")(e))
        }
    })?;

    tracing::info!(budget_id = %id, %month, "budget created");
    Ok((StatusCode::CREATED, envelope(load_budget(&conn, &id, PermissionLevel::Owner)?)))
}

/// GET /api/budgets/month/{month} — the caller's budget for `YYYY-MM`.
pub async fn get_by_month(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(month): ApiPath<String>,
) -> ApiResult<Budget> {
    let month = format_month(parse_budget_month(&month)?);
    let conn = db.conn();
    let budget = query_one(&conn, &db::budgets::get_by_month(&user.user_id, &month), |row| {
        budget_from_row(row, PermissionLevel::Owner)
    })
    .map_err(db_err("load budget by month"))?
    .ok_or_else(|| ApiErr::not_found("no budget for this month"))?;
    Ok(envelope(budget))
}

/// GET /api/budgets/{id}
pub async fn get(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Budget> {
    let conn = db.conn();
    let level = require_minimum(&conn, PermissionLevel::View, &user.user_id, &id)?;
    Ok(envelope(load_budget(&conn, &id, level)?))
}

/// PUT /api/budgets/{id}
pub async fn update(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<UpdateBudgetRequest>,
) -> ApiResult<Budget> {
    let name = req.name.as_deref().map(|n| validate_name("name", n)).transpose()?;
    let total_limit = req
        .total_limit
        .map(|l| validate_amount("totalLimit", l))
        .transpose()?;

    let conn = db.conn();
    let level = require_minimum(&conn, PermissionLevel::Edit, &user.user_id, &id)?;
    execute(
        &conn,
        &db::budgets::update(&id, name.as_deref(), total_limit, &format_timestamp(Utc::now())),
    )
    .map_err(db_err("update budget"))?;
    Ok(envelope(load_budget(&conn, &id, level)?))
}

/// DELETE /api/budgets/{id} — owner only.
pub async fn delete(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<OkResponse> {
    let conn = db.conn();
    require_minimum(&conn, PermissionLevel::Owner, &user.user_id, &id)?;
    execute(&conn, &db::budgets::soft_delete(&id, &format_timestamp(Utc::now())))
        .map_err(db_err("delete budget"))?;
    tracing::info!(budget_id = %id, "budget deleted");
    Ok(done())
}

// ---------------------------------------------------------------------------
// Allocations
// ---------------------------------------------------------------------------

/// GET /api/budgets/{id}/categories
pub async fn list_categories(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Vec<BudgetCategory>> {
    let conn = db.conn();
    require_minimum(&conn, PermissionLevel::View, &user.user_id, &id)?;
    let allocations = query_all(&conn, &db::budgets::list_categories(&id), budget_category_from_row)
        .map_err(db_err("list budget categories"))?;
    Ok(envelope(allocations))
}

/// POST /api/budgets/{id}/categories
pub async fn add_category(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<AddBudgetCategoryRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BudgetCategory>>), ApiErr> {
    let limit = validate_amount("limitAmount", req.limit_amount)?;

    let conn = db.conn();
    require_minimum(&conn, PermissionLevel::Edit, &user.user_id, &id)?;
    query_one(
        &conn,
        &db::categories::get_usable(&req.category_id, &user.user_id),
        category_from_row,
    )
        .map_err(db_err("load category"))?
        .ok_or_else(|| ApiErr::not_found("category not found"))?;

    let allocation_id = uuid::Uuid::new_v4().to_string();
    execute(
        &conn,
        &db::budgets::insert_category(
            &allocation_id,
            &id,
            &req.category_id,
            limit,
            &format_timestamp(Utc::now()),
        ),
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            ApiErr::conflict("category is already allocated in this budget")
        } else {
            ApiErr::from(db_err("insert budget category")(e))
        }
    })?;

    Ok((StatusCode::CREATED, envelope(load_allocation(&conn, &allocation_id)?)))
}

/// PUT /api/budgets/categories/{id} — change an allocation's limit.
pub async fn update_category(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<UpdateBudgetCategoryRequest>,
) -> ApiResult<BudgetCategory> {
    let limit = validate_amount("limitAmount", req.limit_amount)?;

    let conn = db.conn();
    let allocation = load_allocation(&conn, &id)?;
    require_minimum(&conn, PermissionLevel::Edit, &user.user_id, &allocation.budget_id)?;
    execute(
        &conn,
        &db::budgets::update_category_limit(&id, limit, &format_timestamp(Utc::now())),
    )
    .map_err(db_err("update budget category"))?;
    Ok(envelope(load_allocation(&conn, &id)?))
}

/// DELETE /api/budgets/categories/{id}
pub async fn delete_category(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<OkResponse> {
    let conn = db.conn();
    let allocation = load_allocation(&conn, &id)?;
    require_minimum(&conn, PermissionLevel::Edit, &user.user_id, &allocation.budget_id)?;
    execute(&conn, &db::budgets::delete_category(&id)).map_err(db_err("delete budget category"))?;
    Ok(done())
}
