use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;

use budgetsync_api::service::{
    format_timestamp, record_id, validate_amount, validate_color, validate_name,
};
use budgetsync_api::{
    ApiResponse, Category, CreateCategoryRequest, OkResponse, UpdateCategoryRequest, db,
};

use crate::error::{ApiErr, ApiJson, ApiPath};
use crate::routes::auth::AuthUser;
use crate::routes::{ApiResult, done, envelope};
use crate::storage::{
    Db, category_from_row, db_err, execute, is_constraint_violation, query_all, query_one,
};

fn load_category(conn: &Connection, id: &str) -> Result<Category, ApiErr> {
    query_one(conn, &db::categories::get(id), category_from_row)
        .map_err(db_err("load category"))?
        .ok_or_else(|| ApiErr::not_found("category not found"))
}

/// A category the caller may change: their own, never a system one.
fn load_own_category(conn: &Connection, user_id: &str, id: &str) -> Result<Category, ApiErr> {
    let category = load_category(conn, id)?;
    if category.is_system {
        return Err(ApiErr::forbidden("system categories cannot be modified"));
    }
    if category.user_id.as_deref() != Some(user_id) {
        return Err(ApiErr::not_found("category not found"));
    }
    Ok(category)
}

/// GET /api/categories — system categories plus the caller's own.
pub async fn list(State(db): State<Db>, user: AuthUser) -> ApiResult<Vec<Category>> {
    let conn = db.conn();
    let categories = query_all(&conn, &db::categories::list_for_user(&user.user_id), category_from_row)
        .map_err(db_err("list categories"))?;
    Ok(envelope(categories))
}

/// GET /api/categories/system
pub async fn list_system(State(db): State<Db>, _user: AuthUser) -> ApiResult<Vec<Category>> {
    let conn = db.conn();
    let categories = query_all(&conn, &db::categories::list_system(), category_from_row)
        .map_err(db_err("list system categories"))?;
    Ok(envelope(categories))
}

/// POST /api/categories
pub async fn create(
    State(db): State<Db>,
    user: AuthUser,
    ApiJson(req): ApiJson<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Category>>), ApiErr> {
    let id = record_id(req.id.as_deref())?;
    let name = validate_name("name", &req.name)?;
    let color = validate_color(req.color.as_deref())?;
    let default_limit = req
        .default_limit
        .map(|l| validate_amount("defaultLimit", l))
        .transpose()?;

    let conn = db.conn();
    execute(
        &conn,
        &db::categories::insert(
            &id,
            &user.user_id,
            &name,
            req.icon.as_deref(),
            &color,
            default_limit,
            &format_timestamp(Utc::now()),
        ),
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            ApiErr::conflict("a record with this id already exists")
        } else {
            ApiErr::from(db_err("insert category")(e))
        }
    })?;

    Ok((StatusCode::CREATED, envelope(load_category(&conn, &id)?)))
}

/// PUT /api/categories/{id}
pub async fn update(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<UpdateCategoryRequest>,
) -> ApiResult<Category> {
    let name = req.name.as_deref().map(|n| validate_name("name", n)).transpose()?;
    let color = match req.color.as_deref() {
        Some(c) => Some(validate_color(Some(c))?),
        None => None,
    };
    let default_limit = req
        .default_limit
        .map(|l| validate_amount("defaultLimit", l))
        .transpose()?;

    let conn = db.conn();
    load_own_category(&conn, &user.user_id, &id)?;
    execute(
        &conn,
        &db::categories::update(
            &id,
            name.as_deref(),
            req.icon.as_deref(),
            color.as_deref(),
            default_limit,
            &format_timestamp(Utc::now()),
        ),
    )
    .map_err(db_err("update category"))?;
    Ok(envelope(load_category(&conn, &id)?))
}

/// DELETE /api/categories/{id}
pub async fn delete(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<OkResponse> {
    let conn = db.conn();
    load_own_category(&conn, &user.user_id, &id)?;
    execute(&conn, &db::categories::soft_delete(&id, &format_timestamp(Utc::now())))
        .map_err(db_err("delete category"))?;
    Ok(done())
}
