use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use budgetsync_api::service::{format_month, format_timestamp, parse_budget_month, validate_rating};
use budgetsync_api::{
    ApiResponse, CreateReflectionRequest, OkResponse, PermissionLevel, Reflection,
    ReflectionTemplate, UpdateReflectionRequest, db,
};

use crate::error::{ApiErr, ApiJson, ApiPath};
use crate::permissions::require_minimum;
use crate::routes::auth::AuthUser;
use crate::routes::{ApiResult, done, envelope};
use crate::storage::{
    Db, db_err, execute, is_constraint_violation, query_all, query_one, reflection_from_row,
};

fn load_reflection(conn: &Connection, id: &str) -> Result<Reflection, ApiErr> {
    query_one(conn, &db::reflections::get(id), reflection_from_row)
        .map_err(db_err("load reflection"))?
        .ok_or_else(|| ApiErr::not_found("reflection not found"))
}

/// Private reflections are visible to their author only; shared ones to
/// anyone who can view the budget.
fn check_readable(conn: &Connection, user_id: &str, reflection: &Reflection) -> Result<(), ApiErr> {
    if reflection.user_id == user_id {
        return Ok(());
    }
    if reflection.is_private {
        return Err(ApiErr::not_found("reflection not found"));
    }
    require_minimum(conn, PermissionLevel::View, user_id, &reflection.budget_id)?;
    Ok(())
}

fn load_authored(conn: &Connection, user_id: &str, id: &str) -> Result<Reflection, ApiErr> {
    let reflection = load_reflection(conn, id)?;
    check_readable(conn, user_id, &reflection)?;
    if reflection.user_id != user_id {
        return Err(ApiErr::forbidden("only the author can change a reflection"));
    }
    Ok(reflection)
}

/// GET /api/reflections/templates
pub async fn templates(State(db): State<Db>, _user: AuthUser) -> ApiResult<Vec<ReflectionTemplate>> {
    let conn = db.conn();
    let templates = query_all(&conn, &db::reflections::list_templates(), |row| {
        Ok(ReflectionTemplate {
            id: row.get(0)?,
            prompt: row.get(1)?,
        })
    })
    .map_err(db_err("list reflection templates"))?;
    Ok(envelope(templates))
}

/// GET /api/reflections/month/{month} — reflection on the caller's budget for `YYYY-MM`.
pub async fn get_by_month(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(month): ApiPath<String>,
) -> ApiResult<Reflection> {
    let month = format_month(parse_budget_month(&month)?);
    let conn = db.conn();
    let budget_id: String = query_one(&conn, &db::budgets::get_by_month(&user.user_id, &month), |row| {
        row.get(0)
    })
    .map_err(db_err("load budget by month"))?
    .ok_or_else(|| ApiErr::not_found("no budget for this month"))?;
    let reflection = query_one(&conn, &db::reflections::get_by_budget(&budget_id), reflection_from_row)
        .map_err(db_err("load reflection"))?
        .ok_or_else(|| ApiErr::not_found("reflection not found"))?;
    check_readable(&conn, &user.user_id, &reflection)?;
    Ok(envelope(reflection))
}

/// GET /api/reflections/{id}
pub async fn get(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Reflection> {
    let conn = db.conn();
    let reflection = load_reflection(&conn, &id)?;
    check_readable(&conn, &user.user_id, &reflection)?;
    Ok(envelope(reflection))
}

/// POST /api/reflections — one reflection per budget.
pub async fn create(
    State(db): State<Db>,
    user: AuthUser,
    ApiJson(req): ApiJson<CreateReflectionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Reflection>>), ApiErr> {
    let rating = validate_rating(req.overall_rating)?;

    let conn = db.conn();
    require_minimum(&conn, PermissionLevel::Edit, &user.user_id, &req.budget_id)?;
    let id = Uuid::new_v4().to_string();
    execute(
        &conn,
        &db::reflections::insert(
            &id,
            &user.user_id,
            &req.budget_id,
            rating,
            req.is_private,
            req.notes.as_deref(),
            &format_timestamp(Utc::now()),
        ),
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            ApiErr::conflict("this budget already has a reflection")
        } else {
            ApiErr::from(db_err("insert reflection")(e))
        }
    })?;
    Ok((StatusCode::CREATED, envelope(load_reflection(&conn, &id)?)))
}

/// PUT /api/reflections/{id}
pub async fn update(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<UpdateReflectionRequest>,
) -> ApiResult<Reflection> {
    let rating = validate_rating(req.overall_rating)?;

    let conn = db.conn();
    load_authored(&conn, &user.user_id, &id)?;
    execute(
        &conn,
        &db::reflections::update(
            &id,
            rating,
            req.is_private,
            req.notes.as_deref(),
            &format_timestamp(Utc::now()),
        ),
    )
    .map_err(db_err("update reflection"))?;
    Ok(envelope(load_reflection(&conn, &id)?))
}

/// DELETE /api/reflections/{id}
pub async fn delete(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<OkResponse> {
    let conn = db.conn();
    load_authored(&conn, &user.user_id, &id)?;
    execute(&conn, &db::reflections::delete(&id)).map_err(db_err("delete reflection"))?;
    Ok(done())
}
