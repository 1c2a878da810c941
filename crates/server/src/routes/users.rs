use axum::extract::State;
use chrono::Utc;

use budgetsync_api::service::{format_timestamp, validate_currency, validate_name};
use budgetsync_api::{OkResponse, UpdateUserRequest, User, db};

use crate::error::{ApiErr, ApiJson};
use crate::routes::auth::AuthUser;
use crate::routes::{ApiResult, done, envelope};
use crate::storage::{Db, db_err, execute, query_one, user_from_row};

fn load_user(conn: &rusqlite::Connection, user_id: &str) -> Result<User, ApiErr> {
    query_one(conn, &db::users::get_by_id(user_id), user_from_row)
        .map_err(db_err("load user"))?
        .ok_or_else(|| ApiErr::not_found("user not found"))
}

/// GET /api/users/me
pub async fn get_me(State(db): State<Db>, user: AuthUser) -> ApiResult<User> {
    let conn = db.conn();
    Ok(envelope(load_user(&conn, &user.user_id)?))
}

/// PUT /api/users/me — update display name and/or currency.
pub async fn update_me(
    State(db): State<Db>,
    user: AuthUser,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> ApiResult<User> {
    let name = req.name.as_deref().map(|n| validate_name("name", n)).transpose()?;
    let currency = req.currency.as_deref().map(validate_currency).transpose()?;

    let conn = db.conn();
    execute(
        &conn,
        &db::users::update_profile(
            &user.user_id,
            name.as_deref(),
            currency.as_deref(),
            &format_timestamp(Utc::now()),
        ),
    )
    .map_err(db_err("update user"))?;
    Ok(envelope(load_user(&conn, &user.user_id)?))
}

/// DELETE /api/users/me — tombstone the account. The token stops working.
pub async fn delete_me(State(db): State<Db>, user: AuthUser) -> ApiResult<OkResponse> {
    let conn = db.conn();
    execute(
        &conn,
        &db::users::soft_delete(&user.user_id, &format_timestamp(Utc::now())),
    )
    .map_err(db_err("delete user"))?;
    tracing::info!(user_id = %user.user_id, "user deleted");
    Ok(done())
}
