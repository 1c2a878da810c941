use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;

use budgetsync_api::db::payment_methods::{NewPaymentMethod, PaymentMethodChanges};
use budgetsync_api::service::{format_timestamp, record_id, validate_amount, validate_name};
use budgetsync_api::{
    ApiResponse, CreatePaymentMethodRequest, OkResponse, PaymentMethod, PaymentMethodType,
    UpdatePaymentMethodRequest, db,
};

use crate::error::{ApiErr, ApiJson, ApiPath};
use crate::routes::auth::AuthUser;
use crate::routes::{ApiResult, done, envelope};
use crate::storage::{
    Db, db_err, execute, is_constraint_violation, payment_method_from_row, query_all, query_one,
};

/// Load one of the caller's live methods; anyone else's is reported missing.
fn load_own(conn: &Connection, user_id: &str, id: &str) -> Result<PaymentMethod, ApiErr> {
    query_one(conn, &db::payment_methods::get(id), payment_method_from_row)
        .map_err(db_err("load payment method"))?
        .filter(|m| m.user_id == user_id)
        .ok_or_else(|| ApiErr::not_found("payment method not found"))
}

fn validate_last_four(last_four: Option<&str>) -> Result<Option<&str>, ApiErr> {
    match last_four {
        Some(digits) if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) => {
            Err(ApiErr::bad_request("lastFour must be exactly 4 digits"))
        }
        other => Ok(other),
    }
}

/// GET /api/payment-methods
pub async fn list(State(db): State<Db>, user: AuthUser) -> ApiResult<Vec<PaymentMethod>> {
    let conn = db.conn();
    let methods = query_all(&conn, &db::payment_methods::list(&user.user_id), payment_method_from_row)
        .map_err(db_err("list payment methods"))?;
    Ok(envelope(methods))
}

/// POST /api/payment-methods
pub async fn create(
    State(db): State<Db>,
    user: AuthUser,
    ApiJson(req): ApiJson<CreatePaymentMethodRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentMethod>>), ApiErr> {
    let id = record_id(req.id.as_deref())?;
    let name = validate_name("name", &req.name)?;
    let method_type = PaymentMethodType::parse(req.method_type.trim()).ok_or_else(|| {
        ApiErr::bad_request(format!(
            "type must be one of: {}",
            PaymentMethodType::NAMES.join(", ")
        ))
    })?;
    let last_four = validate_last_four(req.last_four.as_deref())?;
    let credit_limit = req
        .credit_limit
        .map(|l| validate_amount("creditLimit", l))
        .transpose()?;
    if req.current_balance.is_some_and(|b| !b.is_finite()) {
        return Err(ApiErr::bad_request("currentBalance must be a number"));
    }

    let mut conn = db.conn();
    let now = format_timestamp(Utc::now());
    let tx = conn.transaction().map_err(db_err("begin payment method"))?;
    execute(
        &tx,
        &db::payment_methods::insert(
            &NewPaymentMethod {
                id: &id,
                user_id: &user.user_id,
                name: &name,
                method_type: method_type.as_str(),
                last_four,
                brand: req.brand.as_deref(),
                is_default: req.is_default,
                credit_limit,
                current_balance: req.current_balance,
            },
            &now,
        ),
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            ApiErr::conflict("a record with this id already exists")
        } else {
            ApiErr::from(db_err("insert payment method")(e))
        }
    })?;
    if req.is_default {
        execute(&tx, &db::payment_methods::clear_default(&user.user_id, &id, &now))
            .map_err(db_err("clear default payment method"))?;
    }
    tx.commit().map_err(db_err("commit payment method"))?;

    Ok((StatusCode::CREATED, envelope(load_own(&conn, &user.user_id, &id)?)))
}

/// GET /api/payment-methods/{id}
pub async fn get(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<PaymentMethod> {
    let conn = db.conn();
    Ok(envelope(load_own(&conn, &user.user_id, &id)?))
}

/// PUT /api/payment-methods/{id} — `isDefault: true` clears the flag elsewhere.
pub async fn update(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<UpdatePaymentMethodRequest>,
) -> ApiResult<PaymentMethod> {
    let name = req.name.as_deref().map(|n| validate_name("name", n)).transpose()?;
    let last_four = validate_last_four(req.last_four.as_deref())?;
    let credit_limit = req
        .credit_limit
        .map(|l| validate_amount("creditLimit", l))
        .transpose()?;
    if req.current_balance.is_some_and(|b| !b.is_finite()) {
        return Err(ApiErr::bad_request("currentBalance must be a number"));
    }

    let mut conn = db.conn();
    let now = format_timestamp(Utc::now());
    load_own(&conn, &user.user_id, &id)?;
    let tx = conn.transaction().map_err(db_err("begin payment method"))?;
    let changes = PaymentMethodChanges {
        name: name.as_deref(),
        last_four,
        brand: req.brand.as_deref(),
        is_default: req.is_default,
        is_active: req.is_active,
        credit_limit,
        current_balance: req.current_balance,
    };
    execute(&tx, &db::payment_methods::update(&id, &changes, &now))
        .map_err(db_err("update payment method"))?;
    if req.is_default == Some(true) {
        execute(&tx, &db::payment_methods::clear_default(&user.user_id, &id, &now))
            .map_err(db_err("clear default payment method"))?;
    }
    tx.commit().map_err(db_err("commit payment method"))?;

    Ok(envelope(load_own(&conn, &user.user_id, &id)?))
}

/// DELETE /api/payment-methods/{id}
pub async fn delete(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<OkResponse> {
    let conn = db.conn();
    load_own(&conn, &user.user_id, &id)?;
    execute(&conn, &db::payment_methods::soft_delete(&id, &format_timestamp(Utc::now())))
        .map_err(db_err("delete payment method"))?;
    Ok(done())
}
