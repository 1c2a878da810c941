use axum::{
    extract::{FromRef, FromRequestParts, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use budgetsync_api::service::{format_timestamp, validate_currency, validate_email, validate_name};
use budgetsync_api::{ApiResponse, OnboardingRequest, User, db};

use crate::error::{ApiErr, ApiJson};
use crate::identity::{IdentityVerifier, VerifiedIdentity};
use crate::routes::{ApiResult, envelope};
use crate::storage::{Db, count, db_err, execute, is_constraint_violation, query_one, user_from_row};

// ---------------------------------------------------------------------------
// Auth extractors
// ---------------------------------------------------------------------------

/// A caller holding a valid bearer token, onboarded or not.
pub struct Verified(pub VerifiedIdentity);

/// Onboarded user behind the `Authorization: Bearer <token>` header.
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub email_verified: bool,
    pub name: String,
}

impl AuthUser {
    /// The caller's email, if the identity provider vouched for it.
    pub fn verified_email(&self) -> Option<&str> {
        self.email_verified.then_some(self.email.as_str())
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiErr> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiErr::unauthorized("missing or invalid Authorization header"))
}

impl<S> FromRequestParts<S> for Verified
where
    S: Send + Sync,
    IdentityVerifier: FromRef<S>,
{
    type Rejection = ApiErr;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = IdentityVerifier::from_ref(state);
        let token = bearer_token(parts)?;
        Ok(Self(verifier.verify(token)?))
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Db: FromRef<S>,
    IdentityVerifier: FromRef<S>,
{
    type Rejection = ApiErr;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Verified(identity) = Verified::from_request_parts(parts, state).await?;

        let store = Db::from_ref(state);
        let conn = store.conn();
        let user = query_one(&conn, &db::users::get_by_external_id(&identity.subject), user_from_row)
            .map_err(db_err("lookup user"))?
            .ok_or_else(|| ApiErr::unauthorized("user not onboarded"))?;

        Ok(AuthUser {
            user_id: user.id,
            email: user.email,
            email_verified: user.email_verified,
            name: user.name,
        })
    }
}

// ---------------------------------------------------------------------------
// Onboarding
// ---------------------------------------------------------------------------

/// POST /api/auth/onboarding — create the user record for a verified identity.
///
/// The token's email claim wins and is stored as verified. The body email is
/// only a fallback for providers that do not put one in the token; it is
/// stored unverified and does not unlock invitations.
pub async fn onboarding(
    State(db): State<Db>,
    Verified(identity): Verified,
    ApiJson(req): ApiJson<OnboardingRequest>,
) -> Result<(StatusCode, Json<ApiResponse<User>>), ApiErr> {
    let (email, email_verified) = match (identity.email.as_deref(), req.email.as_deref()) {
        (Some(claimed), _) => (claimed, true),
        (None, Some(declared)) => (declared, false),
        (None, None) => return Err(ApiErr::bad_request("email is required")),
    };
    let email = validate_email(email)?;
    let name = match req.name.as_deref() {
        Some(name) => validate_name("name", name)?,
        None => validate_name("name", email.split('@').next().unwrap_or_default())?,
    };
    let currency = match req.currency.as_deref() {
        Some(code) => validate_currency(code)?,
        None => "USD".to_string(),
    };

    let conn = db.conn();
    let taken = count(&conn, &db::users::identity_taken(&identity.subject, &email, email_verified))
        .map_err(db_err("check identity"))?;
    if taken > 0 {
        return Err(ApiErr::conflict("user already onboarded"));
    }

    let id = Uuid::new_v4().to_string();
    let now = format_timestamp(Utc::now());
    execute(
        &conn,
        &db::users::insert(&id, &identity.subject, &email, email_verified, &name, &currency, &now),
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            ApiErr::conflict("user already onboarded")
        } else {
            ApiErr::from(db_err("insert user")(e))
        }
    })?;

    let user = query_one(&conn, &db::users::get_by_id(&id), user_from_row)
        .map_err(db_err("load user"))?
        .ok_or_else(|| ApiErr::internal("user vanished after insert"))?;

    tracing::info!(user_id = %user.id, email_verified, "user onboarded");
    Ok((StatusCode::CREATED, envelope(user)))
}

/// GET /api/auth/me — the user behind the token.
pub async fn me(State(db): State<Db>, Verified(identity): Verified) -> ApiResult<User> {
    let conn = db.conn();
    let user = query_one(&conn, &db::users::get_by_external_id(&identity.subject), user_from_row)
        .map_err(db_err("lookup user"))?
        .ok_or_else(|| ApiErr::not_found("user not onboarded"))?;
    Ok(envelope(user))
}
