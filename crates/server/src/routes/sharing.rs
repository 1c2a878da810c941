use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::Utc;

use budgetsync_api::{
    ApiResponse, CreateInvitationRequest, Invitation, OkResponse, RespondInvitationRequest,
    ShareAccess, SharedBudget,
};

use crate::error::{ApiErr, ApiJson, ApiPath};
use crate::routes::auth::AuthUser;
use crate::routes::{ApiResult, done, envelope};
use crate::sharing;
use crate::storage::Db;

/// POST /api/sharing/invite — owner invites an email to a budget.
pub async fn invite(
    State(db): State<Db>,
    user: AuthUser,
    ApiJson(req): ApiJson<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Invitation>>), ApiErr> {
    let conn = db.conn();
    let invitation = sharing::create_invitation(&conn, &user.user_id, &user.email, &req, Utc::now())?;
    Ok((StatusCode::CREATED, envelope(invitation)))
}

/// GET /api/sharing/invitations — pending invitations addressed to the caller.
pub async fn my_invitations(State(db): State<Db>, user: AuthUser) -> ApiResult<Vec<Invitation>> {
    let conn = db.conn();
    Ok(envelope(sharing::list_my_invitations(&conn, user.verified_email(), Utc::now())?))
}

/// PUT /api/sharing/invitations/{id}/respond — accept or decline.
pub async fn respond(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<RespondInvitationRequest>,
) -> ApiResult<Invitation> {
    let mut conn = db.conn();
    let invitation = sharing::respond_to_invitation(
        &mut conn,
        &user.user_id,
        user.verified_email(),
        &id,
        &req.status,
        Utc::now(),
    )?;
    Ok(envelope(invitation))
}

/// DELETE /api/sharing/invitations/{id} — owner withdraws a pending invitation.
pub async fn cancel(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<OkResponse> {
    let conn = db.conn();
    sharing::cancel_invitation(&conn, &user.user_id, &id)?;
    Ok(done())
}

/// GET /api/sharing/budgets/{budget_id} — who has access.
pub async fn budget_access(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(budget_id): ApiPath<String>,
) -> ApiResult<Vec<ShareAccess>> {
    let conn = db.conn();
    Ok(envelope(sharing::list_budget_access(&conn, &user.user_id, &budget_id)?))
}

/// GET /api/sharing/budgets/{budget_id}/invitations — owner only.
pub async fn budget_invitations(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(budget_id): ApiPath<String>,
) -> ApiResult<Vec<Invitation>> {
    let conn = db.conn();
    Ok(envelope(sharing::list_budget_invitations(&conn, &user.user_id, &budget_id)?))
}

/// DELETE /api/sharing/access/{id} — owner revokes a grant.
pub async fn revoke(
    State(db): State<Db>,
    user: AuthUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<OkResponse> {
    let conn = db.conn();
    sharing::remove_access(&conn, &user.user_id, &id)?;
    Ok(done())
}

/// GET /api/sharing/shared-with-me
pub async fn shared_with_me(State(db): State<Db>, user: AuthUser) -> ApiResult<Vec<SharedBudget>> {
    let conn = db.conn();
    Ok(envelope(sharing::shared_with_me(&conn, &user.user_id)?))
}
