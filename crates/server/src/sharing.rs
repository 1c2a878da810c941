//! Budget sharing: invitations and the access grants they produce.
//!
//! An invitation moves `pending -> accepted | declined`, or is deleted by the
//! owner while still pending. Accepting writes the status change and the
//! grant in one transaction.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use budgetsync_api::service::{format_timestamp, invitation_expires_at, is_expired, validate_email};
use budgetsync_api::{
    CreateInvitationRequest, Invitation, InvitationStatus, PermissionLevel, ServiceError,
    ShareAccess, SharedBudget, db,
};

use crate::permissions::require_minimum;
use crate::storage::{
    access_from_row, count, db_err, execute, invitation_from_row,
    invitation_with_details_from_row, is_constraint_violation, query_all, query_one,
    shared_budget_from_row,
};

fn load_invitation(conn: &Connection, id: &str) -> Result<Invitation, ServiceError> {
    query_one(conn, &db::sharing::get_invitation(id), invitation_from_row)
        .map_err(db_err("load invitation"))?
        .ok_or_else(|| ServiceError::NotFound("invitation not found".into()))
}

/// Invite `recipient_email` to a budget the caller owns.
pub fn create_invitation(
    conn: &Connection,
    owner_id: &str,
    owner_email: &str,
    req: &CreateInvitationRequest,
    now: DateTime<Utc>,
) -> Result<Invitation, ServiceError> {
    let permission = PermissionLevel::parse_grant(req.permission.trim()).ok_or_else(|| {
        ServiceError::BadRequest("permission must be 'view' or 'edit'".into())
    })?;
    let email = validate_email(&req.recipient_email)?;
    if email.eq_ignore_ascii_case(owner_email.trim()) {
        return Err(ServiceError::BadRequest(
            "cannot invite yourself to your own budget".into(),
        ));
    }

    require_minimum(conn, PermissionLevel::Owner, owner_id, &req.budget_id).map_err(|e| {
        match e {
            ServiceError::Forbidden(_) => {
                ServiceError::Forbidden("only the budget owner can invite".into())
            }
            other => other,
        }
    })?;

    let created_at = format_timestamp(now);
    let duplicates = count(
        conn,
        &db::sharing::pending_duplicate(&req.budget_id, &email, &created_at),
    )
    .map_err(db_err("check duplicate invitation"))?;
    if duplicates > 0 {
        return Err(ServiceError::Conflict(
            "a pending invitation already exists for this email".into(),
        ));
    }
    let existing = count(conn, &db::sharing::email_has_access(&req.budget_id, &email))
        .map_err(db_err("check existing access"))?;
    if existing > 0 {
        return Err(ServiceError::Conflict(
            "recipient already has access to this budget".into(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    execute(
        conn,
        &db::sharing::insert_invitation(
            &id,
            &req.budget_id,
            owner_id,
            &email,
            permission.as_str(),
            &created_at,
            &invitation_expires_at(now),
        ),
    )
    .map_err(db_err("insert invitation"))?;

    tracing::info!(invitation_id = %id, budget_id = %req.budget_id, %permission, "invitation created");
    load_invitation(conn, &id)
}

fn require_verified(email: Option<&str>) -> Result<&str, ServiceError> {
    email.ok_or_else(|| {
        ServiceError::Forbidden("a verified email is required to use invitations".into())
    })
}

/// Pending, unexpired invitations addressed to the caller's verified email.
pub fn list_my_invitations(
    conn: &Connection,
    verified_email: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<Invitation>, ServiceError> {
    let email = require_verified(verified_email)?.trim().to_lowercase();
    query_all(
        conn,
        &db::sharing::list_pending_for_email(&email, &format_timestamp(now)),
        invitation_with_details_from_row,
    )
    .map_err(db_err("list invitations"))
}

/// Every invitation on a budget, for its owner.
pub fn list_budget_invitations(
    conn: &Connection,
    user_id: &str,
    budget_id: &str,
) -> Result<Vec<Invitation>, ServiceError> {
    require_minimum(conn, PermissionLevel::Owner, user_id, budget_id)?;
    query_all(conn, &db::sharing::list_for_budget(budget_id), invitation_from_row)
        .map_err(db_err("list budget invitations"))
}

/// Accept or decline an invitation addressed to the caller.
pub fn respond_to_invitation(
    conn: &mut Connection,
    user_id: &str,
    verified_email: Option<&str>,
    invitation_id: &str,
    decision: &str,
    now: DateTime<Utc>,
) -> Result<Invitation, ServiceError> {
    let decision = match decision.trim() {
        "accepted" => InvitationStatus::Accepted,
        "declined" => InvitationStatus::Declined,
        _ => {
            return Err(ServiceError::BadRequest(
                "status must be 'accepted' or 'declined'".into(),
            ));
        }
    };

    let invitation = load_invitation(conn, invitation_id)?;
    if invitation.status != InvitationStatus::Pending {
        return Err(ServiceError::Conflict("invitation is not pending".into()));
    }
    let user_email = require_verified(verified_email)?;
    if !invitation
        .recipient_email
        .eq_ignore_ascii_case(user_email.trim())
    {
        return Err(ServiceError::Forbidden(
            "this invitation is addressed to someone else".into(),
        ));
    }
    if is_expired(&invitation.expires_at, now) {
        return Err(ServiceError::Conflict("invitation has expired".into()));
    }

    let responded_at = format_timestamp(now);
    let tx = conn.transaction().map_err(db_err("begin respond"))?;

    let settled = execute(
        &tx,
        &db::sharing::settle_invitation(invitation_id, decision.as_str(), &responded_at),
    )
    .map_err(db_err("settle invitation"))?;
    if settled == 0 {
        return Err(ServiceError::Conflict("invitation is not pending".into()));
    }

    if decision == InvitationStatus::Accepted {
        let budget_live = query_one(
            &tx,
            &db::budgets::owner_of(&invitation.budget_id),
            |row| row.get::<_, String>(0),
        )
        .map_err(db_err("lookup shared budget"))?;
        if budget_live.is_none() {
            return Err(ServiceError::NotFound("budget not found".into()));
        }

        let access_id = Uuid::new_v4().to_string();
        execute(
            &tx,
            &db::sharing::insert_access(
                &access_id,
                &invitation.budget_id,
                &invitation.owner_id,
                user_id,
                invitation.permission.as_str(),
                &responded_at,
            ),
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                ServiceError::Conflict("you already have access to this budget".into())
            } else {
                db_err("insert access")(e)
            }
        })?;
    }

    tx.commit().map_err(db_err("commit respond"))?;
    tracing::info!(%invitation_id, status = %decision, "invitation answered");
    load_invitation(conn, invitation_id)
}

/// Withdraw a pending invitation. The row is deleted.
pub fn cancel_invitation(
    conn: &Connection,
    user_id: &str,
    invitation_id: &str,
) -> Result<(), ServiceError> {
    let invitation = load_invitation(conn, invitation_id)?;
    if invitation.owner_id != user_id {
        return Err(ServiceError::Forbidden(
            "only the budget owner can cancel invitations".into(),
        ));
    }
    if invitation.status != InvitationStatus::Pending {
        return Err(ServiceError::Conflict("invitation is not pending".into()));
    }
    execute(conn, &db::sharing::delete_invitation(invitation_id))
        .map_err(db_err("delete invitation"))?;
    Ok(())
}

/// Grants on a budget, visible to anyone who can view it.
pub fn list_budget_access(
    conn: &Connection,
    user_id: &str,
    budget_id: &str,
) -> Result<Vec<ShareAccess>, ServiceError> {
    require_minimum(conn, PermissionLevel::View, user_id, budget_id)?;
    query_all(conn, &db::sharing::list_access(budget_id), access_from_row)
        .map_err(db_err("list access"))
}

/// Revoke a grant on a budget the caller owns.
pub fn remove_access(conn: &Connection, user_id: &str, access_id: &str) -> Result<(), ServiceError> {
    let owner: String = query_one(conn, &db::sharing::get_access(access_id), |row| row.get(2))
        .map_err(db_err("load access"))?
        .ok_or_else(|| ServiceError::NotFound("access grant not found".into()))?;
    if owner != user_id {
        return Err(ServiceError::Forbidden(
            "only the budget owner can revoke access".into(),
        ));
    }
    execute(conn, &db::sharing::delete_access(access_id)).map_err(db_err("delete access"))?;
    tracing::info!(%access_id, "access revoked");
    Ok(())
}

/// Live budgets other users shared with the caller.
pub fn shared_with_me(conn: &Connection, user_id: &str) -> Result<Vec<SharedBudget>, ServiceError> {
    query_all(conn, &db::sharing::shared_with(user_id), shared_budget_from_row)
        .map_err(db_err("list shared budgets"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::resolve;
    use crate::storage::Db;
    use crate::test_support::{grant, seed_budget, seed_unverified_user, seed_user};
    use budgetsync_api::service::parse_timestamp;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        parse_timestamp("2025-01-10T09:00:00.000Z").unwrap()
    }

    fn invite(budget: &str, email: &str, permission: &str) -> CreateInvitationRequest {
        CreateInvitationRequest {
            budget_id: budget.to_string(),
            recipient_email: email.to_string(),
            permission: permission.to_string(),
        }
    }

    fn access_rows(conn: &Connection, budget: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM share_access WHERE budget_id = ?1",
            [budget],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn create_validates_input_and_ownership() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        let a = "alice@example.com";

        let bad_perm = create_invitation(&conn, &alice, a, &invite(&budget, "bob@example.com", "owner"), t0());
        assert!(matches!(bad_perm, Err(ServiceError::BadRequest(_))));
        let bad_email = create_invitation(&conn, &alice, a, &invite(&budget, "bob", "view"), t0());
        assert!(matches!(bad_email, Err(ServiceError::BadRequest(_))));
        let selfie = create_invitation(&conn, &alice, a, &invite(&budget, " Alice@Example.com", "view"), t0());
        assert!(matches!(selfie, Err(ServiceError::BadRequest(_))));
        let stranger = create_invitation(&conn, &bob, "bob@example.com", &invite(&budget, "carol@example.com", "view"), t0());
        assert!(matches!(stranger, Err(ServiceError::Forbidden(_))));

        let inv = create_invitation(&conn, &alice, a, &invite(&budget, " Bob@Example.COM ", "edit"), t0()).unwrap();
        assert_eq!(inv.recipient_email, "bob@example.com");
        assert_eq!(inv.status, InvitationStatus::Pending);
        assert_eq!(inv.permission, PermissionLevel::Edit);
        assert_eq!(inv.expires_at, "2025-01-17T09:00:00.000Z");
    }

    #[test]
    fn duplicate_pending_invitation_conflicts() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        let req = invite(&budget, "bob@example.com", "view");
        create_invitation(&conn, &alice, "alice@example.com", &req, t0()).unwrap();
        let again = create_invitation(&conn, &alice, "alice@example.com", &req, t0());
        assert!(matches!(again, Err(ServiceError::Conflict(_))));
        // Once the first one has lapsed a new invitation is allowed.
        let later = t0() + Duration::days(8);
        assert!(create_invitation(&conn, &alice, "alice@example.com", &req, later).is_ok());
    }

    #[test]
    fn existing_grant_blocks_new_invitation() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        grant(&conn, &budget, &alice, &bob, "view");
        let res = create_invitation(&conn, &alice, "alice@example.com", &invite(&budget, "bob@example.com", "edit"), t0());
        assert!(matches!(res, Err(ServiceError::Conflict(_))));
    }

    #[test]
    fn accepting_once_creates_exactly_one_grant() {
        let db = Db::open_in_memory().unwrap();
        let mut conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        let inv = create_invitation(&conn, &alice, "alice@example.com", &invite(&budget, "bob@example.com", "view"), t0()).unwrap();

        let pending = list_my_invitations(&conn, Some("BOB@example.com"), t0()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].owner_name.as_deref(), Some("alice"));

        let later = t0() + Duration::hours(1);
        let accepted = respond_to_invitation(&mut conn, &bob, Some("bob@example.com"), &inv.id, "accepted", later).unwrap();
        assert_eq!(accepted.status, InvitationStatus::Accepted);
        assert!(accepted.responded_at.is_some());
        assert_eq!(access_rows(&conn, &budget), 1);
        assert_eq!(resolve(&conn, &bob, &budget).unwrap(), PermissionLevel::View);

        let second = respond_to_invitation(&mut conn, &bob, Some("bob@example.com"), &inv.id, "accepted", later);
        assert!(matches!(second, Err(ServiceError::Conflict(_))));
        assert_eq!(access_rows(&conn, &budget), 1);
        assert!(list_my_invitations(&conn, Some("bob@example.com"), later).unwrap().is_empty());
    }

    #[test]
    fn settled_invitations_conflict_for_any_caller() {
        let db = Db::open_in_memory().unwrap();
        let mut conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let carol = seed_user(&conn, "carol@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        let inv = create_invitation(&conn, &alice, "alice@example.com", &invite(&budget, "bob@example.com", "view"), t0()).unwrap();
        respond_to_invitation(&mut conn, &bob, Some("bob@example.com"), &inv.id, "declined", t0()).unwrap();

        for (user, email) in [(&bob, "bob@example.com"), (&carol, "carol@example.com"), (&alice, "alice@example.com")] {
            let res = respond_to_invitation(&mut conn, user, Some(email), &inv.id, "accepted", t0());
            assert!(matches!(res, Err(ServiceError::Conflict(_))));
        }
        assert_eq!(access_rows(&conn, &budget), 0);
    }

    #[test]
    fn respond_checks_decision_recipient_and_expiry() {
        let db = Db::open_in_memory().unwrap();
        let mut conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let carol = seed_user(&conn, "carol@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        let inv = create_invitation(&conn, &alice, "alice@example.com", &invite(&budget, "bob@example.com", "view"), t0()).unwrap();

        let bad = respond_to_invitation(&mut conn, &bob, Some("bob@example.com"), &inv.id, "maybe", t0());
        assert!(matches!(bad, Err(ServiceError::BadRequest(_))));
        let missing = respond_to_invitation(&mut conn, &bob, Some("bob@example.com"), "nope", "accepted", t0());
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));
        let wrong = respond_to_invitation(&mut conn, &carol, Some("carol@example.com"), &inv.id, "accepted", t0());
        assert!(matches!(wrong, Err(ServiceError::Forbidden(_))));

        let expired = respond_to_invitation(&mut conn, &bob, Some("bob@example.com"), &inv.id, "accepted", t0() + Duration::days(8));
        match expired {
            Err(ServiceError::Conflict(msg)) => assert_eq!(msg, "invitation has expired"),
            other => panic!("expected expiry conflict, got {other:?}"),
        }
        assert_eq!(load_invitation(&conn, &inv.id).unwrap().status, InvitationStatus::Pending);
    }

    #[test]
    fn self_declared_email_cannot_claim_invitations() {
        let db = Db::open_in_memory().unwrap();
        let mut conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        let inv = create_invitation(&conn, &alice, "alice@example.com", &invite(&budget, "victim@example.com", "edit"), t0()).unwrap();
        let mallory = seed_unverified_user(&conn, "victim@example.com");

        let listed = list_my_invitations(&conn, None, t0());
        assert!(matches!(listed, Err(ServiceError::Forbidden(_))));
        let res = respond_to_invitation(&mut conn, &mallory, None, &inv.id, "accepted", t0());
        assert!(matches!(res, Err(ServiceError::Forbidden(_))));
        assert_eq!(load_invitation(&conn, &inv.id).unwrap().status, InvitationStatus::Pending);
        assert_eq!(resolve(&conn, &mallory, &budget).unwrap(), PermissionLevel::None);

        // The real owner of the address can still onboard and accept.
        let victim = seed_user(&conn, "victim@example.com");
        respond_to_invitation(&mut conn, &victim, Some("victim@example.com"), &inv.id, "accepted", t0()).unwrap();
        assert_eq!(resolve(&conn, &victim, &budget).unwrap(), PermissionLevel::Edit);
    }

    #[test]
    fn failed_grant_insert_rolls_back_acceptance() {
        let db = Db::open_in_memory().unwrap();
        let mut conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        let inv = create_invitation(&conn, &alice, "alice@example.com", &invite(&budget, "bob@example.com", "edit"), t0()).unwrap();
        // A grant appears out of band before bob answers.
        grant(&conn, &budget, &alice, &bob, "view");

        let res = respond_to_invitation(&mut conn, &bob, Some("bob@example.com"), &inv.id, "accepted", t0());
        assert!(matches!(res, Err(ServiceError::Conflict(_))));
        let after = load_invitation(&conn, &inv.id).unwrap();
        assert_eq!(after.status, InvitationStatus::Pending);
        assert!(after.responded_at.is_none());
        assert_eq!(access_rows(&conn, &budget), 1);
    }

    #[test]
    fn cancel_only_pending_and_only_by_owner() {
        let db = Db::open_in_memory().unwrap();
        let mut conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        let first = create_invitation(&conn, &alice, "alice@example.com", &invite(&budget, "bob@example.com", "view"), t0()).unwrap();

        assert!(matches!(cancel_invitation(&conn, &bob, &first.id), Err(ServiceError::Forbidden(_))));
        cancel_invitation(&conn, &alice, &first.id).unwrap();
        assert!(matches!(cancel_invitation(&conn, &alice, &first.id), Err(ServiceError::NotFound(_))));

        let second = create_invitation(&conn, &alice, "alice@example.com", &invite(&budget, "bob@example.com", "view"), t0()).unwrap();
        respond_to_invitation(&mut conn, &bob, Some("bob@example.com"), &second.id, "accepted", t0()).unwrap();
        assert!(matches!(cancel_invitation(&conn, &alice, &second.id), Err(ServiceError::Conflict(_))));
        assert_eq!(list_budget_invitations(&conn, &alice, &budget).unwrap().len(), 1);
    }

    #[test]
    fn view_grant_then_revoke() {
        let db = Db::open_in_memory().unwrap();
        let mut conn = db.conn();
        let alice = seed_user(&conn, "alice@example.com");
        let bob = seed_user(&conn, "bob@example.com");
        let budget = seed_budget(&conn, &alice, "2025-01-01");
        let inv = create_invitation(&conn, &alice, "alice@example.com", &invite(&budget, "bob@example.com", "view"), t0()).unwrap();
        respond_to_invitation(&mut conn, &bob, Some("bob@example.com"), &inv.id, "accepted", t0()).unwrap();

        assert_eq!(resolve(&conn, &bob, &budget).unwrap(), PermissionLevel::View);
        assert!(matches!(
            require_minimum(&conn, PermissionLevel::Edit, &bob, &budget),
            Err(ServiceError::Forbidden(_))
        ));

        let grants = list_budget_access(&conn, &bob, &budget).unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].email, "bob@example.com");
        let shared = shared_with_me(&conn, &bob).unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].budget_id, budget);

        assert!(matches!(remove_access(&conn, &bob, &grants[0].id), Err(ServiceError::Forbidden(_))));
        remove_access(&conn, &alice, &grants[0].id).unwrap();
        assert_eq!(resolve(&conn, &bob, &budget).unwrap(), PermissionLevel::None);
        assert!(shared_with_me(&conn, &bob).unwrap().is_empty());
        assert!(matches!(remove_access(&conn, &alice, &grants[0].id), Err(ServiceError::NotFound(_))));
    }
}
