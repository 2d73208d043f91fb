//! Invitation routes: create, list, accept, resend and diagnostics

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use fp_core::invite::{
    normalize_email, Acceptance, AccountState, EmailMode, Invitation, ResendTarget,
};
use fp_core::link::DEFAULT_NEXT;
use fp_core::org::{has_active_sub, InviteRole, Membership, SeatSummary, Subscription};

use super::error::{bad_request, forbidden, map_error, not_found, too_many_requests, RouteError};
use super::extract::{ApiJson, ApiQuery};
use crate::session::{caller_membership, resolve_caller, Caller};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateInviteRequest {
    email: String,
    role: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateInviteResponse {
    ok: bool,
    invite_id: Uuid,
    duplicate: bool,
    /// `None` when the email could not be sent; the owner can resend
    email_mode: Option<EmailMode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InviteIdRequest {
    invite_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptResponse {
    ok: bool,
    #[serde(flatten)]
    acceptance: Acceptance,
    /// Where the flow continues
    next: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResendRequest {
    #[serde(default)]
    invite_id: Option<Uuid>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResendResponse {
    ok: bool,
    email_mode: EmailMode,
    account_state: AccountState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InviteDebugResponse {
    invitation: Invitation,
    subscription: Option<Subscription>,
    has_active_sub: bool,
    seats: SeatSummary,
}

/// The caller's membership, if the invite policy lets that role invite
async fn inviter(state: &AppState, caller: &Caller) -> Result<Membership, RouteError> {
    let membership = caller_membership(state, caller).await?;
    if !state.config().invite_policy.allows(membership.role) {
        return Err(forbidden("Your role cannot manage invitations"));
    }
    Ok(membership)
}

async fn create_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CreateInviteRequest>,
) -> Result<Json<CreateInviteResponse>, RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let membership = inviter(&state, &caller).await?;
    let role = req.role.parse::<InviteRole>().map_err(map_error)?;

    let created = state
        .ledger()
        .create(membership.org_id, &req.email, role, caller.user.id)
        .await
        .map_err(map_error)?;

    let email_mode = if created.duplicate {
        None
    } else {
        match state.resend().dispatch(&created.invitation).await {
            Ok(outcome) => Some(outcome.mode),
            Err(err) => {
                warn!(
                    "Invitation {} created but email dispatch failed: {}",
                    created.invitation.id, err
                );
                None
            }
        }
    };

    Ok(Json(CreateInviteResponse {
        ok: true,
        invite_id: created.invitation.id,
        duplicate: created.duplicate,
        email_mode,
    }))
}

async fn list_invites(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Invitation>>, RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let membership = inviter(&state, &caller).await?;
    let pending = state
        .ledger()
        .list_pending(membership.org_id)
        .await
        .map_err(map_error)?;
    Ok(Json(pending))
}

async fn accept_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<InviteIdRequest>,
) -> Result<Json<AcceptResponse>, RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let acceptance = state
        .acceptance()
        .accept(req.invite_id, &caller.user)
        .await
        .map_err(map_error)?;
    Ok(Json(AcceptResponse {
        ok: true,
        acceptance,
        next: DEFAULT_NEXT,
    }))
}

async fn resend_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<ResendRequest>,
) -> Result<Json<ResendResponse>, RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let membership = inviter(&state, &caller).await?;

    let target = match (req.invite_id, req.email.as_deref()) {
        (Some(invite_id), _) => {
            let invitation = state.ledger().lookup(invite_id).await.map_err(map_error)?;
            if invitation.org_id != membership.org_id {
                return Err(forbidden("Invitation belongs to another organization"));
            }
            ResendTarget::Invitation(invite_id)
        }
        (None, Some(email)) => {
            let email = normalize_email(email).map_err(map_error)?;
            member_resend_target(&state, &membership, email).await?
        }
        (None, None) => return Err(bad_request("inviteId or email is required")),
    };

    if let Err(remaining) = state.throttle().lock().await.try_acquire(&target) {
        return Err(too_many_requests(format!(
            "Wait {} seconds before resending",
            remaining.as_secs().max(1)
        )));
    }

    let outcome = state.resend().resend(&target).await.map_err(map_error)?;
    info!("Resent {} link by {}", outcome.mode, caller.user.id);
    Ok(Json(ResendResponse {
        ok: true,
        email_mode: outcome.mode,
        account_state: outcome.state,
    }))
}

/// Resends by email are limited to the caller's organization: a pending
/// invitation for the email wins, otherwise the email must be a member.
async fn member_resend_target(
    state: &AppState,
    membership: &Membership,
    email: String,
) -> Result<ResendTarget, RouteError> {
    let repo = state.repo();
    if let Some(invitation) = repo
        .find_pending_invitation(membership.org_id, &email)
        .await
        .map_err(map_error)?
    {
        return Ok(ResendTarget::Invitation(invitation.id));
    }
    let is_member = repo
        .list_memberships(membership.org_id)
        .await
        .map_err(map_error)?
        .iter()
        .any(|member| member.email == email);
    if !is_member {
        return Err(not_found("No member or pending invitation with that email"));
    }
    Ok(ResendTarget::Email(email))
}

async fn debug_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<InviteIdRequest>,
) -> Result<Json<InviteDebugResponse>, RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let invitation = state
        .ledger()
        .lookup(query.invite_id)
        .await
        .map_err(map_error)?;

    let membership = state
        .repo()
        .get_membership(invitation.org_id, caller.user.id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| forbidden("Not a member of the invitation's organization"))?;
    if !state.config().invite_policy.allows(membership.role) {
        return Err(forbidden("Your role cannot manage invitations"));
    }

    let subscription = state
        .repo()
        .get_subscription(invitation.org_id)
        .await
        .map_err(map_error)?;
    let seats = state
        .members()
        .seat_summary(invitation.org_id)
        .await
        .map_err(map_error)?;
    Ok(Json(InviteDebugResponse {
        has_active_sub: has_active_sub(subscription.as_ref()),
        invitation,
        subscription,
        seats,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/invites", get(list_invites).post(create_invite))
        .route("/api/invites/accept", post(accept_invite))
        .route("/api/invites/resend", post(resend_invite))
        .route("/api/invites/debug", get(debug_invite))
}
