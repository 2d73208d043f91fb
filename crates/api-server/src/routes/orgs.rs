//! Organization, membership and seat routes

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fp_core::invite::normalize_email;
use fp_core::org::{InviteRole, Membership, OrgRole, Organization, SeatSummary};

use super::error::{map_error, map_identity_error, not_found, RouteError};
use super::extract::ApiJson;
use crate::session::{caller_membership, resolve_caller};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrgRequest {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrgResponse {
    org: Organization,
    membership: Membership,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberRequest {
    email: String,
    role: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeRoleRequest {
    user_id: Uuid,
    role: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveMemberRequest {
    user_id: Uuid,
}

async fn create_org(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CreateOrgRequest>,
) -> Result<(StatusCode, Json<CreateOrgResponse>), RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let (org, membership) = state
        .repo()
        .create_organization(&req.name, caller.user.id, &caller.user.email)
        .await
        .map_err(map_error)?;
    tracing::info!("Created organization {} owned by {}", org.id, caller.user.id);
    Ok((StatusCode::CREATED, Json(CreateOrgResponse { org, membership })))
}

async fn list_members(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Membership>>, RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let membership = caller_membership(&state, &caller).await?;
    let members = state
        .repo()
        .list_memberships(membership.org_id)
        .await
        .map_err(map_error)?;
    Ok(Json(members))
}

async fn add_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<AddMemberRequest>,
) -> Result<(StatusCode, Json<Membership>), RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let actor = caller_membership(&state, &caller).await?;
    let role = req.role.parse::<InviteRole>().map_err(map_error)?;
    let email = normalize_email(&req.email).map_err(map_error)?;

    let user = state
        .identity()
        .find_user_by_email(&email)
        .await
        .map_err(map_identity_error)?
        .ok_or_else(|| not_found("No registered user with that email"))?;
    let membership = state
        .members()
        .add_existing_user(&actor, user.id, &email, role)
        .await
        .map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(membership)))
}

async fn change_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<ChangeRoleRequest>,
) -> Result<Json<Membership>, RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let actor = caller_membership(&state, &caller).await?;
    let role = req.role.parse::<OrgRole>().map_err(map_error)?;
    let membership = state
        .members()
        .change_role(&actor, req.user_id, role)
        .await
        .map_err(map_error)?;
    Ok(Json(membership))
}

async fn remove_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<RemoveMemberRequest>,
) -> Result<Json<Membership>, RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let actor = caller_membership(&state, &caller).await?;
    let removed = state
        .members()
        .remove(&actor, req.user_id)
        .await
        .map_err(map_error)?;
    Ok(Json(removed))
}

async fn seat_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SeatSummary>, RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let membership = caller_membership(&state, &caller).await?;
    let summary = state
        .members()
        .seat_summary(membership.org_id)
        .await
        .map_err(map_error)?;
    Ok(Json(summary))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/orgs", post(create_org))
        .route(
            "/api/org/members",
            get(list_members)
                .post(add_member)
                .patch(change_role)
                .delete(remove_member),
        )
        .route("/api/org/seats", get(seat_summary))
}
